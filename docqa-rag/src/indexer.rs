//! Build-time half of the pipeline: chunk → embed → index.
//!
//! The [`Indexer`] owns the index lifecycle. Documents are processed as
//! units: a document either lands in the index with all of its chunks or
//! not at all, and a failing document never stops the rest of a batch.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::chunking::{Chunker, FixedSizeChunker};
use crate::config::RagConfig;
use crate::document::{Chunk, Document, EmbeddedChunk, IndexRecord, IndexStats};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::{extract_document, is_supported};
use crate::index::IndexService;
use crate::source::BlobStore;

/// Outcome of indexing one document in a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    /// The document identifier.
    pub document_id: String,
    /// Number of chunks indexed, or why the document was rejected.
    pub result: Result<usize>,
}

/// Per-document results of [`Indexer::index_documents`], in input order.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub outcomes: Vec<DocumentOutcome>,
}

impl IndexReport {
    /// Number of documents indexed successfully.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Documents that failed, with their errors. These must be re-run in full.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &RagError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.document_id.as_str(), e)))
    }

    /// Total chunks written across all successful documents.
    pub fn total_chunks(&self) -> usize {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()).sum()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Turns documents into index records and keeps the index in sync with them.
///
/// Re-indexing a document replaces every chunk it had before. Writes for
/// the same document id are serialized; different documents proceed in
/// parallel up to the configured concurrency.
pub struct Indexer {
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn IndexService>,
    min_chunk_chars: usize,
    concurrency: usize,
    document_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Indexer {
    /// Create an indexer using a [`FixedSizeChunker`] built from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the chunking parameters are invalid.
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn IndexService>,
    ) -> Result<Self> {
        let chunker = FixedSizeChunker::new(config.chunk_size, config.chunk_overlap)?;
        Ok(Self {
            chunker: Arc::new(chunker),
            embedder,
            index,
            min_chunk_chars: config.min_chunk_chars,
            concurrency: config.index_concurrency.max(1),
            document_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the chunking strategy.
    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn index(&self) -> &Arc<dyn IndexService> {
        &self.index
    }

    /// Create the index with the embedder's dimensionality.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SchemaError`] if the index already exists with
    /// another dimensionality.
    pub async fn create_index(&self) -> Result<()> {
        let dimensions = self.embedder.dimensions();
        self.index.ensure_index(dimensions).await.inspect_err(|e| {
            error!(backend = self.index.name(), dimensions, error = %e, "failed to create index");
        })
    }

    /// Chunk and embed a document into records without touching the index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if embedding fails and
    /// [`RagError::SchemaError`] if the embedder returns vectors of the
    /// wrong shape.
    pub async fn prepare(&self, document: &Document) -> Result<Vec<IndexRecord>> {
        let chunks: Vec<Chunk> = self
            .chunker
            .chunk(document)
            .into_iter()
            .filter(|c| {
                let trimmed = c.text.trim();
                !trimmed.is_empty() && trimmed.chars().count() >= self.min_chunk_chars
            })
            .collect();
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::embedding(
                self.embedder.model_version(),
                format!("expected {} vectors, got {}", chunks.len(), vectors.len()),
            ));
        }

        let dimensions = self.embedder.dimensions();
        let model_version = self.embedder.model_version().to_string();
        chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                if vector.len() != dimensions {
                    return Err(RagError::SchemaError(format!(
                        "chunk '{}' embedded to {} dimensions, expected {dimensions}",
                        chunk.id,
                        vector.len()
                    )));
                }
                let embedded = EmbeddedChunk { chunk, vector, model_version: model_version.clone() };
                Ok(IndexRecord::from(embedded))
            })
            .collect()
    }

    /// Index one document, replacing any chunks it had before.
    ///
    /// Returns the number of chunks written. A document with no indexable
    /// text ends up with no records.
    ///
    /// # Errors
    ///
    /// Any failure leaves the document's previous records untouched; the
    /// document must be re-run in full.
    pub async fn index_document(&self, document: &Document) -> Result<usize> {
        let lock = self.document_lock(&document.id).await;
        let result = {
            let _guard = lock.lock().await;
            self.write_document(document).await
        };
        self.release_lock(&document.id, lock).await;

        match &result {
            Ok(chunk_count) => {
                info!(document.id = %document.id, chunk_count, "indexed document");
            }
            Err(e) => {
                error!(document.id = %document.id, error = %e, "failed to index document");
            }
        }
        result
    }

    async fn write_document(&self, document: &Document) -> Result<usize> {
        let records = self.prepare(document).await?;
        self.index.replace_document(&document.id, &records).await?;
        Ok(records.len())
    }

    /// Index many documents with bounded parallelism.
    ///
    /// Never fails as a whole; inspect the returned [`IndexReport`].
    pub async fn index_documents(&self, documents: &[Document]) -> IndexReport {
        let mut outcomes: Vec<(usize, DocumentOutcome)> = stream::iter(documents.iter().enumerate())
            .map(|(position, document)| async move {
                let result = self.index_document(document).await;
                (position, DocumentOutcome { document_id: document.id.clone(), result })
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(position, _)| *position);

        let report = IndexReport { outcomes: outcomes.into_iter().map(|(_, o)| o).collect() };
        let failed = report.outcomes.len() - report.succeeded();
        if failed > 0 {
            warn!(documents = report.outcomes.len(), failed, "batch indexing finished with failures");
        } else {
            info!(
                documents = report.outcomes.len(),
                chunks = report.total_chunks(),
                "batch indexing finished"
            );
        }
        report
    }

    /// Extract and index every supported document in `store`.
    ///
    /// Unreadable documents are reported in the returned [`IndexReport`]
    /// alongside indexing failures, ordered by document id.
    ///
    /// # Errors
    ///
    /// Fails only if the store cannot be listed.
    pub async fn index_store(&self, store: &dyn BlobStore) -> Result<IndexReport> {
        let names = store.list().await?;
        let mut documents = Vec::new();
        let mut rejected = Vec::new();

        for name in names {
            if !is_supported(&name) {
                warn!(file = %name, "skipping unsupported file");
                continue;
            }
            let loaded = match store.get(&name).await {
                Ok(bytes) => extract_document(&name, &bytes),
                Err(e) => Err(e),
            };
            match loaded {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!(file = %name, error = %e, "failed to load document");
                    rejected.push(DocumentOutcome { document_id: name, result: Err(e) });
                }
            }
        }

        let mut report = self.index_documents(&documents).await;
        report.outcomes.extend(rejected);
        report.outcomes.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        Ok(report)
    }

    /// Remove every record of a document. Returns how many were removed.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let lock = self.document_lock(document_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.index.delete_by_document(document_id).await
        };
        self.release_lock(document_id, lock).await;
        let removed = result?;
        info!(document.id = document_id, removed, "deleted document");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.index.stats().await
    }

    async fn document_lock(&self, document_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.document_locks.lock().await;
        locks.entry(document_id.to_string()).or_default().clone()
    }

    /// Drop the map entry once no other task holds or waits on it.
    async fn release_lock(&self, document_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.document_locks.lock().await;
        let idle = locks.get(document_id).is_some_and(|held| Arc::ptr_eq(held, &lock))
            && Arc::strong_count(&lock) == 2;
        if idle {
            locks.remove(document_id);
        }
    }
}
