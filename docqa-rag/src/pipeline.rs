//! Question-answering pipeline orchestrator.
//!
//! The [`RagPipeline`] composes an [`EmbeddingProvider`], an
//! [`IndexService`] and a [`LanguageModel`] into the two workflows of the
//! system: ingest (extract → chunk → embed → index) and answer
//! (search → assemble context → synthesize).
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{HashingEmbeddingProvider, InMemoryIndex, RagConfig, RagPipeline};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .index(Arc::new(InMemoryIndex::new()))
//!     .language_model(Arc::new(my_model))
//!     .build()?;
//!
//! pipeline.create_index().await?;
//! pipeline.ingest(&document).await?;
//! let response = pipeline.answer_question("What did I write about cats?", "hybrid", 4).await?;
//! ```

use std::sync::Arc;

use tracing::info;

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::{AnswerResponse, Document, IndexStats, QueryResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::IndexService;
use crate::indexer::{IndexReport, Indexer};
use crate::retriever::{Retriever, SearchMode};
use crate::source::BlobStore;
use crate::synthesis::{LanguageModel, Synthesizer};

/// The question-answering pipeline.
///
/// Construct one via [`RagPipeline::builder()`] at startup and share it;
/// every method takes `&self`.
pub struct RagPipeline {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    indexer: Indexer,
    retriever: Retriever,
    synthesizer: Synthesizer,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Return a reference to the index service.
    pub fn index(&self) -> &Arc<dyn IndexService> {
        self.indexer.index()
    }

    /// Create the index with the embedding provider's dimensionality.
    pub async fn create_index(&self) -> Result<()> {
        self.indexer.create_index().await
    }

    /// Index one document, replacing its previous chunks.
    ///
    /// Returns the number of chunks written.
    pub async fn ingest(&self, document: &Document) -> Result<usize> {
        self.indexer.index_document(document).await
    }

    /// Index many documents in parallel. One document's failure does not
    /// affect the others.
    pub async fn ingest_batch(&self, documents: &[Document]) -> IndexReport {
        self.indexer.index_documents(documents).await
    }

    /// Extract and index every supported document in `store`.
    ///
    /// See [`Indexer::index_store`].
    pub async fn ingest_store(&self, store: &dyn BlobStore) -> Result<IndexReport> {
        self.indexer.index_store(store).await
    }

    /// Remove a document's chunks from the index.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        self.indexer.delete_document(document_id).await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.indexer.stats().await
    }

    /// Search without synthesis.
    pub async fn search(&self, query: &str, mode: SearchMode, top_k: usize) -> Result<QueryResult> {
        self.retriever.search(query, mode, top_k).await
    }

    /// Search and synthesize an answer.
    ///
    /// # Errors
    ///
    /// Query-path errors surface unchanged; an empty result is not an
    /// error and produces a "nothing found" answer without calling the
    /// language model.
    pub async fn answer(
        &self,
        question: &str,
        mode: SearchMode,
        top_k: usize,
    ) -> Result<AnswerResponse> {
        let result = self.retriever.search(question, mode, top_k).await?;
        let response = self.synthesizer.answer(question, &result).await?;
        info!(
            %mode,
            top_k,
            chunks_used = response.chunks_used,
            sources = ?response.sources,
            "question answered"
        );
        Ok(response)
    }

    /// The serving-layer entry point: `mode` is one of `vector`, `keyword`
    /// or `hybrid`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::QueryError`] for an unknown mode, plus everything
    /// [`answer`](Self::answer) can return.
    pub async fn answer_question(
        &self,
        question: &str,
        mode: &str,
        top_k: usize,
    ) -> Result<AnswerResponse> {
        let mode: SearchMode = mode.parse()?;
        self.answer(question, mode, top_k).await
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// All fields except `chunker` are required; without one, a fixed-size
/// chunker is built from the config.
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<Arc<dyn IndexService>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    chunker: Option<Arc<dyn Chunker>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the index backend.
    pub fn index(mut self, index: Arc<dyn IndexService>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the language model used for synthesis.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Override the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Build the [`RagPipeline`], validating the config and that all
    /// required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any required field is missing or
    /// the config is invalid.
    pub fn build(self) -> Result<RagPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let index =
            self.index.ok_or_else(|| RagError::ConfigError("index is required".to_string()))?;
        let language_model = self
            .language_model
            .ok_or_else(|| RagError::ConfigError("language_model is required".to_string()))?;

        let mut indexer = Indexer::new(&config, embedding_provider.clone(), index.clone())?;
        if let Some(chunker) = self.chunker {
            indexer = indexer.with_chunker(chunker);
        }
        let retriever = Retriever::new(&config, embedding_provider.clone(), index);
        let synthesizer = Synthesizer::new(&config, language_model);

        Ok(RagPipeline { config, embedding_provider, indexer, retriever, synthesizer })
    }
}
