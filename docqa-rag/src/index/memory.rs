//! In-process index service: HNSW for vectors, BM25 for keywords.
//!
//! This module provides [`InMemoryIndex`], an [`IndexService`] backed by
//! plain collections behind a `tokio::sync::RwLock`. It is the embedded
//! backend of the CLI and the fake used throughout the tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{IndexRecord, IndexStats, QueryResult, ScoredRecord};
use crate::error::{RagError, Result};
use crate::index::bm25::Bm25Index;
use crate::index::hnsw::Hnsw;
use crate::index::{Delete, IndexService, Query, Upsert};

/// Max neighbors per HNSW node per layer.
pub const DEFAULT_M: usize = 16;
/// HNSW beam width while inserting.
pub const DEFAULT_EF_CONSTRUCTION: usize = 100;

const BACKEND: &str = "in-memory";

/// Rebuild the graph once tombstones outnumber live points and exceed this.
const COMPACTION_THRESHOLD: usize = 64;

/// An in-memory index with approximate vector search and BM25 keyword search.
///
/// Records live in insertion-ordered slots; the slot number is the id used
/// by both the HNSW graph and the BM25 postings, so equal scores resolve to
/// the earlier insertion. Re-upserting a `chunk_id` moves it to a new slot.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{InMemoryIndex, IndexService, Upsert};
///
/// let index = InMemoryIndex::new();
/// index.ensure_index(384).await?;
/// index.upsert(&records).await?;
/// ```
#[derive(Debug)]
pub struct InMemoryIndex {
    state: RwLock<IndexState>,
    m: usize,
    ef_construction: usize,
}

#[derive(Debug, Default)]
struct IndexState {
    dimensions: Option<usize>,
    model_version: Option<String>,
    slots: Vec<Option<IndexRecord>>,
    by_chunk: HashMap<String, u32>,
    by_document: HashMap<String, BTreeSet<u32>>,
    hnsw: Option<Hnsw>,
    bm25: Bm25Index,
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::with_hnsw_params(DEFAULT_M, DEFAULT_EF_CONSTRUCTION)
    }
}

impl InMemoryIndex {
    /// Create an empty index. Dimensionality is fixed by
    /// [`ensure_index`](IndexService::ensure_index) or the first upsert.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index with custom HNSW parameters.
    pub fn with_hnsw_params(m: usize, ef_construction: usize) -> Self {
        Self { state: RwLock::new(IndexState::default()), m, ef_construction }
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        self.state.read().await.by_chunk.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Look up a record by its `chunk_id`.
    pub async fn get(&self, chunk_id: &str) -> Option<IndexRecord> {
        let state = self.state.read().await;
        let slot = *state.by_chunk.get(chunk_id)?;
        state.slots.get(slot as usize).cloned().flatten()
    }
}

impl IndexState {
    /// Check a whole batch against the index schema without writing.
    ///
    /// With `replacing`, records of that document are treated as already
    /// gone: if they are the only content, any model version is accepted.
    fn validate(&self, records: &[IndexRecord], replacing: Option<&str>) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let replaced = replacing.and_then(|id| self.by_document.get(id)).map_or(0, BTreeSet::len);
        let pinned_version = if replaced == self.by_chunk.len() { None } else { self.model_version.as_deref() };
        let dimensions = self.dimensions.unwrap_or(first.vector.len());
        let version = pinned_version.unwrap_or(&first.embedding_model_version);
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for record in records {
            if record.chunk_id.is_empty() {
                return Err(RagError::SchemaError("record has an empty chunk_id".into()));
            }
            let owner = owners
                .insert(&record.chunk_id, &record.document_id)
                .or_else(|| self.owner_of(&record.chunk_id));
            if let Some(owner) = owner.filter(|owner| *owner != record.document_id) {
                return Err(RagError::SchemaError(format!(
                    "chunk_id '{}' of '{}' is already used by '{owner}'",
                    record.chunk_id, record.document_id
                )));
            }
            if record.vector.len() != dimensions {
                return Err(RagError::SchemaError(format!(
                    "record '{}' has {} dimensions, index expects {dimensions}",
                    record.chunk_id,
                    record.vector.len()
                )));
            }
            if record.embedding_model_version != version {
                return Err(RagError::SchemaError(format!(
                    "record '{}' was embedded with '{}', index uses '{version}'",
                    record.chunk_id, record.embedding_model_version
                )));
            }
        }
        Ok(())
    }

    fn owner_of(&self, chunk_id: &str) -> Option<&str> {
        let slot = *self.by_chunk.get(chunk_id)?;
        self.slots.get(slot as usize)?.as_ref().map(|record| record.document_id.as_str())
    }

    fn graph(&mut self, dimensions: usize, m: usize, ef_construction: usize) -> &mut Hnsw {
        self.hnsw.get_or_insert_with(|| Hnsw::new(dimensions, m, ef_construction))
    }

    fn insert(&mut self, record: IndexRecord, m: usize, ef_construction: usize) -> Result<()> {
        if let Some(old) = self.by_chunk.get(&record.chunk_id).copied() {
            self.remove_slot(old);
        }

        let slot = u32::try_from(self.slots.len())
            .map_err(|_| RagError::index(BACKEND, "slot space exhausted"))?;
        let dimensions = record.vector.len();
        self.dimensions.get_or_insert(dimensions);
        self.model_version.get_or_insert_with(|| record.embedding_model_version.clone());

        self.graph(dimensions, m, ef_construction).insert(slot, record.vector.clone())?;
        self.bm25.insert(slot, &record.text);
        self.by_chunk.insert(record.chunk_id.clone(), slot);
        self.by_document.entry(record.document_id.clone()).or_default().insert(slot);
        self.slots.push(Some(record));
        Ok(())
    }

    fn remove_slot(&mut self, slot: u32) {
        let Some(record) = self.slots.get_mut(slot as usize).and_then(Option::take) else {
            return;
        };
        self.by_chunk.remove(&record.chunk_id);
        if let Some(slots) = self.by_document.get_mut(&record.document_id) {
            slots.remove(&slot);
            if slots.is_empty() {
                self.by_document.remove(&record.document_id);
            }
        }
        if let Some(hnsw) = self.hnsw.as_mut() {
            hnsw.remove(slot);
        }
        self.bm25.remove(slot);
    }

    fn remove_document(&mut self, document_id: &str) -> usize {
        let Some(slots) = self.by_document.get(document_id).cloned() else {
            return 0;
        };
        for slot in &slots {
            self.remove_slot(*slot);
        }
        slots.len()
    }

    /// Re-slot live records into a fresh graph and keyword index once
    /// tombstones dominate. Relative insertion order is preserved.
    fn compact(&mut self, m: usize, ef_construction: usize) -> Result<()> {
        let Some(hnsw) = self.hnsw.as_ref() else {
            return Ok(());
        };
        let deleted = hnsw.deleted_count();
        if deleted < COMPACTION_THRESHOLD || deleted <= hnsw.len() {
            return Ok(());
        }

        debug!(backend = BACKEND, deleted, live = hnsw.len(), "compacting index");
        let dimensions = hnsw.dimensions();
        let live: Vec<IndexRecord> = std::mem::take(&mut self.slots).into_iter().flatten().collect();
        self.by_chunk.clear();
        self.by_document.clear();
        self.bm25 = Bm25Index::default();
        self.hnsw = Some(Hnsw::new(dimensions, m, ef_construction));
        for record in live {
            self.insert(record, m, ef_construction)?;
        }
        Ok(())
    }

    /// Number of slots, live or tombstoned.
    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn scored(&self, ranked: Vec<(u32, f32)>) -> QueryResult {
        let matches = ranked
            .into_iter()
            .filter_map(|(slot, score)| {
                let record = self.slots.get(slot as usize)?.as_ref()?;
                Some(ScoredRecord { record: record.clone(), score })
            })
            .collect();
        QueryResult::new(matches)
    }

    fn reset_schema_if_empty(&mut self) {
        if self.by_chunk.is_empty() {
            self.model_version = None;
        }
    }
}

#[async_trait]
impl Upsert for InMemoryIndex {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        let mut state = self.state.write().await;
        state.validate(records, None)?;
        for record in records {
            state.insert(record.clone(), self.m, self.ef_construction)?;
        }
        state.compact(self.m, self.ef_construction)?;
        debug!(backend = BACKEND, count = records.len(), "upserted records");
        Ok(())
    }
}

#[async_trait]
impl Query for InMemoryIndex {
    async fn vector_query(&self, vector: &[f32], top_k: usize) -> Result<QueryResult> {
        let state = self.state.read().await;
        if let Some(dimensions) = state.dimensions {
            if vector.len() != dimensions {
                return Err(RagError::SchemaError(format!(
                    "query vector has {} dimensions, index expects {dimensions}",
                    vector.len()
                )));
            }
        }
        let ranked = match state.hnsw.as_ref() {
            Some(hnsw) => hnsw.search(vector, top_k),
            None => Vec::new(),
        };
        Ok(state.scored(ranked))
    }

    async fn keyword_query(&self, text: &str, top_k: usize) -> Result<QueryResult> {
        let state = self.state.read().await;
        let ranked = state.bm25.search(text, top_k);
        Ok(state.scored(ranked))
    }
}

#[async_trait]
impl Delete for InMemoryIndex {
    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let removed = state.remove_document(document_id);
        state.reset_schema_if_empty();
        state.compact(self.m, self.ef_construction)?;
        debug!(backend = BACKEND, document_id, removed, "deleted document records");
        Ok(removed)
    }
}

#[async_trait]
impl IndexService for InMemoryIndex {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn ensure_index(&self, dimensions: usize) -> Result<()> {
        if dimensions == 0 {
            return Err(RagError::ConfigError("index dimensions must be greater than 0".into()));
        }
        let mut state = self.state.write().await;
        match state.dimensions {
            Some(existing) if existing != dimensions => Err(RagError::SchemaError(format!(
                "index exists with {existing} dimensions, requested {dimensions}"
            ))),
            Some(_) => Ok(()),
            None => {
                state.dimensions = Some(dimensions);
                Ok(())
            }
        }
    }

    async fn stats(&self) -> Result<IndexStats> {
        let state = self.state.read().await;
        Ok(IndexStats {
            record_count: state.by_chunk.len(),
            distinct_document_count: state.by_document.len(),
            dimensions: state.dimensions,
            embedding_model_version: state.model_version.clone(),
        })
    }

    /// Validates the new records, then swaps the document's records under
    /// one write lock so readers never see a half-replaced document.
    async fn replace_document(&self, document_id: &str, records: &[IndexRecord]) -> Result<()> {
        if let Some(stray) = records.iter().find(|r| r.document_id != document_id) {
            return Err(RagError::SchemaError(format!(
                "record '{}' belongs to '{}', not '{document_id}'",
                stray.chunk_id, stray.document_id
            )));
        }

        let mut state = self.state.write().await;
        state.validate(records, Some(document_id))?;
        let removed = state.remove_document(document_id);
        state.reset_schema_if_empty();
        for record in records {
            state.insert(record.clone(), self.m, self.ef_construction)?;
        }
        state.compact(self.m, self.ef_construction)?;
        debug!(backend = BACKEND, document_id, removed, inserted = records.len(), "replaced document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(chunk_id: &str, document_id: &str, angle: f32) -> IndexRecord {
        IndexRecord {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            page: 1,
            sequence: 0,
            text: format!("{chunk_id} text"),
            vector: vec![angle.cos(), angle.sin()],
            embedding_model_version: "v1".into(),
        }
    }

    #[tokio::test]
    async fn slots_stay_bounded_under_churn() {
        let index = InMemoryIndex::new();
        for round in 0..50 {
            let records: Vec<IndexRecord> =
                (0..10).map(|i| record(&format!("d_{i}"), "d.txt", (round * 10 + i) as f32 * 0.01)).collect();
            index.replace_document("d.txt", &records).await.unwrap();
        }

        let state = index.state.read().await;
        assert_eq!(state.by_chunk.len(), 10);
        assert!(state.slot_count() <= 10 + COMPACTION_THRESHOLD * 2, "slots grew to {}", state.slot_count());
        assert!(state.by_chunk.values().all(|slot| state.slots[*slot as usize].is_some()));
    }

    #[tokio::test]
    async fn compaction_keeps_insertion_order_and_lookups() {
        let index = InMemoryIndex::new();
        index.upsert(&[record("keep_0", "keep.txt", 0.0), record("keep_1", "keep.txt", 0.0)]).await.unwrap();
        let churn: Vec<IndexRecord> =
            (0..COMPACTION_THRESHOLD + 1).map(|i| record(&format!("x_{i}"), "x.txt", 1.0)).collect();
        index.upsert(&churn).await.unwrap();
        index.delete_by_document("x.txt").await.unwrap();

        let state = index.state.read().await;
        assert_eq!(state.slot_count(), 2);
        assert_eq!(state.by_chunk["keep_0"], 0);
        assert_eq!(state.by_chunk["keep_1"], 1);
        assert_eq!(state.by_document["keep.txt"].len(), 2);
        drop(state);

        let hits = index.vector_query(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|m| m.record.chunk_id.as_str()).collect();
        assert_eq!(ids, ["keep_0", "keep_1"]);
        assert_eq!(index.keyword_query("keep", 5).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn chunk_ids_belong_to_one_document() {
        let index = InMemoryIndex::new();
        index.upsert(&[record("notes_0", "notes.pdf", 0.0)]).await.unwrap();

        let err = index.upsert(&[record("notes_0", "notes.md", 1.0)]).await.unwrap_err();
        assert!(matches!(err, RagError::SchemaError(_)));
        let err = index.replace_document("notes.md", &[record("notes_0", "notes.md", 1.0)]).await.unwrap_err();
        assert!(matches!(err, RagError::SchemaError(_)));

        let clash = [record("new_0", "a.txt", 0.0), record("new_0", "b.txt", 0.0)];
        assert!(index.upsert(&clash).await.is_err());
        assert_eq!(index.get("notes_0").await.unwrap().document_id, "notes.pdf");
        assert_eq!(index.len().await, 1);
    }
}
