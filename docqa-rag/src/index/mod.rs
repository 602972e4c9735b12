//! Index service capabilities and their implementations.
//!
//! The index is an external collaborator with a small contract: records
//! are upserted and deleted by document, and queried either by vector or
//! by text. Each capability is its own trait so callers can depend on
//! only what they use; [`IndexService`] bundles them with lifecycle calls.

use async_trait::async_trait;

use crate::document::{IndexRecord, IndexStats, QueryResult};
use crate::error::Result;

pub mod bm25;
pub mod hnsw;
pub mod memory;

#[cfg(feature = "azure")]
pub mod azure;

pub use memory::InMemoryIndex;

/// Write records into the index.
#[async_trait]
pub trait Upsert: Send + Sync {
    /// Insert or replace records keyed by `chunk_id`.
    ///
    /// Every record's vector length and embedding model version must match
    /// the index; otherwise the whole batch is rejected with
    /// [`RagError::SchemaError`](crate::RagError::SchemaError) before any
    /// write.
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()>;
}

/// Read-only queries against the index.
#[async_trait]
pub trait Query: Send + Sync {
    /// The `top_k` records nearest to `vector` by cosine similarity.
    async fn vector_query(&self, vector: &[f32], top_k: usize) -> Result<QueryResult>;

    /// The `top_k` records with the best keyword relevance for `text`.
    async fn keyword_query(&self, text: &str, top_k: usize) -> Result<QueryResult>;
}

/// Remove records from the index.
#[async_trait]
pub trait Delete: Send + Sync {
    /// Delete every record of `document_id`. Returns how many were removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;
}

/// A complete index backend.
#[async_trait]
pub trait IndexService: Upsert + Query + Delete {
    /// Short backend name for logs and errors.
    fn name(&self) -> &str;

    /// Create the index if it does not exist. No-op when it already does
    /// with the same dimensionality.
    async fn ensure_index(&self, dimensions: usize) -> Result<()>;

    /// Record and document counts plus the schema the index was built with.
    async fn stats(&self) -> Result<IndexStats>;

    /// Replace every record of `document_id` with `records`.
    ///
    /// The default deletes then upserts. Backends that can swap a
    /// document's records in one step should override it.
    async fn replace_document(&self, document_id: &str, records: &[IndexRecord]) -> Result<()> {
        self.delete_by_document(document_id).await?;
        self.upsert(records).await
    }
}
