//! Data types for documents, chunks, index records, and query results.

use serde::{Deserialize, Serialize};

use crate::text::stable_hash;

/// One page of extracted document text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    /// The raw extracted text of the page.
    pub text: String,
}

/// A source document: a file name plus its pages in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    /// Unique identifier for the document (its file name).
    pub id: String,
    /// Pages in reading order.
    pub pages: Vec<Page>,
}

impl Document {
    /// Create a document from its pages.
    pub fn new(id: impl Into<String>, pages: Vec<Page>) -> Self {
        Self { id: id.into(), pages }
    }

    /// Create a single-page document.
    pub fn from_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, vec![Page { number: 1, text: text.into() }])
    }
}

/// A bounded, contiguous slice of one page of a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// `<document key>_<sequence>`, see [`document_key`].
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Page the chunk was cut from.
    pub page: u32,
    /// Position of the chunk within the whole document, continuing across pages.
    pub sequence: u32,
    /// Character offset of the chunk's first character within its page.
    pub overlap_offset: usize,
    /// The text content of the chunk.
    pub text: String,
}

/// A [`Chunk`] with its dense vector and the model version that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub model_version: String,
}

/// A searchable record in the index service.
///
/// Field names follow the index schema: `chunk_id` is the primary key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub page: u32,
    pub sequence: u32,
    pub text: String,
    pub vector: Vec<f32>,
    pub embedding_model_version: String,
}

impl From<EmbeddedChunk> for IndexRecord {
    fn from(embedded: EmbeddedChunk) -> Self {
        let EmbeddedChunk { chunk, vector, model_version } = embedded;
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            page: chunk.page,
            sequence: chunk.sequence,
            text: chunk.text,
            vector,
            embedding_model_version: model_version,
        }
    }
}

/// An [`IndexRecord`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// The retrieved record.
    pub record: IndexRecord,
    /// Relevance score (higher is more relevant).
    pub score: f32,
}

/// Ranked search results: unique by `chunk_id`, ordered by descending score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub matches: Vec<ScoredRecord>,
}

impl QueryResult {
    pub fn new(matches: Vec<ScoredRecord>) -> Self {
        Self { matches }
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredRecord> {
        self.matches.iter()
    }
}

/// A chunk that was placed in the synthesis context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    pub document_id: String,
    pub page: u32,
    pub score: f32,
    pub text: String,
}

/// A synthesized, source-attributed answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerResponse {
    /// The language model's answer, or a fixed notice when nothing matched.
    pub answer: String,
    /// Distinct source documents of the chunks used, in context order.
    pub sources: Vec<String>,
    /// Number of chunks placed in the context.
    pub chunks_used: usize,
    /// The chunks placed in the context.
    pub passages: Vec<Passage>,
}

/// Index-wide counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub record_count: usize,
    pub distinct_document_count: usize,
    /// Vector dimensionality, once known.
    pub dimensions: Option<usize>,
    /// Embedding model the stored vectors came from, once known.
    pub embedding_model_version: Option<String>,
}

/// Turn a file name into a key-safe identifier.
///
/// Strips a trailing extension, replaces every run of characters outside
/// `[A-Za-z0-9_-]` with a single `_`, and trims leading/trailing underscores.
pub fn sanitize_key(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= 4 => stem,
        _ => name,
    };

    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() { "doc".to_string() } else { trimmed.to_string() }
}

/// Chunk-id prefix for a document: its sanitized name plus a hash of the
/// full id, so `notes.pdf` and `notes.md` never share chunk ids.
pub fn document_key(document_id: &str) -> String {
    let digest = stable_hash(document_id.as_bytes());
    format!("{}-{:08x}", sanitize_key(document_id), (digest >> 32) as u32 ^ digest as u32)
}
