//! # docqa-rag
//!
//! Retrieval-augmented question answering over a personal document
//! collection.
//!
//! ## Overview
//!
//! Documents are split into overlapping character chunks, embedded, and
//! written to an index that supports both vector and keyword search. A
//! question is answered by searching the index (vector, keyword, or a
//! normalized hybrid of both), packing the best chunks into a bounded
//! context, and asking a language model for an answer grounded in it.
//!
//! - [`RagPipeline`] - the entry point, built once and shared
//! - [`Indexer`] - chunk → embed → index, per-document isolation
//! - [`Retriever`] - vector, keyword and hybrid search under a deadline
//! - [`Synthesizer`] - context assembly and model calls with retry
//! - [`InMemoryIndex`] - HNSW + BM25 index held in process
//!
//! ## Features
//!
//! | Feature | Adds |
//! |---------|------|
//! | `openai` | [`OpenAIEmbeddingProvider`](openai::OpenAIEmbeddingProvider) |
//! | `fastembed` | local `all-MiniLM-L6-v2` via [`FastEmbedLoader`](minilm::FastEmbedLoader) |
//! | `anthropic` | [`AnthropicModel`](anthropic::AnthropicModel) |
//! | `azure` | [`AzureSearchIndex`](index::azure::AzureSearchIndex) |
//! | `pdf` | PDF text extraction |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_rag::{
//!     Document, HashingEmbeddingProvider, InMemoryIndex, MockLanguageModel, RagConfig, RagPipeline,
//! };
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .index(Arc::new(InMemoryIndex::new()))
//!     .language_model(Arc::new(MockLanguageModel::new("...")))
//!     .build()?;
//!
//! pipeline.create_index().await?;
//! pipeline.ingest(&Document::from_text("pets.txt", "Chunk A about cats.")).await?;
//! let answer = pipeline.answer_question("cats", "keyword", 4).await?;
//! ```

#[cfg(feature = "anthropic")]
pub mod anthropic;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod hashing;
pub mod index;
pub mod indexer;
#[cfg(feature = "fastembed")]
pub mod minilm;
pub mod mock;
#[cfg(feature = "openai")]
pub mod openai;
pub mod pipeline;
pub mod retriever;
pub mod source;
pub mod synthesis;
pub mod text;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicModel;
pub use chunking::{Chunker, FixedSizeChunker, chunk};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{
    AnswerResponse, Chunk, Document, EmbeddedChunk, IndexRecord, IndexStats, Page, Passage,
    QueryResult, ScoredRecord, document_key,
};
pub use embedding::{EmbeddingProvider, LazyEmbeddingProvider, ModelLoader};
pub use error::{RagError, Result};
pub use extract::extract_document;
pub use hashing::HashingEmbeddingProvider;
#[cfg(feature = "azure")]
pub use index::azure::AzureSearchIndex;
pub use index::{Delete, InMemoryIndex, IndexService, Query, Upsert};
pub use indexer::{DocumentOutcome, IndexReport, Indexer};
#[cfg(feature = "fastembed")]
pub use minilm::{FastEmbedLoader, FastEmbedProvider};
pub use mock::MockLanguageModel;
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
pub use pipeline::{RagPipeline, RagPipelineBuilder};
pub use retriever::{Retriever, SearchMode, merge_hybrid};
pub use source::{BlobStore, DirectoryStore};
pub use synthesis::{LanguageModel, Synthesizer};
