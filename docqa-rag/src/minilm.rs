//! Local transformer embeddings via `fastembed` (ONNX `all-MiniLM-L6-v2`).
//!
//! This module is only available when the `fastembed` feature is enabled.
//! Use it through [`LazyEmbeddingProvider`](crate::LazyEmbeddingProvider):
//! the model files are fetched and loaded on the first embedding call.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::debug;

use crate::embedding::{EmbeddingProvider, ModelLoader, ensure_embeddable};
use crate::error::{RagError, Result};

const MODEL_VERSION: &str = "sentence-transformers/all-MiniLM-L6-v2";
const DIMENSIONS: usize = 384;
/// Inputs longer than this many word pieces are truncated by the tokenizer.
const MAX_LENGTH: usize = 256;

/// [`ModelLoader`] for `all-MiniLM-L6-v2`.
#[derive(Debug, Clone, Default)]
pub struct FastEmbedLoader {
    cache_dir: Option<PathBuf>,
}

impl FastEmbedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store downloaded model files under `dir` instead of fastembed's default.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ModelLoader for FastEmbedLoader {
    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn model_version(&self) -> &str {
        MODEL_VERSION
    }

    async fn load(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_max_length(MAX_LENGTH)
            .with_show_download_progress(false);
        if let Some(dir) = &self.cache_dir {
            options = options.with_cache_dir(dir.clone());
        }

        let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
            .await
            .map_err(|e| RagError::embedding(MODEL_VERSION, format!("loader task failed: {e}")))?
            .map_err(|e| RagError::embedding(MODEL_VERSION, e.to_string()))?;

        Ok(Arc::new(FastEmbedProvider { model: Arc::new(model) }))
    }
}

/// A loaded `all-MiniLM-L6-v2` model. Inference runs on the blocking pool.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding(MODEL_VERSION, "model returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            ensure_embeddable(MODEL_VERSION, text)?;
        }

        debug!(model = MODEL_VERSION, batch_size = texts.len(), "embedding batch");
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let model = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || model.embed(owned, None))
            .await
            .map_err(|e| RagError::embedding(MODEL_VERSION, format!("inference task failed: {e}")))?
            .map_err(|e| RagError::embedding(MODEL_VERSION, e.to_string()))
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn model_version(&self) -> &str {
        MODEL_VERSION
    }
}
