//! Embedding provider trait and the lazily loaded model handle.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations must be deterministic for a given
/// [`model_version`](EmbeddingProvider::model_version): identical text yields
/// identical vectors. Empty or whitespace-only input is rejected with
/// [`RagError::EmbeddingError`]; input longer than the model's limit is
/// truncated deterministically, never rejected.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::EmbeddingProvider;
///
/// let provider = HashingEmbeddingProvider::default();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// Output order matches input order, one vector per input. The default
    /// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
    /// backends with native batching should override it.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier of the model that produces the vectors, stored with every
    /// index record to detect mixed-model indexes.
    fn model_version(&self) -> &str;
}

/// Reject empty or whitespace-only embedding input.
pub(crate) fn ensure_embeddable(provider: &str, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(RagError::embedding(provider, "cannot embed empty or whitespace-only text"));
    }
    Ok(())
}

/// Loads an embedding model artifact. Used through [`LazyEmbeddingProvider`].
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Dimensionality of the model, known before loading.
    fn dimensions(&self) -> usize;

    /// Version identifier of the model, known before loading.
    fn model_version(&self) -> &str;

    /// Load the model. May download or read large files.
    async fn load(&self) -> Result<Arc<dyn EmbeddingProvider>>;
}

/// An embedding handle that loads its model on first use.
///
/// The load runs at most once per handle; concurrent first callers wait on
/// the same initialization. A failed load leaves the handle empty, so the
/// next call retries it. Share one handle per process behind an `Arc`.
pub struct LazyEmbeddingProvider {
    loader: Box<dyn ModelLoader>,
    model: OnceCell<Arc<dyn EmbeddingProvider>>,
}

impl LazyEmbeddingProvider {
    /// Wrap a loader. Nothing is loaded until the first embedding call.
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self { loader: Box::new(loader), model: OnceCell::new() }
    }

    /// Whether the model has been loaded successfully.
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Return the loaded model, loading it if needed.
    ///
    /// # Errors
    ///
    /// Returns a transient [`RagError::EmbeddingError`] if the load fails.
    pub async fn model(&self) -> Result<&Arc<dyn EmbeddingProvider>> {
        self.model
            .get_or_try_init(|| async {
                let version = self.loader.model_version();
                info!(model = version, "loading embedding model");

                let model = self.loader.load().await.map_err(|e| {
                    error!(model = version, error = %e, "embedding model load failed");
                    RagError::EmbeddingError {
                        provider: version.to_string(),
                        message: format!("model load failed: {e}"),
                        transient: true,
                    }
                })?;

                if model.dimensions() != self.loader.dimensions() {
                    return Err(RagError::embedding(
                        version,
                        format!(
                            "loaded model produces {} dimensions, expected {}",
                            model.dimensions(),
                            self.loader.dimensions()
                        ),
                    ));
                }

                debug!(model = version, dimensions = model.dimensions(), "embedding model ready");
                Ok(model)
            })
            .await
    }
}

#[async_trait]
impl EmbeddingProvider for LazyEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        ensure_embeddable(self.loader.model_version(), text)?;
        self.model().await?.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.model().await?.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.loader.dimensions()
    }

    fn model_version(&self) -> &str {
        self.loader.model_version()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::hashing::HashingEmbeddingProvider;

    struct FlakyLoader {
        attempts: Arc<AtomicUsize>,
        fail_first: usize,
    }

    #[async_trait]
    impl ModelLoader for FlakyLoader {
        fn dimensions(&self) -> usize {
            32
        }

        fn model_version(&self) -> &str {
            "flaky-v1"
        }

        async fn load(&self) -> Result<Arc<dyn EmbeddingProvider>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(RagError::embedding("flaky-v1", "artifact not reachable"));
            }
            Ok(Arc::new(HashingEmbeddingProvider::new(32)))
        }
    }

    #[tokio::test]
    async fn loads_once_and_retries_after_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let lazy = LazyEmbeddingProvider::new(FlakyLoader { attempts: attempts.clone(), fail_first: 1 });
        assert!(!lazy.is_loaded());

        let err = lazy.embed("hello").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!lazy.is_loaded());

        let first = lazy.embed("hello").await.unwrap();
        let second = lazy.embed("hello").await.unwrap();
        assert_eq!(first, second);
        assert!(lazy.is_loaded());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejects_blank_input_without_loading() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let lazy = LazyEmbeddingProvider::new(FlakyLoader { attempts: attempts.clone(), fail_first: 0 });

        let err = lazy.embed("   \n").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingError { transient: false, .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
