//! Local feature-hashing embedder.
//!
//! Needs no model download and no network: every term, adjacent term pair,
//! and character trigram is hashed into a signed bucket, and the result is
//! L2-normalized so cosine similarity reduces to a dot product. Lexical
//! rather than semantic, but fully deterministic across processes.

use async_trait::async_trait;
use tracing::debug;

use crate::embedding::{EmbeddingProvider, ensure_embeddable};
use crate::error::Result;
use crate::text::{stable_hash, tokenize};

/// Dimensionality of `all-MiniLM-L6-v2`, kept as the default so indexes can
/// switch between local and transformer embeddings without a schema change.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Input beyond this many terms is ignored.
pub const DEFAULT_MAX_TOKENS: usize = 256;

const TERM_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;
const TRIGRAM_WEIGHT: f32 = 0.25;

/// A deterministic [`EmbeddingProvider`] built on feature hashing.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
    max_tokens: usize,
    model_version: String,
}

impl HashingEmbeddingProvider {
    /// Create a provider producing `dimensions`-wide vectors.
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            max_tokens: DEFAULT_MAX_TOKENS,
            model_version: format!("feature-hash-v1-{dimensions}"),
        }
    }

    /// Change the truncation limit (in terms).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = stable_hash(feature.as_bytes());
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut tokens = tokenize(text);
        if tokens.len() > self.max_tokens {
            debug!(
                model = %self.model_version,
                tokens = tokens.len(),
                limit = self.max_tokens,
                "truncating embedding input"
            );
            tokens.truncate(self.max_tokens);
        }

        let mut vector = vec![0.0f32; self.dimensions];

        if tokens.is_empty() {
            // Only stopwords or punctuation: fall back to the literal text.
            self.add_feature(&mut vector, &text.trim().to_lowercase(), TERM_WEIGHT);
        }

        for token in &tokens {
            self.add_feature(&mut vector, &format!("t:{token}"), TERM_WEIGHT);

            let padded: Vec<char> = format!("#{token}#").chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, &format!("c:{trigram}"), TRIGRAM_WEIGHT);
            }
        }

        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("b:{} {}", pair[0], pair[1]), BIGRAM_WEIGHT);
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        ensure_embeddable(&self.model_version, text)?;
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            ensure_embeddable(&self.model_version, text)?;
        }
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn vectors_are_normalized_and_sized() {
        let provider = HashingEmbeddingProvider::new(64);
        let v = provider.embed("Rust ownership and borrowing").await.unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(provider.model_version(), "feature-hash-v1-64");
    }

    #[tokio::test]
    async fn related_text_scores_higher() {
        let provider = HashingEmbeddingProvider::default();
        let query = provider.embed("what did I write about cats").await.unwrap();
        let cats = provider.embed("My cats sleep all afternoon.").await.unwrap();
        let tax = provider.embed("Quarterly tax filing deadlines.").await.unwrap();
        assert!(cosine(&query, &cats) > cosine(&query, &tax));
    }

    #[tokio::test]
    async fn truncation_is_deterministic() {
        let provider = HashingEmbeddingProvider::new(32).with_max_tokens(3);
        let a = provider.embed("alpha beta gamma delta").await.unwrap();
        let b = provider.embed("alpha beta gamma epsilon zeta").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn batch_matches_single_and_rejects_blank() {
        let provider = HashingEmbeddingProvider::new(16);
        let batch = provider.embed_batch(&["one", "two"]).await.unwrap();
        assert_eq!(batch[0], provider.embed("one").await.unwrap());
        assert_eq!(batch[1], provider.embed("two").await.unwrap());

        let err = provider.embed_batch(&["ok", " "]).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingError { .. }));
    }
}
