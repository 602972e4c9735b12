//! Configuration for the retrieval pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::validate_chunking;
use crate::error::{RagError, Result};

/// Configuration parameters for the retrieval pipeline.
///
/// Construct once at startup with [`RagConfig::builder()`] and pass it
/// down; nothing below the pipeline reads the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunks whose trimmed text is shorter than this are not indexed (0 = keep all).
    pub min_chunk_chars: usize,
    /// Default number of results to retrieve.
    pub top_k: usize,
    /// Weight of the normalized vector score in hybrid mode.
    pub vector_weight: f32,
    /// Weight of the normalized keyword score in hybrid mode.
    pub keyword_weight: f32,
    /// Upper bound on the context handed to the language model, in characters.
    pub max_context_chars: usize,
    /// Overall deadline for one search, in milliseconds.
    pub query_timeout_ms: u64,
    /// Documents indexed concurrently by a batch run.
    pub index_concurrency: usize,
    /// Language model attempts per answer, including the first.
    pub synthesis_max_attempts: u32,
    /// Delay before the first synthesis retry, in milliseconds. Doubles per attempt.
    pub synthesis_backoff_ms: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_chars: 0,
            top_k: 4,
            vector_weight: 0.5,
            keyword_weight: 0.5,
            max_context_chars: 12_000,
            query_timeout_ms: 30_000,
            index_concurrency: 4,
            synthesis_max_attempts: 3,
            synthesis_backoff_ms: 500,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Overall deadline for one search.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Delay before the first synthesis retry.
    pub fn synthesis_backoff(&self) -> Duration {
        Duration::from_millis(self.synthesis_backoff_ms)
    }

    /// Re-check every invariant, e.g. after deserializing a config file.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        if self.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        let weights_valid = self.vector_weight.is_finite()
            && self.keyword_weight.is_finite()
            && self.vector_weight >= 0.0
            && self.keyword_weight >= 0.0
            && self.vector_weight + self.keyword_weight > 0.0;
        if !weights_valid {
            return Err(RagError::ConfigError(format!(
                "hybrid weights must be non-negative with a positive sum (vector {}, keyword {})",
                self.vector_weight, self.keyword_weight
            )));
        }
        if self.max_context_chars == 0 {
            return Err(RagError::ConfigError(
                "max_context_chars must be greater than zero".to_string(),
            ));
        }
        if self.query_timeout_ms == 0 {
            return Err(RagError::ConfigError("query_timeout must be greater than zero".to_string()));
        }
        if self.index_concurrency == 0 {
            return Err(RagError::ConfigError(
                "index_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.synthesis_max_attempts == 0 {
            return Err(RagError::ConfigError(
                "synthesis_max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON config file body. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the JSON is malformed or invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RagConfig = serde_json::from_str(json)
            .map_err(|e| RagError::ConfigError(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Drop chunks shorter than `chars` (after trimming) at index time.
    pub fn min_chunk_chars(mut self, chars: usize) -> Self {
        self.config.min_chunk_chars = chars;
        self
    }

    /// Set the default number of results to retrieve.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the hybrid merge weights.
    pub fn hybrid_weights(mut self, vector: f32, keyword: f32) -> Self {
        self.config.vector_weight = vector;
        self.config.keyword_weight = keyword;
        self
    }

    /// Set the context budget for answer synthesis.
    pub fn max_context_chars(mut self, chars: usize) -> Self {
        self.config.max_context_chars = chars;
        self
    }

    /// Set the overall deadline for one search.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.query_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set how many documents a batch run indexes concurrently.
    pub fn index_concurrency(mut self, workers: usize) -> Self {
        self.config.index_concurrency = workers;
        self
    }

    /// Set the language model attempt budget and the initial backoff.
    pub fn synthesis_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.config.synthesis_max_attempts = max_attempts;
        self.config.synthesis_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - a hybrid weight is negative or both are zero
    /// - any budget, timeout, or worker count is zero
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::builder().build().unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_invalid_parameters() {
        let cases = [
            RagConfig::builder().chunk_size(100).chunk_overlap(100),
            RagConfig::builder().top_k(0),
            RagConfig::builder().hybrid_weights(0.0, 0.0),
            RagConfig::builder().hybrid_weights(-0.5, 1.0),
            RagConfig::builder().max_context_chars(0),
            RagConfig::builder().query_timeout(Duration::ZERO),
            RagConfig::builder().index_concurrency(0),
            RagConfig::builder().synthesis_retry(0, Duration::from_millis(1)),
        ];
        for builder in cases {
            assert!(matches!(builder.build(), Err(RagError::ConfigError(_))));
        }
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = RagConfig::from_json(r#"{ "chunk_size": 400, "chunk_overlap": 50 }"#).unwrap();
        assert_eq!(config.chunk_size, 400);
        assert_eq!(config.top_k, RagConfig::default().top_k);

        let invalid = RagConfig::from_json(r#"{ "chunk_size": 10, "chunk_overlap": 20 }"#);
        assert!(matches!(invalid, Err(RagError::ConfigError(_))));
    }
}
