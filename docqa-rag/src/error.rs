//! Error types for the `docqa-rag` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in retrieval and answer synthesis.
///
/// Indexing-path errors (`ConfigError`, `EmbeddingError`, `SchemaError`,
/// `ExtractionError`) abort only the document being processed. Query-path
/// errors are always surfaced to the caller, never turned into empty results.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid chunking, indexing, or retrieval parameters. Fatal until the
    /// configuration is fixed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Bad embedding input or a model failure.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
        /// Whether retrying the same call may succeed (e.g. a failed model load).
        transient: bool,
    },

    /// Vector dimensionality or embedding model version does not match the index.
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// The index service rejected or failed a request.
    #[error("Index error ({backend}): {message}")]
    IndexError {
        /// The index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
        /// Whether retrying the same call may succeed.
        transient: bool,
    },

    /// Invalid query input. Reported immediately, never retried.
    #[error("Query error: {0}")]
    QueryError(String),

    /// The language model call failed.
    #[error("Synthesis error ({model}): {message}")]
    SynthesisError {
        /// The language model that produced the error.
        model: String,
        /// A description of the failure.
        message: String,
        /// Rate limits, timeouts and server errors are transient; invalid
        /// requests are not.
        transient: bool,
    },

    /// An overall deadline expired. In-flight sub-operations were cancelled.
    #[error("Timed out after {}ms: {operation}", .elapsed.as_millis())]
    TimeoutError {
        /// The operation that exceeded its deadline.
        operation: String,
        /// The configured deadline.
        elapsed: Duration,
    },

    /// A raw document could not be turned into text.
    #[error("Extraction error ({file}): {message}")]
    ExtractionError {
        /// The file name of the document.
        file: String,
        /// A description of the failure.
        message: String,
    },

    /// An I/O error from a local document source.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Returns `true` if the failed operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::EmbeddingError { transient, .. }
            | RagError::IndexError { transient, .. }
            | RagError::SynthesisError { transient, .. } => *transient,
            RagError::TimeoutError { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn embedding(provider: &str, message: impl Into<String>) -> Self {
        RagError::EmbeddingError {
            provider: provider.to_string(),
            message: message.into(),
            transient: false,
        }
    }

    pub(crate) fn index(backend: &str, message: impl Into<String>) -> Self {
        RagError::IndexError { backend: backend.to_string(), message: message.into(), transient: false }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_flags_drive_retryability() {
        let transient = RagError::SynthesisError {
            model: "m".into(),
            message: "rate limited".into(),
            transient: true,
        };
        let permanent = RagError::SynthesisError {
            model: "m".into(),
            message: "bad request".into(),
            transient: false,
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!RagError::QueryError("empty".into()).is_retryable());
        assert!(!RagError::SchemaError("dims".into()).is_retryable());
    }

    #[test]
    fn timeout_message_reports_deadline() {
        let err = RagError::TimeoutError {
            operation: "hybrid search".into(),
            elapsed: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Timed out after 250ms: hybrid search");
    }
}
