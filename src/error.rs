//! Error taxonomy for the indexing and retrieval core.
//!
//! Library code returns [`DocsError`]; the `cursor-docs` binary converts to
//! `anyhow::Error` at the boundary. Each variant maps to a stable kind string
//! via [`DocsError::kind`] so front ends can branch on the condition without
//! matching on message text.
//!
//! | Kind | Raised when |
//! |------|-------------|
//! | `not_found` | Unknown source/chunk id or URL |
//! | `no_backend` | No storage backend is initialized |
//! | `network_error` | Fetch, redirect, or timeout failure |
//! | `decode_error` | Malformed JSON or row (always row-scoped) |
//! | `embedding_unavailable` | No embedding provider is reachable |
//! | `embedding_failed` | The provider answered but embedding failed |
//! | `semantic_unavailable` | Semantic-only search without a vector backend |

use crate::models::SourceStatus;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DocsError>;

#[derive(Debug, thiserror::Error)]
pub enum DocsError {
    /// Unknown source id, chunk id, or URL.
    #[error("not found: {0}")]
    NotFound(String),

    /// No storage backend has been initialized.
    #[error("no storage backend initialized")]
    NoBackend,

    /// HTTP fetch, redirect, or timeout failure.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed JSON or database row.
    #[error("decode error: {0}")]
    Decode(String),

    /// No embedding provider endpoint is reachable.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The embedding provider answered with an error or an unusable payload.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Semantic search was explicitly requested but no vector backend is active.
    #[error("semantic search unavailable: {0}")]
    SemanticUnavailable(String),

    /// Illegal source lifecycle transition.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SourceStatus,
        to: SourceStatus,
    },

    /// Extracted content was rejected by the content reviewer.
    #[error("content rejected for {url}: {reason}")]
    Rejected { url: String, reason: String },

    /// Caller supplied an unusable argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Primary store I/O failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Vector backend failure.
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal worker (e.g. the rate limiter) is not running.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DocsError {
    /// Stable, snake_case name of the error condition.
    pub fn kind(&self) -> &'static str {
        match self {
            DocsError::NotFound(_) => "not_found",
            DocsError::NoBackend => "no_backend",
            DocsError::Network(_) => "network_error",
            DocsError::Decode(_) => "decode_error",
            DocsError::EmbeddingUnavailable(_) => "embedding_unavailable",
            DocsError::EmbeddingFailed(_) => "embedding_failed",
            DocsError::SemanticUnavailable(_) => "semantic_unavailable",
            DocsError::InvalidTransition { .. } => "invalid_transition",
            DocsError::Rejected { .. } => "rejected",
            DocsError::InvalidInput(_) => "invalid_input",
            DocsError::Storage(_) => "storage_error",
            DocsError::VectorStore(_) => "vector_store_error",
            DocsError::Io(_) => "io_error",
            DocsError::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for DocsError {
    fn from(err: reqwest::Error) -> Self {
        DocsError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for DocsError {
    fn from(err: serde_json::Error) -> Self {
        DocsError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_taxonomy() {
        assert_eq!(DocsError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(DocsError::NoBackend.kind(), "no_backend");
        assert_eq!(
            DocsError::SemanticUnavailable("no vectors".into()).kind(),
            "semantic_unavailable"
        );
        assert_eq!(
            DocsError::EmbeddingFailed("bad".into()).kind(),
            "embedding_failed"
        );
    }

    #[test]
    fn json_errors_are_decode_errors() {
        let err: DocsError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "decode_error");
    }

    #[test]
    fn transition_message_names_both_states() {
        let err = DocsError::InvalidTransition {
            from: SourceStatus::Pending,
            to: SourceStatus::Indexed,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition: pending -> indexed"
        );
    }
}
