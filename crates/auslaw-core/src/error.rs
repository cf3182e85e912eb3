//! Retrieval error taxonomy.
//!
//! Callers distinguish "the query was bad" (never retry, never call out)
//! from "the store or embedding call failed" (retry once, then degrade to
//! an explicit no-citation answer).

/// Errors surfaced by the hybrid retrieval path.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Empty or malformed input; rejected before any external call.
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// The chunk store or embedding provider failed or timed out.
    #[error("retrieval unavailable: {reason}")]
    RetrievalUnavailable { reason: String },
}

impl RetrievalError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        RetrievalError::InvalidQuery {
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        RetrievalError::RetrievalUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the call once before degrading.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetrievalError::RetrievalUnavailable { .. })
    }
}
