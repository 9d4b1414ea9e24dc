//! Engine error kinds
//!
//! One variant per failure class the transport can surface. The HTTP status
//! mapping lives with `api::error::ApiError`; event streams carry the wire
//! string from `kind()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefineError {
    /// Malformed request or empty query. Never persisted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Every analyzer invocation failed after retries.
    #[error("all analyzers failed: {0}")]
    UpstreamUnavailable(String),

    /// Whole-request deadline exceeded.
    #[error("request deadline exceeded")]
    Timeout,

    /// The memory store rejected the commit.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Caller-induced cancellation.
    #[error("request cancelled")]
    Cancelled,

    /// Any uncategorized fault. Details go to logs, not clients.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RefineError {
    /// Wire string used in `error{kind}` events and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RefineError::InvalidInput(_) => "invalid_input",
            RefineError::UpstreamUnavailable(_) => "upstream_unavailable",
            RefineError::Timeout => "timeout",
            RefineError::Storage(_) => "storage",
            RefineError::Cancelled => "cancelled",
            RefineError::Internal(_) => "internal",
        }
    }
}
