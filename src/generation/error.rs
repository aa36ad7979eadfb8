//! Failures of the text-generation collaborator.

use thiserror::Error;

/// Errors returned by a [`TextGenerator`](super::TextGenerator).
///
/// Every variant fails the current activity attempt; the activity policy
/// decides whether another attempt is made.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The endpoint answered HTTP 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other non-success HTTP status.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The response carried no text block.
    #[error("empty completion")]
    EmptyCompletion,

    /// Transport failure (DNS, refused connection, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}
