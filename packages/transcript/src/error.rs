//! Error types for the session client.

use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response from the server
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        retryable: bool,
    },

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),

    /// The submission was cancelled before a response arrived
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether resubmitting the same request may succeed.
    ///
    /// Submissions carry a `realId`, so resending after a network failure
    /// never produces a second event.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Api { retryable, .. } => *retryable,
            ClientError::Parse(_) | ClientError::Cancelled => false,
        }
    }
}
