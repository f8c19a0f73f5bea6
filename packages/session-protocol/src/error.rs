//! Decoding errors for wire payloads.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event content that cannot be decoded into a known shape.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("unknown scope kind: {0}")]
    UnknownScopeKind(String),
}
