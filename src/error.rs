//! Error types
//!
//! Faults never travel from a subscriber back to the producer, so the only
//! errors surfaced to callers are lifecycle rejections.

/// Error type for forwarder operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    /// The forwarder was closed; the operation was rejected
    #[error("forwarder closed: {0}")]
    Closed(String),

    /// No forwarder with this id is managed
    #[error("forwarder not found: {0}")]
    ForwarderNotFound(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ForwardError>;
