//! Error types for the Harbor storage node.
//!
//! This module provides a unified error type [`HarborError`] for all Harbor
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Input**: malformed content identifiers and unknown shard labels —
//!   always local, non-retriable caller errors
//! - **Persistence**: KV / blob / queue substrate failures — retried where
//!   retry is cheap (mover redelivery), surfaced otherwise
//! - **Processing**: transcode/transform failures — recorded as the job's
//!   terminal `Error` status, never retried automatically
//! - **Queue**: poison messages, including unknown job types rejected at
//!   deserialization — acknowledged and dropped so they never stall a
//!   consumer

use std::io;
use thiserror::Error;

/// Main error type for Harbor operations.
#[derive(Error, Debug)]
pub enum HarborError {
    // Input errors
    #[error("Invalid content id: {0}")]
    InvalidContentId(String),

    #[error("Unknown shard label: {0}")]
    UnknownShard(String),

    // Job pipeline errors
    #[error("Malformed queue message: {0}")]
    MalformedMessage(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    // Substrate errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stream closed: {0}")]
    StreamClosed(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarborError {
    /// Check if the error is worth retrying at the substrate level.
    ///
    /// Input and processing errors are never retriable; a retry would fail
    /// the same way. Persistence failures are transient by assumption.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarborError::Persistence(_) | HarborError::Io(_) | HarborError::StreamClosed(_)
        )
    }
}

/// Result type alias for Harbor operations.
pub type Result<T> = std::result::Result<T, HarborError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(HarborError::Persistence("kv put failed".into()).is_retryable());
        assert!(!HarborError::InvalidContentId("short".into()).is_retryable());
        assert!(!HarborError::Processing("codec exploded".into()).is_retryable());
    }
}
