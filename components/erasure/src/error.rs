use std::time::Duration;

use model::error::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EcError {
    #[error("Invalid redundancy scheme: {0}")]
    InvalidScheme(String),

    #[error("{available} available pieces < {required} required")]
    Irreparable { available: usize, required: usize },

    #[error("Erasure coding failed: {0}")]
    Codec(String),

    #[error("Expected {expected} order limits, got {actual}")]
    LimitsMismatch { expected: usize, actual: usize },

    #[error("Uploads to all {0} nodes failed")]
    AllUploadsFailed(usize),

    #[error("Transfer did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Transfer was cancelled")]
    Cancelled,
}

impl From<reed_solomon_erasure::Error> for EcError {
    fn from(e: reed_solomon_erasure::Error) -> Self {
        EcError::Codec(e.to_string())
    }
}

/// Why a transfer with a single node was given up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureCause {
    #[error("node did not answer in time")]
    Timeout,

    #[error("node failed: {0}")]
    Node(#[from] ServiceError),

    #[error("piece has {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("piece hash mismatch")]
    HashMismatch,
}

impl FailureCause {
    /// The node answered, but with bytes that are not the piece it was asked for.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            FailureCause::SizeMismatch { .. } | FailureCause::HashMismatch
        )
    }
}
