use std::time::Duration;

use erasure::EcError;
use model::{error::ServiceError, OrderAction};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("Failed to fetch segment pointer: {0}")]
    MetadataFetch(#[source] ServiceError),

    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    #[error("Node directory query failed: {0}")]
    DirectoryQuery(#[source] ServiceError),

    #[error("Could not create {action:?} order limits: {source}")]
    Authorization {
        action: OrderAction,
        #[source]
        source: ServiceError,
    },

    #[error("Segment could not be reconstructed: {0}")]
    Reconstruction(#[source] EcError),

    #[error("Failed to upload repaired pieces: {0}")]
    Upload(#[source] EcError),

    #[error("Failed to commit repaired pieces: {0}")]
    Commit(#[source] ServiceError),

    #[error("Repair was cancelled")]
    Cancelled,

    #[error("Repair did not complete within {0:?}")]
    Timeout(Duration),
}

impl RepairError {
    /// Transient errors reflect infrastructure trouble; the segment is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            RepairError::MetadataFetch(_)
            | RepairError::DirectoryQuery(_)
            | RepairError::Authorization { .. }
            | RepairError::Upload(_)
            | RepairError::Commit(_)
            | RepairError::Cancelled
            | RepairError::Timeout(_) => true,
            RepairError::InvalidSegment(_) | RepairError::Reconstruction(_) => false,
        }
    }
}
