use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("Invalid redundancy scheme: {0}")]
    InvalidRedundancy(String),

    #[error("No bucket component in path `{0}`")]
    NoBucketComponent(String),
}

/// Failure reported by an external collaborator: the metadata store, the node
/// directory, the authorization service or a storage node.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("Resource is not found")]
    NotFound,

    #[error("Request timed out")]
    Timeout,

    #[error("Service is unavailable: {0}")]
    Unavailable(String),

    #[error("Request was rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::Rejected(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
