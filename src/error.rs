//! Error taxonomy shared by every component.

use thiserror::Error;

use crate::domain::ResourceStatus;

/// Result alias used throughout the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while resolving content or managing resources
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid status transition: {from} → {to}")]
    InvalidTransition {
        from: ResourceStatus,
        to: ResourceStatus,
    },

    #[error("Storage quota exceeded: {required} bytes required, quota is {quota} bytes")]
    QuotaExceeded { required: u64, quota: u64 },

    #[error("Transfer cancelled")]
    Cancelled,
}

/// Coarse error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Connectivity,
    Storage,
    Parse,
}

impl Error {
    /// Map this error onto its category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::InvalidTransition { .. } => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Connectivity(_) | Error::Cancelled => ErrorKind::Connectivity,
            Error::Storage(_) | Error::Io(_) | Error::QuotaExceeded { .. } => ErrorKind::Storage,
            Error::Parse(_) | Error::Serialization(_) => ErrorKind::Parse,
        }
    }

    /// Wrap an IO error with the key or path it concerns
    pub fn storage(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Error::Storage(format!("{}: {}", context, err))
    }
}
