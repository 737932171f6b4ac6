use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NasError>;

#[derive(Error, Debug)]
pub enum NasError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ring load error: {0}")]
    RingLoad(String),

    #[error("Invalid name component \"{component}\": {reason}")]
    InvalidName { component: String, reason: String },

    #[error("Path component exists as a file: {0}")]
    ExistsAsFile(PathBuf),

    #[error("Path exists as a directory: {0}")]
    ExistsAsDir(PathBuf),

    #[error("Directory is not empty: {0}")]
    DirectoryNotEmpty(PathBuf),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Backing store unavailable: {0}")]
    BackingStoreUnavailable(String),

    #[error("ETag mismatch: expected {expected}, got {actual}")]
    EtagMismatch { expected: String, actual: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NasError {
    pub fn invalid_name(component: &str, reason: impl Into<String>) -> Self {
        NasError::InvalidName {
            component: component.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the name-collision family surfaced to clients as a conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            NasError::ExistsAsFile(_) | NasError::ExistsAsDir(_) | NasError::DirectoryNotEmpty(_)
        )
    }
}
