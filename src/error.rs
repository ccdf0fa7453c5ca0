use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Wrap a storage-layer failure.
    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        MonitorError::StorageUnavailable(err.to_string())
    }

    /// Whether the failure came from the persistence layer and is worth retrying.
    pub fn is_storage(&self) -> bool {
        matches!(self, MonitorError::StorageUnavailable(_) | MonitorError::Io(_))
    }
}
