use thiserror::Error;

pub type EngageResult<T> = Result<T, EngageError>;

#[derive(Error, Debug)]
pub enum EngageError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngageError {
    /// Backing-store failures are the only errors a caller may retry.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, EngageError::StoreUnavailable(_) | EngageError::Timeout(_))
    }
}
