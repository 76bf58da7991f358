use thiserror::Error;

#[derive(Error, Debug)]
pub enum NeuroGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NeuroGraphError {
    /// Whether the retry layer should re-attempt the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NeuroGraphError::Throttled(_) | NeuroGraphError::Transient(_)
        )
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, NeuroGraphError::Throttled(_))
    }

    /// Permanent backend failures flip the store into degraded read-only mode.
    pub fn is_permanent_storage_failure(&self) -> bool {
        matches!(self, NeuroGraphError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, NeuroGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(NeuroGraphError::Throttled("429".into()).is_retryable());
        assert!(NeuroGraphError::Transient("conn reset".into()).is_retryable());
        assert!(!NeuroGraphError::NotFound("x".into()).is_retryable());
        assert!(!NeuroGraphError::Cancelled.is_retryable());
    }
}
