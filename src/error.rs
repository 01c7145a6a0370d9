//! Store Errors
//!
//! Typed failure kinds surfaced by every store operation.

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The caller passed an unusable argument, such as an empty key.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `store` was called with a key that is already present.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// The key or partition is not present.
    #[error("does not exist: {0}")]
    DoesNotExist(String),

    /// The backend failed: I/O, corrupted index, missing file or serialization.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Store settings are inconsistent or out of range.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    pub(crate) fn empty_key() -> Self {
        Self::InvalidArgument("key must not be empty".to_string())
    }

    pub(crate) fn missing_key(key: &str) -> Self {
        Self::DoesNotExist(format!("key '{}'", key))
    }

    pub(crate) fn missing_partition(partition: &str) -> Self {
        Self::DoesNotExist(format!("partition '{}'", partition))
    }

    /// True for the kinds a caller can recover from by changing its input.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::AlreadyExists(_) | Self::DoesNotExist(_)
        )
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(format!("I/O error: {}", err))
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        Self::StoreUnavailable(format!("serialization error: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::StoreUnavailable(format!("serialization error: {}", err))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
