use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or failed.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The precondition attached to a conditional write did not hold at write time.
    #[error("conditional write `{operation}` rejected for session `{code}`")]
    Conflict {
        operation: &'static str,
        code: String,
    },
    /// The targeted session does not exist.
    #[error("session `{code}` not found")]
    NotFound { code: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a conflict for a rejected conditional write.
    pub fn conflict(operation: &'static str, code: impl Into<String>) -> Self {
        StorageError::Conflict {
            operation,
            code: code.into(),
        }
    }

    /// Construct a not-found error for a missing session.
    pub fn not_found(code: impl Into<String>) -> Self {
        StorageError::NotFound { code: code.into() }
    }

    /// Whether this error reports a lost conditional-write race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}
