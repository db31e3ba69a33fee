use thiserror::Error;

/// Failures surfaced by the store facade and its collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such document")]
    NotFound,
    #[error("document `{path}` already exists")]
    AlreadyExists { path: String },
    #[error("invalid identity: {message}")]
    InvalidIdentity { message: String },
    #[error("malformed cursor: {0}")]
    MalformedCursor(String),
    #[error("batch returned {actual} items but {expected} were requested")]
    InconsistentBatchResult { expected: usize, actual: usize },
    #[error("`{operation}` is not supported in this context")]
    Unsupported { operation: &'static str },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn invalid_identity(message: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            message: message.into(),
        }
    }

    pub fn malformed_cursor(message: impl std::fmt::Display) -> Self {
        Self::MalformedCursor(message.to_string())
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Returns true when the error means "nothing stored at that key".
pub fn is_not_found(err: &StoreError) -> bool {
    err.is_not_found()
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
