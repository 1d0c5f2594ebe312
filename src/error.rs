use thiserror::Error;

/// Failures from the record and student store.
///
/// Each variant maps to a stable IPC error code through [`StoreError::code`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },
    #[error("{0} already exists")]
    Conflict(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        StoreError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Validation { .. } => "validation_failed",
            StoreError::Conflict(_) => "conflict",
            StoreError::Db(_) => "db_query_failed",
            StoreError::Io(_) => "io_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            StoreError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
