use thiserror::Error;

/// Failures of the query and mutation layers.
#[derive(Debug, Error)]
pub enum BlogError {
    /// A submitted field was rejected; the form is shown again.
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    /// The actor may not perform the action; nothing was changed.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BlogError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        BlogError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn required(field: &'static str) -> Self {
        BlogError::validation(field, "This field is required.")
    }
}

pub type BlogResult<T> = Result<T, BlogError>;
