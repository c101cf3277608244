use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine before any simulation work starts.
///
/// Running out of money is never an error; it is recorded in the results.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("cannot build return distribution: {0}")]
    Distribution(String),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Field name for validation errors, `None` otherwise.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            Self::Distribution(_) => None,
        }
    }
}

pub(crate) fn ensure(condition: bool, field: &str, message: &str) -> EngineResult<()> {
    if condition {
        Ok(())
    } else {
        Err(EngineError::validation(field, message))
    }
}

pub(crate) fn ensure_finite(value: f64, field: &str) -> EngineResult<()> {
    ensure(value.is_finite(), field, "must be a finite number")
}
