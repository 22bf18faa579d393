use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("concurrent update on {key} not resolved after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },
    #[error("attempt {0} is already completed")]
    AlreadyCompleted(String),
    #[error("belief store unavailable: {0}")]
    Upstream(#[from] sqlx::Error),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Transient failures the caller should retry instead of dropping evidence.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict { .. } | EngineError::Upstream(_))
    }
}
