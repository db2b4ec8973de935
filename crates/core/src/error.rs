use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing authorization: {0}")]
    Unauthorized(String),

    #[error("Transient dependency error: {0}")]
    Transient(String),

    #[error("Rate limited by dependency: {0}")]
    RateLimited(String),

    #[error("Circuit open for dependency: {0}")]
    CircuitOpen(String),

    #[error("Creative generation error: {0}")]
    Generation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Creative swap failed: {0}")]
    Swap(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the retry layer may attempt this operation again.
    ///
    /// Only transient network/server failures and explicit rate-limit
    /// signals qualify. `CircuitOpen` is non-retryable: an open breaker
    /// fails the whole call immediately rather than consuming the retry
    /// budget against a dependency already known to be down.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_) | EngineError::RateLimited(_))
    }
}
