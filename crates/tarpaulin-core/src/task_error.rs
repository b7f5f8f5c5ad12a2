//! Task execution error types
//!
//! Background work (the resize pipeline) reports failures as either retryable,
//! meaning a later delivery of the same message may succeed, or permanent, meaning
//! the message can never be processed and must not be retried.

/// Failure of one unit of background work.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Transient failure: storage or database unavailable, timeouts.
    #[error("{0}")]
    Retryable(#[source] anyhow::Error),

    /// Failure that will not change on retry: undecodable input, missing original,
    /// malformed message.
    #[error("{0}")]
    Permanent(#[source] anyhow::Error),
}

impl TaskError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Retryable(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Permanent(err.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_))
    }

    pub fn inner(&self) -> &anyhow::Error {
        match self {
            TaskError::Retryable(e) | TaskError::Permanent(e) => e,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    /// Unclassified errors are treated as transient.
    fn from(err: anyhow::Error) -> Self {
        TaskError::Retryable(err)
    }
}

/// Extension trait to classify a `Result` error in place.
pub trait TaskResultExt<T> {
    fn permanent(self) -> Result<T, TaskError>;
    fn retryable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn permanent(self) -> Result<T, TaskError> {
        self.map_err(TaskError::permanent)
    }

    fn retryable(self) -> Result<T, TaskError> {
        self.map_err(TaskError::retryable)
    }
}
