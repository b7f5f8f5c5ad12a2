use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker refused the connection. The only error `connect_with_retry` retries.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// The delivery was already settled or its lease expired and it was redelivered.
    #[error("Unknown delivery {0}")]
    UnknownDelivery(i64),

    #[error("Queue not declared: {0}")]
    UnknownQueue(String),

    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, QueueError::ConnectionRefused(_))
    }
}

#[cfg(feature = "queue-postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(ref io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                QueueError::ConnectionRefused(err.to_string())
            }
            // A lazily connected pool reports an unreachable server as an acquire timeout.
            sqlx::Error::PoolTimedOut => QueueError::ConnectionRefused(err.to_string()),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => {
                QueueError::Connection(err.to_string())
            }
            other => QueueError::Backend(other.to_string()),
        }
    }
}

impl From<QueueError> for tarpaulin_core::AppError {
    fn from(err: QueueError) -> Self {
        tarpaulin_core::AppError::Queue(err.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
