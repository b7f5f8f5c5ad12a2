use crate::memory::MemoryChannel;
#[cfg(feature = "queue-postgres")]
use crate::postgres::PgChannel;
use crate::{MessageChannel, QueueBackend, QueueError, QueueResult};
use std::sync::Arc;
use tarpaulin_core::Config;

#[cfg(feature = "queue-postgres")]
pub type Pool = sqlx::PgPool;
#[cfg(not(feature = "queue-postgres"))]
pub type Pool = ();

/// Create a message channel based on configuration.
///
/// The memory backend only connects producers and consumers in the same process.
pub fn create_channel(config: &Config, pool: Option<Pool>) -> QueueResult<Arc<dyn MessageChannel>> {
    match config.queue_backend() {
        QueueBackend::Memory => {
            tracing::info!("Using in-memory message channel");
            Ok(Arc::new(MemoryChannel::new()))
        }

        #[cfg(feature = "queue-postgres")]
        QueueBackend::Postgres => {
            let pool = pool.ok_or_else(|| {
                QueueError::Config("Postgres queue backend requires DATABASE_URL".to_string())
            })?;
            tracing::info!(lease_secs = config.queue_lease().as_secs(), "Using Postgres message channel");
            Ok(Arc::new(PgChannel::new(pool, config.queue_lease())))
        }

        #[cfg(not(feature = "queue-postgres"))]
        QueueBackend::Postgres => {
            let _ = pool;
            Err(QueueError::Config(
                "Postgres queue backend not available (queue-postgres feature not enabled)"
                    .to_string(),
            ))
        }
    }
}
