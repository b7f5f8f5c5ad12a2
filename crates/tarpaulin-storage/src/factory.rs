#[cfg(feature = "storage-local")]
use crate::LocalBlobStore;
#[cfg(feature = "storage-postgres")]
use crate::PgBlobStore;
use crate::{BlobStore, StorageBackend, StorageError, StorageResult};
use std::sync::Arc;
use tarpaulin_core::Config;

#[cfg(feature = "storage-postgres")]
pub type Pool = sqlx::PgPool;
#[cfg(not(feature = "storage-postgres"))]
pub type Pool = ();

/// Create a blob store based on configuration.
///
/// `pool` is required for the Postgres backend and ignored otherwise.
pub async fn create_blob_store(
    config: &Config,
    pool: Option<Pool>,
) -> StorageResult<Arc<dyn BlobStore>> {
    match config.storage_backend() {
        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let _ = pool;
            let store = LocalBlobStore::new(config.local_storage_path()).await?;
            tracing::info!(path = %config.local_storage_path(), "Using local blob store");
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-postgres")]
        StorageBackend::Postgres => {
            let pool = pool.ok_or_else(|| {
                StorageError::ConfigError(
                    "Postgres storage backend requires DATABASE_URL".to_string(),
                )
            })?;
            tracing::info!("Using Postgres blob store");
            Ok(Arc::new(PgBlobStore::new(pool)))
        }

        #[cfg(not(feature = "storage-postgres"))]
        StorageBackend::Postgres => Err(StorageError::ConfigError(
            "Postgres storage backend not available (storage-postgres feature not enabled)"
                .to_string(),
        )),
    }
}
