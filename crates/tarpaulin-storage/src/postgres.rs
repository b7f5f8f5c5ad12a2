//! Postgres blob store
//!
//! Blob content is split into fixed-size rows of `blob_chunks`; `blob_files` holds
//! one row per blob with its metadata as JSONB. See `migrations/` for the schema.

use crate::names::validate_filename;
use crate::traits::{BlobStore, ByteStream, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::pin::Pin;
use tarpaulin_core::{ImageId, ImageInfo, ImageMetadata, MetadataPatch};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Content chunk size in bytes.
pub const CHUNK_SIZE: usize = 255 * 1024;

#[derive(Clone)]
pub struct PgBlobStore {
    pool: PgPool,
}

impl PgBlobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_info(&self, query: &str, key: &str) -> StorageResult<Option<ImageInfo>> {
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.try_get("id")?;
        let length: i64 = row.try_get("length")?;
        let metadata: Value = row.try_get("metadata")?;
        let uploaded_at: DateTime<Utc> = row.try_get("uploaded_at")?;

        info_from_row(
            &id,
            row.try_get("filename")?,
            row.try_get("content_type")?,
            length,
            metadata,
            uploaded_at,
        )
        .map(Some)
    }

    async fn latest_id_by_name(&self, filename: &str) -> StorageResult<Option<ImageId>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM blob_files WHERE filename = $1 ORDER BY uploaded_at DESC LIMIT 1",
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        id.map(|id| ImageId::parse(&id).map_err(|e| StorageError::Metadata(e.to_string())))
            .transpose()
    }

    /// Stream chunk rows in order, fetching one row per poll.
    fn chunk_stream(&self, id: ImageId, chunks: i32) -> ByteStream {
        let pool = self.pool.clone();
        let stream = futures::stream::unfold(0i32, move |n| {
            let pool = pool.clone();
            let id = id.clone();
            async move {
                if n >= chunks {
                    return None;
                }
                let result: StorageResult<Bytes> = sqlx::query_scalar::<_, Vec<u8>>(
                    "SELECT data FROM blob_chunks WHERE file_id = $1 AND n = $2",
                )
                .bind(id.as_str())
                .bind(n)
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)
                .and_then(|data| {
                    data.map(Bytes::from).ok_or_else(|| {
                        StorageError::DownloadFailed(format!("Missing chunk {} of {}", n, id))
                    })
                });
                Some((result, n + 1))
            }
        });
        Box::pin(stream)
    }
}

const INFO_COLUMNS: &str = "id, filename, content_type, length, metadata, uploaded_at";

fn info_from_row(
    id: &str,
    filename: String,
    content_type: String,
    length: i64,
    metadata: Value,
    uploaded_at: DateTime<Utc>,
) -> StorageResult<ImageInfo> {
    let id = ImageId::parse(id).map_err(|e| StorageError::Metadata(e.to_string()))?;
    let metadata: ImageMetadata = serde_json::from_value(metadata)
        .map_err(|e| StorageError::Metadata(format!("Corrupt metadata for {}: {}", id, e)))?;
    Ok(ImageInfo {
        id,
        filename,
        content_type,
        length: u64::try_from(length).unwrap_or_default(),
        uploaded_at,
        metadata,
    })
}

fn chunk_count(length: u64) -> i32 {
    length.div_ceil(CHUNK_SIZE as u64) as i32
}

/// Fill `buf` from `reader`, returning fewer bytes only at end of stream.
async fn read_chunk(
    reader: &mut Pin<Box<dyn AsyncRead + Send + Unpin>>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// JSON object merged into `metadata` by `update_metadata`.
fn patch_to_json(patch: &MetadataPatch) -> StorageResult<(Value, Option<String>)> {
    let urls = serde_json::to_value(&patch.urls).map_err(|e| StorageError::Metadata(e.to_string()))?;
    Ok((urls, patch.caption.clone()))
}

#[async_trait]
impl BlobStore for PgBlobStore {
    async fn upload_stream_with_id(
        &self,
        id: &ImageId,
        filename: &str,
        content_type: &str,
        metadata: ImageMetadata,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<()> {
        validate_filename(filename)?;
        let start = std::time::Instant::now();
        let metadata =
            serde_json::to_value(&metadata).map_err(|e| StorageError::Metadata(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut n: i32 = 0;
        let mut length: u64 = 0;
        loop {
            let read = read_chunk(&mut reader, &mut buf).await.map_err(|e| {
                StorageError::UploadFailed(format!("Failed to read upload stream: {}", e))
            })?;
            if read == 0 {
                break;
            }
            sqlx::query("INSERT INTO blob_chunks (file_id, n, data) VALUES ($1, $2, $3)")
                .bind(id.as_str())
                .bind(n)
                .bind(&buf[..read])
                .execute(&mut *tx)
                .await?;
            n += 1;
            length += read as u64;
            if read < CHUNK_SIZE {
                break;
            }
        }

        // Insert the file row last so the blob is only visible once complete.
        sqlx::query(
            r#"
            INSERT INTO blob_files (id, filename, content_type, length, chunk_size, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id.as_str())
        .bind(filename)
        .bind(content_type)
        .bind(length as i64)
        .bind(CHUNK_SIZE as i32)
        .bind(metadata)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StorageError::AlreadyExists(id.to_string())
            }
            other => other.into(),
        })?;

        tx.commit().await?;

        tracing::info!(
            id = %id,
            filename = %filename,
            size_bytes = length,
            chunks = n,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Postgres blob upload successful"
        );

        Ok(())
    }

    async fn download_stream_by_id(&self, id: &ImageId) -> StorageResult<ByteStream> {
        let length: Option<i64> =
            sqlx::query_scalar("SELECT length FROM blob_files WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        let length = length.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let chunks = chunk_count(u64::try_from(length).unwrap_or_default());
        Ok(self.chunk_stream(id.clone(), chunks))
    }

    async fn download_stream_by_name(&self, filename: &str) -> StorageResult<ByteStream> {
        validate_filename(filename)?;
        let id = self
            .latest_id_by_name(filename)
            .await?
            .ok_or_else(|| StorageError::NotFound(filename.to_string()))?;
        self.download_stream_by_id(&id).await
    }

    async fn get_info_by_id(&self, id: &ImageId) -> StorageResult<Option<ImageInfo>> {
        let query = format!("SELECT {} FROM blob_files WHERE id = $1", INFO_COLUMNS);
        self.fetch_info(&query, id.as_str()).await
    }

    async fn get_info_by_name(&self, filename: &str) -> StorageResult<Option<ImageInfo>> {
        validate_filename(filename)?;
        let query = format!(
            "SELECT {} FROM blob_files WHERE filename = $1 ORDER BY uploaded_at DESC LIMIT 1",
            INFO_COLUMNS
        );
        self.fetch_info(&query, filename).await
    }

    async fn update_metadata(&self, id: &ImageId, patch: &MetadataPatch) -> StorageResult<bool> {
        let (urls, caption) = patch_to_json(patch)?;

        // Single statement so concurrent patches to different url keys both land.
        let result = sqlx::query(
            r#"
            UPDATE blob_files
            SET metadata = jsonb_set(
                    metadata,
                    '{urls}',
                    COALESCE(metadata->'urls', '{}'::jsonb) || $2::jsonb,
                    true
                )
                || CASE WHEN $3::text IS NULL THEN '{}'::jsonb
                        ELSE jsonb_build_object('caption', $3::text) END
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(urls)
        .bind(caption)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Postgres
    }
}
