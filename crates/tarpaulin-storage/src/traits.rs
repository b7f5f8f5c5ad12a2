//! Blob store abstraction
//!
//! This module defines the `BlobStore` trait that all storage backends implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tarpaulin_core::{ImageId, ImageInfo, ImageMetadata, MetadataPatch};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// The requested blob does not exist. Callers route this to a 404.
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid filename: {0}")]
    InvalidName(String),

    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    #[error("Blob exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

#[cfg(feature = "storage-postgres")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound("row not found".to_string()),
            other => StorageError::BackendError(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of blob content chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Streaming blob storage with per-blob metadata.
///
/// Implementations are shared process-wide behind an `Arc<dyn BlobStore>` and must
/// be safe to call concurrently.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the reader's content under a caller-chosen id.
    ///
    /// Fails with `AlreadyExists` if the id is taken. The blob becomes visible only
    /// once the whole stream has been written. A later upload under the same
    /// filename becomes the blob returned by name lookups.
    async fn upload_stream_with_id(
        &self,
        id: &ImageId,
        filename: &str,
        content_type: &str,
        metadata: ImageMetadata,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<()>;

    /// Store the reader's content under a newly generated id.
    async fn upload_stream(
        &self,
        filename: &str,
        content_type: &str,
        metadata: ImageMetadata,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<ImageId> {
        let id = ImageId::generate();
        self.upload_stream_with_id(&id, filename, content_type, metadata, reader)
            .await?;
        Ok(id)
    }

    /// Store an in-memory buffer.
    async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        metadata: ImageMetadata,
        data: Bytes,
    ) -> StorageResult<ImageId> {
        let reader = Box::pin(std::io::Cursor::new(data));
        self.upload_stream(filename, content_type, metadata, reader)
            .await
    }

    /// Open a blob's content by id. Missing blobs yield `StorageError::NotFound`.
    async fn download_stream_by_id(&self, id: &ImageId) -> StorageResult<ByteStream>;

    /// Open the most recent blob stored under `filename`.
    async fn download_stream_by_name(&self, filename: &str) -> StorageResult<ByteStream>;

    /// Read a whole blob into memory, failing with `TooLarge` past `max_bytes`.
    async fn download_by_id(&self, id: &ImageId, max_bytes: usize) -> StorageResult<Bytes> {
        let mut stream = self.download_stream_by_id(id).await?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if buffer.len() + chunk.len() > max_bytes {
                return Err(StorageError::TooLarge { limit: max_bytes });
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    async fn get_info_by_id(&self, id: &ImageId) -> StorageResult<Option<ImageInfo>>;

    async fn get_info_by_name(&self, filename: &str) -> StorageResult<Option<ImageInfo>>;

    /// Merge `patch` into the blob's metadata. Returns `false` if the id is unknown.
    async fn update_metadata(&self, id: &ImageId, patch: &MetadataPatch) -> StorageResult<bool>;

    fn backend_type(&self) -> StorageBackend;
}
