use crate::names::validate_filename;
use crate::traits::{BlobStore, ByteStream, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tarpaulin_core::{ImageId, ImageInfo, ImageMetadata, MetadataPatch};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Local filesystem blob store
///
/// Layout under the base directory:
/// - `blobs/{id}`: content
/// - `meta/{id}.json`: serialized [`ImageInfo`]
/// - `names/{filename}`: id of the latest blob stored under that filename
///
/// Every file is written to a temporary sibling and renamed into place, so readers
/// never observe partial content. Metadata updates are serialized per process.
pub struct LocalBlobStore {
    base_path: PathBuf,
    metadata_lock: Mutex<()>,
}

impl LocalBlobStore {
    /// Create a new LocalBlobStore rooted at `base_path`, creating directories as needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        for dir in ["blobs", "meta", "names", "tmp"] {
            let path = base_path.join(dir);
            fs::create_dir_all(&path).await.map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        Ok(LocalBlobStore {
            base_path,
            metadata_lock: Mutex::new(()),
        })
    }

    fn blob_path(&self, id: &ImageId) -> PathBuf {
        self.base_path.join("blobs").join(id.as_str())
    }

    fn meta_path(&self, id: &ImageId) -> PathBuf {
        self.base_path.join("meta").join(format!("{}.json", id))
    }

    fn name_path(&self, filename: &str) -> StorageResult<PathBuf> {
        validate_filename(filename)?;
        Ok(self.base_path.join("names").join(filename))
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path.join("tmp").join(Uuid::new_v4().to_string())
    }

    /// Write `data` to `path` via a temporary file and rename.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", tmp.display(), e))
        })?;
        file.write_all(data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", tmp.display(), e))
        })?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to move file {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    async fn read_info(&self, id: &ImageId) -> StorageResult<Option<ImageInfo>> {
        let data = match fs::read(self.meta_path(id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let info = serde_json::from_slice(&data).map_err(|e| {
            StorageError::Metadata(format!("Corrupt metadata for {}: {}", id, e))
        })?;
        Ok(Some(info))
    }

    async fn write_info(&self, info: &ImageInfo) -> StorageResult<()> {
        let data = serde_json::to_vec_pretty(info)
            .map_err(|e| StorageError::Metadata(e.to_string()))?;
        self.write_atomic(&self.meta_path(&info.id), &data).await
    }

    async fn resolve_name(&self, filename: &str) -> StorageResult<Option<ImageId>> {
        let path = self.name_path(filename)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let id = ImageId::parse(&raw).map_err(|e| StorageError::Metadata(e.to_string()))?;
        Ok(Some(id))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload_stream_with_id(
        &self,
        id: &ImageId,
        filename: &str,
        content_type: &str,
        metadata: ImageMetadata,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<()> {
        let name_path = self.name_path(filename)?;
        let blob_path = self.blob_path(id);
        if fs::try_exists(&blob_path).await? {
            return Err(StorageError::AlreadyExists(id.to_string()));
        }
        let start = std::time::Instant::now();

        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", tmp.display(), e))
        })?;

        let copied = tokio::io::copy(&mut reader, &mut file).await;
        let bytes_copied = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&tmp).await;
                return Err(StorageError::UploadFailed(format!(
                    "Failed to write stream to file {}: {}",
                    tmp.display(),
                    e
                )));
            }
        };

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", tmp.display(), e))
        })?;
        drop(file);

        fs::rename(&tmp, &blob_path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to move file {}: {}",
                blob_path.display(),
                e
            ))
        })?;

        let info = ImageInfo {
            id: id.clone(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            length: bytes_copied,
            uploaded_at: Utc::now(),
            metadata,
        };
        self.write_info(&info).await?;
        self.write_atomic(&name_path, id.as_str().as_bytes()).await?;

        tracing::info!(
            id = %id,
            filename = %filename,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local blob upload successful"
        );

        Ok(())
    }

    async fn download_stream_by_id(&self, id: &ImageId) -> StorageResult<ByteStream> {
        let path = self.blob_path(id);

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_string()))
            }
            Err(e) => {
                return Err(StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let id_display = id.to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |result| {
            result.map_err(|e| {
                tracing::error!(id = %id_display, error = %e, "Local blob stream read error");
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(Box::pin(stream))
    }

    async fn download_stream_by_name(&self, filename: &str) -> StorageResult<ByteStream> {
        let id = self
            .resolve_name(filename)
            .await?
            .ok_or_else(|| StorageError::NotFound(filename.to_string()))?;
        self.download_stream_by_id(&id).await
    }

    async fn get_info_by_id(&self, id: &ImageId) -> StorageResult<Option<ImageInfo>> {
        self.read_info(id).await
    }

    async fn get_info_by_name(&self, filename: &str) -> StorageResult<Option<ImageInfo>> {
        match self.resolve_name(filename).await? {
            Some(id) => self.read_info(&id).await,
            None => Ok(None),
        }
    }

    async fn update_metadata(&self, id: &ImageId, patch: &MetadataPatch) -> StorageResult<bool> {
        let _guard = self.metadata_lock.lock().await;

        let Some(mut info) = self.read_info(id).await? else {
            return Ok(false);
        };
        patch.apply(&mut info.metadata);
        self.write_info(&info).await?;

        tracing::debug!(id = %id, keys = patch.urls.len(), "Local blob metadata updated");
        Ok(true)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
