use async_trait::async_trait;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tarpaulin_core::{ImageId, ImageInfo, ImageMetadata, MetadataPatch};
use tarpaulin_storage::{
    BlobStore, ByteStream, StorageBackend, StorageError, StorageResult,
};
use tokio::io::AsyncRead;

/// Blob store that fails uploads once a budget of successful uploads is spent.
pub struct FlakyStore {
    inner: Arc<dyn BlobStore>,
    uploads_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn BlobStore>, uploads_allowed: usize) -> Self {
        Self {
            inner,
            uploads_left: AtomicUsize::new(uploads_allowed),
        }
    }

    pub fn allow_uploads(&self, n: usize) {
        self.uploads_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn upload_stream_with_id(
        &self,
        id: &ImageId,
        filename: &str,
        content_type: &str,
        metadata: ImageMetadata,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<()> {
        let spent = self
            .uploads_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err();
        if spent {
            return Err(StorageError::BackendError("injected upload failure".to_string()));
        }
        self.inner
            .upload_stream_with_id(id, filename, content_type, metadata, reader)
            .await
    }

    async fn download_stream_by_id(&self, id: &ImageId) -> StorageResult<ByteStream> {
        self.inner.download_stream_by_id(id).await
    }

    async fn download_stream_by_name(&self, filename: &str) -> StorageResult<ByteStream> {
        self.inner.download_stream_by_name(filename).await
    }

    async fn get_info_by_id(&self, id: &ImageId) -> StorageResult<Option<ImageInfo>> {
        self.inner.get_info_by_id(id).await
    }

    async fn get_info_by_name(&self, filename: &str) -> StorageResult<Option<ImageInfo>> {
        self.inner.get_info_by_name(filename).await
    }

    async fn update_metadata(&self, id: &ImageId, patch: &MetadataPatch) -> StorageResult<bool> {
        self.inner.update_metadata(id, patch).await
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}

/// Blob store whose original downloads never complete.
pub struct StalledStore {
    inner: Arc<dyn BlobStore>,
}

impl StalledStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BlobStore for StalledStore {
    async fn upload_stream_with_id(
        &self,
        id: &ImageId,
        filename: &str,
        content_type: &str,
        metadata: ImageMetadata,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<()> {
        self.inner
            .upload_stream_with_id(id, filename, content_type, metadata, reader)
            .await
    }

    async fn download_stream_by_id(&self, _id: &ImageId) -> StorageResult<ByteStream> {
        std::future::pending().await
    }

    async fn download_stream_by_name(&self, filename: &str) -> StorageResult<ByteStream> {
        self.inner.download_stream_by_name(filename).await
    }

    async fn get_info_by_id(&self, id: &ImageId) -> StorageResult<Option<ImageInfo>> {
        self.inner.get_info_by_id(id).await
    }

    async fn get_info_by_name(&self, filename: &str) -> StorageResult<Option<ImageInfo>> {
        self.inner.get_info_by_name(filename).await
    }

    async fn update_metadata(&self, id: &ImageId, patch: &MetadataPatch) -> StorageResult<bool> {
        self.inner.update_metadata(id, patch).await
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}
