#![allow(dead_code)]

pub mod fixtures;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;
use tarpaulin_core::{ImageId, ImageInfo, ImageMetadata};
use tarpaulin_queue::{Consumer, ConsumerConfig, MessageChannel, MemoryChannel};
use tarpaulin_storage::{BlobStore, LocalBlobStore};
use tarpaulin_worker::{ResizeWorker, WorkerSettings};
use tempfile::TempDir;

/// Worker wired to a temporary local store and an in-memory channel.
pub struct TestPipeline {
    pub store: Arc<dyn BlobStore>,
    pub channel: Arc<MemoryChannel>,
    pub worker: Arc<ResizeWorker>,
    pub consumer: Consumer,
    pub _temp_dir: TempDir,
}

impl TestPipeline {
    pub fn queue(&self) -> &str {
        &self.consumer.config().queue
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.consumer.config().dead_letter_queue
    }

    /// Store an original the way the ingest API does and enqueue its id.
    pub async fn ingest(&self, filename: &str, content_type: &str, data: Vec<u8>) -> ImageId {
        let id = upload_original(self.store.as_ref(), filename, content_type, data).await;
        self.channel
            .publish(self.queue(), &id.to_payload())
            .await
            .expect("Failed to publish work item");
        id
    }

    pub async fn info(&self, id: &ImageId) -> ImageInfo {
        self.store
            .get_info_by_id(id)
            .await
            .expect("Failed to read info")
            .expect("Original missing")
    }
}

pub async fn setup_pipeline() -> TestPipeline {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store: Arc<dyn BlobStore> = Arc::new(
        LocalBlobStore::new(temp_dir.path())
            .await
            .expect("Failed to create local store"),
    );
    setup_pipeline_with_store(store, temp_dir).await
}

/// Same wiring around a caller-provided store, e.g. a fault-injecting wrapper.
pub async fn setup_pipeline_with_store(store: Arc<dyn BlobStore>, temp_dir: TempDir) -> TestPipeline {
    setup_pipeline_with_settings(store, temp_dir, WorkerSettings::default()).await
}

pub async fn setup_pipeline_with_settings(
    store: Arc<dyn BlobStore>,
    temp_dir: TempDir,
    settings: WorkerSettings,
) -> TestPipeline {
    let channel = Arc::new(MemoryChannel::new());
    let config = ConsumerConfig {
        max_deliveries: 3,
        poll_interval: Duration::from_millis(10),
        ..ConsumerConfig::default()
    };
    channel.connect(&config.queue).await.unwrap();
    channel.connect(&config.dead_letter_queue).await.unwrap();

    let worker = Arc::new(ResizeWorker::new(store.clone(), settings));
    let consumer = Consumer::new(channel.clone(), worker.clone(), config);

    TestPipeline {
        store,
        channel,
        worker,
        consumer,
        _temp_dir: temp_dir,
    }
}

pub async fn upload_original(
    store: &dyn BlobStore,
    filename: &str,
    content_type: &str,
    data: Vec<u8>,
) -> ImageId {
    store
        .upload(
            filename,
            content_type,
            ImageMetadata::for_course("c42", Some("lecture notes".to_string())),
            data.into(),
        )
        .await
        .expect("Failed to upload original")
}
