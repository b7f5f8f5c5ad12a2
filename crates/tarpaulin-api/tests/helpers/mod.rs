#![allow(dead_code)]

pub mod fixtures;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestResponse, TestServer};
use std::sync::Arc;
use tarpaulin_api::{setup_routes, AppState};
use tarpaulin_core::Config;
use tarpaulin_queue::{MemoryChannel, MessageChannel};
use tarpaulin_storage::{BlobStore, LocalBlobStore};
use tempfile::TempDir;

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub channel: Arc<MemoryChannel>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.state.store
    }

    pub fn queue(&self) -> &str {
        self.state.config.image_queue()
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(|_| {}, true).await
}

/// `declare_queue = false` leaves the work queue undeclared so publishing fails.
pub async fn setup_test_app_with(
    configure: impl FnOnce(&mut Config),
    declare_queue: bool,
) -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::for_local(temp_dir.path().to_string_lossy().to_string());
    configure(&mut config);

    let store: Arc<dyn BlobStore> = Arc::new(
        LocalBlobStore::new(temp_dir.path())
            .await
            .expect("Failed to create local store"),
    );
    let channel = Arc::new(MemoryChannel::new());
    if declare_queue {
        channel.connect(config.image_queue()).await.unwrap();
        channel.connect(config.dead_letter_queue()).await.unwrap();
    }

    let state = Arc::new(AppState::new(config.clone(), store, channel.clone()));
    let app = setup_routes(&config, state.clone());
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        state,
        channel,
        _temp_dir: temp_dir,
    }
}

pub fn photo_form(data: Vec<u8>, filename: &str, mime: &str, course_id: Option<&str>) -> MultipartForm {
    let part = Part::bytes(bytes::Bytes::from(data))
        .file_name(filename)
        .mime_type(mime);
    let form = MultipartForm::new().add_part("image", part);
    match course_id {
        Some(course_id) => form.add_text("courseid", course_id.to_string()),
        None => form,
    }
}

pub async fn upload_photo(client: &TestServer, form: MultipartForm) -> TestResponse {
    client.post("/photos").multipart(form).await
}
