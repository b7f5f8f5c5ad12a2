mod helpers;

use helpers::fixtures::{create_test_jpeg, create_test_png, dimensions};
use helpers::{photo_form, setup_test_app, setup_test_app_with, upload_photo};
use std::sync::Arc;
use tarpaulin_core::{DerivativeTier, ImageId};
use tarpaulin_queue::{Consumer, ConsumerConfig, MessageChannel, Settlement};
use tarpaulin_worker::{ResizeWorker, WorkerSettings};

fn uploaded_id(body: &serde_json::Value) -> ImageId {
    ImageId::parse(body["id"].as_str().expect("Expected 'id' in upload response"))
        .expect("Invalid id in upload response")
}

#[tokio::test]
async fn test_upload_photo_stores_original_and_enqueues_id() {
    let app = setup_test_app().await;
    let form = photo_form(create_test_jpeg(300, 200), "week1.jpg", "image/jpeg", Some("c42"))
        .add_text("caption", "Whiteboard");

    let response = upload_photo(app.client(), form).await;
    assert_eq!(response.status_code(), 201);

    let body: serde_json::Value = response.json();
    let id = uploaded_id(&body);
    assert_eq!(body["links"]["photo"], format!("/photos/{}", id));
    assert_eq!(body["links"]["course"], "/courses/c42");

    let delivery = app.channel.receive(app.queue()).await.unwrap().unwrap();
    assert_eq!(&delivery.payload[..], id.as_str().as_bytes());

    let response = app.client().get(&format!("/photos/{}", id)).await;
    assert_eq!(response.status_code(), 200);
    let info: serde_json::Value = response.json();
    assert_eq!(info["content_type"], "image/jpeg");
    assert_eq!(info["filename"], format!("{}.jpg", id));
    assert_eq!(info["metadata"]["course_id"], "c42");
    assert_eq!(info["metadata"]["caption"], "Whiteboard");
    assert_eq!(info["metadata"]["original_filename"], "week1.jpg");
    assert!(info["metadata"].get("urls").is_none());
}

#[tokio::test]
async fn test_uploaded_original_is_downloadable() {
    let app = setup_test_app().await;
    let data = create_test_png(40, 30);
    let response = upload_photo(
        app.client(),
        photo_form(data.clone(), "logo.png", "image/png", Some("c7")),
    )
    .await;
    assert_eq!(response.status_code(), 201);
    let id = uploaded_id(&response.json());

    let response = app.client().get(&format!("/media/photos/{}.png", id)).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.header("content-type"), "image/png");
    assert_eq!(response.as_bytes().to_vec(), data);
}

#[tokio::test]
async fn test_upload_requires_course_id() {
    let app = setup_test_app().await;
    let response = upload_photo(
        app.client(),
        photo_form(create_test_jpeg(10, 10), "a.jpg", "image/jpeg", None),
    )
    .await;

    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(app.channel.pending(app.queue()), 0);
}

#[tokio::test]
async fn test_upload_requires_image_field() {
    let app = setup_test_app().await;
    let form = axum_test::multipart::MultipartForm::new().add_text("courseid", "c42");
    let response = upload_photo(app.client(), form).await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_upload_rejects_unsupported_type() {
    let app = setup_test_app().await;
    let response = upload_photo(
        app.client(),
        photo_form(b"GIF89a\x01\x00\x01\x00".to_vec(), "anim.gif", "image/gif", Some("c42")),
    )
    .await;

    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "UNSUPPORTED_MEDIA_TYPE");
    assert_eq!(app.channel.pending(app.queue()), 0);
}

#[tokio::test]
async fn test_upload_rejects_mismatched_content_type() {
    let app = setup_test_app().await;
    let response = upload_photo(
        app.client(),
        photo_form(create_test_png(10, 10), "a.jpg", "image/jpeg", Some("c42")),
    )
    .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_upload_rejects_oversized_image() {
    let app = setup_test_app_with(|config| config.0.max_image_size_bytes = 2048, true).await;
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
    data.resize(10_000, 0);

    let response = upload_photo(
        app.client(),
        photo_form(data, "big.jpg", "image/jpeg", Some("c42")),
    )
    .await;

    assert_eq!(response.status_code(), 413);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(app.channel.pending(app.queue()), 0);
}

#[tokio::test]
async fn test_upload_beyond_body_limit_is_413() {
    let app = setup_test_app_with(|config| config.0.max_image_size_bytes = 2048, true).await;
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
    data.resize(256 * 1024, 0);

    let response = upload_photo(
        app.client(),
        photo_form(data, "huge.jpg", "image/jpeg", Some("c42")),
    )
    .await;
    assert_eq!(response.status_code(), 413);
}

#[tokio::test]
async fn test_upload_fails_when_queue_unavailable() {
    let app = setup_test_app_with(|_| {}, false).await;
    let response = upload_photo(
        app.client(),
        photo_form(create_test_jpeg(10, 10), "a.jpg", "image/jpeg", Some("c42")),
    )
    .await;

    assert_eq!(response.status_code(), 503);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "QUEUE_UNAVAILABLE");
    assert_eq!(body["recoverable"], true);
}

#[tokio::test]
async fn test_get_photo_not_found() {
    let app = setup_test_app().await;

    let response = app.client().get("/photos/not-a-valid-id").await;
    assert_eq!(response.status_code(), 404);

    let response = app
        .client()
        .get(&format!("/photos/{}", ImageId::generate()))
        .await;
    assert_eq!(response.status_code(), 404);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_download_missing_media_is_404() {
    let app = setup_test_app().await;
    let response = app
        .client()
        .get("/media/photos/507f1f77bcf86cd799439011-640.jpeg")
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_health() {
    let app = setup_test_app().await;
    let response = app.client().get("/health").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_openapi_document() {
    let app = setup_test_app().await;
    let response = app.client().get("/api-docs/openapi.json").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert!(body["paths"].get("/photos").is_some());
    assert!(body["paths"].get("/media/photos/{filename}").is_some());
}

#[tokio::test]
async fn test_upload_then_resize_exposes_derivatives() {
    let app = setup_test_app().await;
    let response = upload_photo(
        app.client(),
        photo_form(create_test_jpeg(2000, 1500), "lecture.jpg", "image/jpeg", Some("c42")),
    )
    .await;
    assert_eq!(response.status_code(), 201);
    let id = uploaded_id(&response.json());

    let worker = Arc::new(ResizeWorker::new(
        app.store().clone(),
        WorkerSettings::from_config(&app.state.config),
    ));
    let consumer = Consumer::new(
        app.channel.clone(),
        worker,
        ConsumerConfig::from_config(&app.state.config),
    );
    assert_eq!(consumer.process_next().await.unwrap(), Some(Settlement::Acked));

    let info: serde_json::Value = app.client().get(&format!("/photos/{}", id)).await.json();
    let urls = info["metadata"]["urls"].as_object().expect("urls recorded");
    let mut keys: Vec<&str> = urls.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["s1024", "s128", "s256", "s640"]);

    let s256 = urls["s256"].as_str().unwrap();
    assert_eq!(s256, DerivativeTier::S256.derivative_url("/media/photos", &id));
    let response = app.client().get(s256).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.header("content-type"), "image/jpeg");
    assert_eq!(dimensions(&response.as_bytes()), (256, 192));
}
