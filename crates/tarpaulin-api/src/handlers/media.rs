use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use futures::StreamExt;
use tarpaulin_core::AppError;

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

/// Stream a stored blob (original or derivative) by filename
#[utoipa::path(
    get,
    path = "/media/photos/{filename}",
    tag = "media",
    params(("filename" = String, Path, description = "Blob filename, e.g. `{id}-640.jpeg`")),
    responses(
        (status = 200, description = "Blob content", content_type = "application/octet-stream"),
        (status = 404, description = "No blob with that name", body = ErrorResponse)
    )
)]
pub async fn download_media(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, HttpAppError> {
    let info = state
        .store
        .get_info_by_name(&filename)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} not found", filename)))?;

    tracing::debug!(filename = %filename, blob_id = %info.id, "Streaming media");

    let stream = state.store.download_stream_by_id(&info.id).await?;
    let body_stream = stream.map(|result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, info.content_type)
        .header(header::CONTENT_LENGTH, info.length)
        .header(header::CACHE_CONTROL, "public, max-age=31536000, immutable")
        .body(Body::from_stream(body_stream))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build response");
            AppError::Internal(e.to_string()).into()
        })
}
