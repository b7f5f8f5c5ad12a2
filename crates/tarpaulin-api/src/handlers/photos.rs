//! Photo upload and lookup.

use std::io::Cursor;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tarpaulin_core::{AppError, ImageId, ImageInfo, ImageMetadata};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Serialize, ToSchema)]
pub struct PhotoLinks {
    /// `/photos/{id}`
    pub photo: String,
    /// `/courses/{courseid}`
    pub course: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadPhotoResponse {
    pub id: ImageId,
    pub links: PhotoLinks,
}

/// Text fields of the upload form.
#[derive(Debug, Default, Validate)]
struct PhotoForm {
    #[validate(length(min = 1, max = 128, message = "courseid must be 1 to 128 characters"))]
    course_id: String,
    #[validate(length(max = 2048, message = "caption must be at most 2048 characters"))]
    caption: Option<String>,
}

struct PhotoFile {
    data: Bytes,
    filename: String,
    content_type: String,
}

/// Upload a photo
///
/// Stores the original and enqueues its id for the resize worker. Derivative
/// urls appear on the photo's metadata once the worker has run.
#[utoipa::path(
    post,
    path = "/photos",
    tag = "photos",
    request_body(content = inline(Object), content_type = "multipart/form-data",
        description = "`image` file (JPEG or PNG), `courseid`, optional `caption`"),
    responses(
        (status = 201, description = "Photo stored and queued for resizing", body = UploadPhotoResponse),
        (status = 400, description = "Invalid form or unsupported image type", body = ErrorResponse),
        (status = 413, description = "Image too large", body = ErrorResponse),
        (status = 503, description = "Resize queue unavailable", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, multipart), fields(operation = "upload_photo"))]
pub async fn upload_photo(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let max_bytes = state.config.max_image_size_bytes();
    let (file, form) = read_upload(multipart, max_bytes).await?;
    form.validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    let content_type = check_image_type(&file, state.config.allowed_content_types())?;

    let size_bytes = file.data.len();
    let id = ImageId::generate();
    let metadata = ImageMetadata::for_course(form.course_id.clone(), form.caption)
        .with_original_filename(file.filename);
    state
        .store
        .upload_stream_with_id(
            &id,
            &original_blob_name(&id, content_type),
            content_type,
            metadata,
            Box::pin(Cursor::new(file.data)),
        )
        .await?;

    if let Err(e) = state
        .channel
        .publish(state.config.image_queue(), &id.to_payload())
        .await
    {
        tracing::error!(
            image_id = %id,
            queue = %state.config.image_queue(),
            error = %e,
            "Original stored but resize work could not be queued"
        );
        return Err(e.into());
    }

    tracing::info!(
        image_id = %id,
        course_id = %form.course_id,
        content_type,
        size_bytes,
        "Photo uploaded"
    );

    let response = UploadPhotoResponse {
        links: PhotoLinks {
            photo: format!("/photos/{}", id),
            course: format!("/courses/{}", form.course_id),
        },
        id,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Get a photo's record, including derivative urls
#[utoipa::path(
    get,
    path = "/photos/{id}",
    tag = "photos",
    params(("id" = String, Path, description = "Photo id")),
    responses(
        (status = 200, description = "Photo record", body = ImageInfo),
        (status = 404, description = "Photo not found", body = ErrorResponse)
    )
)]
pub async fn get_photo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ImageInfo>, HttpAppError> {
    let id = ImageId::parse(&id)
        .map_err(|_| AppError::NotFound("Photo not found".to_string()))?;
    let info = state
        .store
        .get_info_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Photo not found".to_string()))?;
    Ok(Json(info))
}

async fn read_upload(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<(PhotoFile, PhotoForm), HttpAppError> {
    let mut file: Option<PhotoFile> = None;
    let mut form = PhotoForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                if file.is_some() {
                    return Err(AppError::InvalidInput(
                        "Send exactly one field named 'image'".to_string(),
                    )
                    .into());
                }
                let filename = sanitize_filename(field.file_name().unwrap_or_default());
                let content_type = field
                    .content_type()
                    .map(normalize_mime_type)
                    .unwrap_or_default();
                let data = field.bytes().await?;
                if data.len() > max_bytes {
                    return Err(AppError::PayloadTooLarge(format!(
                        "File size exceeds maximum allowed size of {} MB",
                        max_bytes / 1024 / 1024
                    ))
                    .into());
                }
                file = Some(PhotoFile {
                    data,
                    filename,
                    content_type,
                });
            }
            "courseid" => form.course_id = field.text().await?.trim().to_string(),
            "caption" => {
                let caption = field.text().await?;
                form.caption = Some(caption).filter(|c| !c.trim().is_empty());
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::InvalidInput("No image provided".to_string()))?;
    if file.data.is_empty() {
        return Err(AppError::InvalidInput("File is empty".to_string()).into());
    }
    Ok((file, form))
}

/// Blob name of an original. Never collides with `{id}-{tier}.jpeg` derivative names.
fn original_blob_name(id: &ImageId, content_type: &str) -> String {
    let ext = if content_type == "image/png" { "png" } else { "jpg" };
    format!("{}.{}", id, ext)
}

/// Declared type must be allowed and agree with the file's leading bytes.
fn check_image_type(file: &PhotoFile, allowed: &[String]) -> Result<&'static str, AppError> {
    let sniffed = sniff_image_type(&file.data).ok_or_else(|| {
        AppError::UnsupportedMediaType("Only JPEG and PNG images are accepted".to_string())
    })?;
    if !allowed.iter().any(|t| t == sniffed) {
        return Err(AppError::UnsupportedMediaType(format!(
            "Content type '{}' is not allowed",
            sniffed
        )));
    }
    if !file.content_type.is_empty()
        && file.content_type != "application/octet-stream"
        && file.content_type != sniffed
    {
        return Err(AppError::UnsupportedMediaType(format!(
            "Declared content type '{}' does not match file content ({})",
            file.content_type, sniffed
        )));
    }
    Ok(sniffed)
}

fn sniff_image_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(JPEG_MAGIC) {
        Some("image/jpeg")
    } else if data.starts_with(PNG_MAGIC) {
        Some("image/png")
    } else {
        None
    }
}

/// Strip parameters: "image/jpeg; charset=binary" -> "image/jpeg".
fn normalize_mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Keep the last path component, without control characters or leading dots.
fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim_start_matches('.')
        .chars()
        .take(200)
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(data: &[u8], content_type: &str) -> PhotoFile {
        PhotoFile {
            data: Bytes::copy_from_slice(data),
            filename: "a".to_string(),
            content_type: content_type.to_string(),
        }
    }

    fn allowed() -> Vec<String> {
        vec!["image/jpeg".to_string(), "image/png".to_string()]
    }

    #[test]
    fn test_sniff_image_type() {
        assert_eq!(sniff_image_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_image_type(PNG_MAGIC), Some("image/png"));
        assert_eq!(sniff_image_type(b"GIF89a"), None);
    }

    #[test]
    fn test_check_image_type() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xDB, 0x00];
        assert_eq!(check_image_type(&file(&jpeg, "image/jpeg"), &allowed()).unwrap(), "image/jpeg");
        assert_eq!(check_image_type(&file(&jpeg, ""), &allowed()).unwrap(), "image/jpeg");
        assert!(check_image_type(&file(&jpeg, "image/png"), &allowed()).is_err());
        assert!(check_image_type(&file(b"GIF89a....", "image/gif"), &allowed()).is_err());

        let only_png = vec!["image/png".to_string()];
        assert!(check_image_type(&file(&jpeg, "image/jpeg"), &only_png).is_err());
    }

    #[test]
    fn test_normalize_mime_type() {
        assert_eq!(normalize_mime_type("Image/JPEG; charset=binary"), "image/jpeg");
        assert_eq!(normalize_mime_type("image/png"), "image/png");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\cat.png"), "cat.png");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename(".."), "upload");
    }

    #[test]
    fn test_original_blob_name() {
        let id = ImageId::parse("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(original_blob_name(&id, "image/png"), "507f1f77bcf86cd799439011.png");
        assert_eq!(original_blob_name(&id, "image/jpeg"), "507f1f77bcf86cd799439011.jpg");
    }

    #[test]
    fn test_form_validation() {
        let form = PhotoForm {
            course_id: String::new(),
            caption: None,
        };
        assert!(form.validate().is_err());

        let form = PhotoForm {
            course_id: "c42".to_string(),
            caption: Some("Week 1".to_string()),
        };
        assert!(form.validate().is_ok());
    }
}
