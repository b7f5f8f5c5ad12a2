//! OpenAPI documentation.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use tarpaulin_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tarpaulin API",
        version = "0.1.0",
        description = "Photo ingest for course material. Uploaded originals are stored and queued; a resize worker adds size-tier derivatives whose urls appear in the photo's metadata."
    ),
    paths(
        handlers::photos::upload_photo,
        handlers::photos::get_photo,
        handlers::media::download_media,
        handlers::health::health,
    ),
    components(schemas(
        models::ImageId,
        models::ImageInfo,
        models::ImageMetadata,
        handlers::photos::UploadPhotoResponse,
        handlers::photos::PhotoLinks,
        handlers::health::HealthResponse,
        error::ErrorResponse,
    )),
    tags(
        (name = "photos", description = "Photo upload and lookup"),
        (name = "media", description = "Original and derivative downloads"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_route() {
        let doc = get_openapi_spec();
        for path in ["/photos", "/photos/{id}", "/media/photos/{filename}", "/health"] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
