use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Bytes are not an image in a supported format.
    #[error("Unsupported image: {0}")]
    Unsupported(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode derivative: {0}")]
    Encode(String),
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => ProcessingError::Unsupported(e.to_string()),
            image::ImageError::Encoding(e) => ProcessingError::Encode(e.to_string()),
            other => ProcessingError::Decode(other.to_string()),
        }
    }
}
