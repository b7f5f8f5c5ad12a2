//! Image records as kept by the blob store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;

use super::tier::{DerivativeTier, DerivativeUrls};

const IMAGE_ID_BYTES: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid image id: {0:?}")]
pub struct InvalidImageId(pub String);

/// Generated image identifier.
///
/// 24 lowercase hex characters: four bytes of big-endian unix seconds followed by
/// eight random bytes. Ids sort roughly by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "507f1f77bcf86cd799439011")]
pub struct ImageId(String);

impl ImageId {
    pub fn generate() -> Self {
        let secs = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let tail: [u8; IMAGE_ID_BYTES - 4] = rand::random();

        let mut bytes = [0u8; IMAGE_ID_BYTES];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..].copy_from_slice(&tail);
        ImageId(hex::encode(bytes))
    }

    pub fn parse(s: &str) -> Result<Self, InvalidImageId> {
        let trimmed = s.trim();
        if trimmed.len() != IMAGE_ID_BYTES * 2 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidImageId(s.to_string()));
        }
        Ok(ImageId(trimmed.to_ascii_lowercase()))
    }

    /// Decode a queue payload: UTF-8 text holding a single id.
    pub fn from_payload(payload: &[u8]) -> Result<Self, InvalidImageId> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| InvalidImageId(String::from_utf8_lossy(payload).into_owned()))?;
        Self::parse(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_payload(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

impl Display for ImageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl FromStr for ImageId {
    type Err = InvalidImageId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageId {
    type Error = InvalidImageId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

/// User-facing metadata attached to a stored image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImageMetadata {
    /// Owning course (the entity the photo was uploaded for).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Client-supplied filename; the blob itself is stored under a generated name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    /// Derivative links written by the resize worker. Only ever grows.
    #[serde(default, skip_serializing_if = "DerivativeUrls::is_empty")]
    #[schema(value_type = Object)]
    pub urls: DerivativeUrls,
}

impl ImageMetadata {
    pub fn for_course(course_id: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            course_id: Some(course_id.into()),
            caption,
            original_filename: None,
            urls: DerivativeUrls::new(),
        }
    }

    pub fn with_original_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = Some(filename.into());
        self
    }
}

/// File record of a stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ImageInfo {
    pub id: ImageId,
    pub filename: String,
    pub content_type: String,
    pub length: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: ImageMetadata,
}

impl ImageInfo {
    pub fn has_derivative(&self, tier: DerivativeTier) -> bool {
        self.metadata.urls.contains_key(&tier)
    }
}

/// Partial metadata update.
///
/// `urls` entries are merged into the existing map (keys set, never removed);
/// `caption` replaces the caption when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub urls: DerivativeUrls,
    pub caption: Option<String>,
}

impl MetadataPatch {
    /// Patch setting a single derivative url.
    pub fn url(tier: DerivativeTier, url: impl Into<String>) -> Self {
        let mut urls = DerivativeUrls::new();
        urls.insert(tier, url.into());
        Self { urls, caption: None }
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.caption.is_none()
    }

    pub fn apply(&self, metadata: &mut ImageMetadata) {
        for (tier, url) in &self.urls {
            metadata.urls.insert(*tier, url.clone());
        }
        if let Some(caption) = &self.caption {
            metadata.caption = Some(caption.clone());
        }
    }
}
