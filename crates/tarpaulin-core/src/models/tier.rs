//! Derivative tiers
//!
//! A tier is one of the fixed outputs the resize worker can produce for an
//! original image: the format-normalized copy of a PNG (`orig`) and four
//! bounding-box sizes evaluated in descending order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::ToSchema;

use super::image::ImageId;

/// Mapping from tier to derivative url path, stored on the original image.
///
/// Serialized as an object keyed by `sOrig`, `s1024`, `s640`, `s256`, `s128`.
pub type DerivativeUrls = BTreeMap<DerivativeTier, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum DerivativeTier {
    /// Straight re-encode of a PNG source at original dimensions.
    #[serde(rename = "sOrig")]
    Original,
    #[serde(rename = "s1024")]
    S1024,
    #[serde(rename = "s640")]
    S640,
    #[serde(rename = "s256")]
    S256,
    #[serde(rename = "s128")]
    S128,
}

impl DerivativeTier {
    /// Size tiers in the order the worker processes them (largest first).
    pub const SIZE_TIERS: [DerivativeTier; 4] = [
        DerivativeTier::S1024,
        DerivativeTier::S640,
        DerivativeTier::S256,
        DerivativeTier::S128,
    ];

    /// Label used in derivative filenames.
    pub fn label(self) -> &'static str {
        match self {
            DerivativeTier::Original => "orig",
            DerivativeTier::S1024 => "1024",
            DerivativeTier::S640 => "640",
            DerivativeTier::S256 => "256",
            DerivativeTier::S128 => "128",
        }
    }

    /// Key under which the tier's url is recorded in `metadata.urls`.
    pub fn url_key(self) -> &'static str {
        match self {
            DerivativeTier::Original => "sOrig",
            DerivativeTier::S1024 => "s1024",
            DerivativeTier::S640 => "s640",
            DerivativeTier::S256 => "s256",
            DerivativeTier::S128 => "s128",
        }
    }

    /// Longer-side bounding box in pixels; `None` for the format-normalized copy.
    pub fn bound(self) -> Option<u32> {
        match self {
            DerivativeTier::Original => None,
            DerivativeTier::S1024 => Some(1024),
            DerivativeTier::S640 => Some(640),
            DerivativeTier::S256 => Some(256),
            DerivativeTier::S128 => Some(128),
        }
    }

    /// `{originalId}-{tierLabel}.jpeg`
    pub fn derivative_filename(self, original: &ImageId) -> String {
        format!("{}-{}.jpeg", original, self.label())
    }

    /// `{prefix}/{derivativeFilename}`, e.g. `/media/photos/<id>-640.jpeg`
    pub fn derivative_url(self, url_prefix: &str, original: &ImageId) -> String {
        format!(
            "{}/{}",
            url_prefix.trim_end_matches('/'),
            self.derivative_filename(original)
        )
    }
}

impl Display for DerivativeTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.label())
    }
}
