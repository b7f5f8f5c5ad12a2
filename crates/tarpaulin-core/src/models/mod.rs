//! Domain models for images and their derivatives

pub mod image;
pub mod tier;

pub use image::{ImageId, ImageInfo, ImageMetadata, InvalidImageId, MetadataPatch};
pub use tier::{DerivativeTier, DerivativeUrls};
