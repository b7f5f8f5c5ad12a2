//! Decode an original once and render each derivative tier to JPEG.

use crate::error::ProcessingError;
use crate::plan::fit_inside;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use tarpaulin_core::DerivativeTier;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Content type of every derivative.
pub const DERIVATIVE_CONTENT_TYPE: &str = "image/jpeg";

/// An encoded derivative ready to store.
#[derive(Debug, Clone)]
pub struct RenderedDerivative {
    pub tier: DerivativeTier,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct DerivativeRenderer {
    quality: u8,
}

impl Default for DerivativeRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl DerivativeRenderer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<DynamicImage, ProcessingError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ProcessingError::Decode(e.to_string()))?;
        Ok(reader.decode()?)
    }

    /// Resize `source` to fit `tier` (original size for `Original`) and encode as JPEG.
    pub fn render(
        &self,
        source: &DynamicImage,
        tier: DerivativeTier,
    ) -> Result<RenderedDerivative, ProcessingError> {
        let (orig_width, orig_height) = source.dimensions();
        let (width, height) = match tier.bound() {
            Some(bound) => fit_inside(orig_width, orig_height, bound),
            None => (orig_width, orig_height),
        };

        // JPEG has no alpha channel.
        let rgb = if (width, height) == (orig_width, orig_height) {
            source.to_rgb8()
        } else {
            let filter = select_filter(orig_width, orig_height, width, height);
            source.resize_exact(width, height, filter).to_rgb8()
        };

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.quality).encode_image(&rgb)?;

        tracing::debug!(
            tier = %tier,
            width,
            height,
            size_bytes = buffer.len(),
            "Rendered derivative"
        );

        Ok(RenderedDerivative {
            tier,
            width,
            height,
            data: Bytes::from(buffer),
        })
    }
}

/// Cheaper filters for large reductions, where their softness is invisible.
fn select_filter(orig_width: u32, orig_height: u32, new_width: u32, new_height: u32) -> FilterType {
    let width_ratio = orig_width as f32 / new_width.max(1) as f32;
    let height_ratio = orig_height as f32 / new_height.max(1) as f32;
    let max_ratio = width_ratio.max(height_ratio);

    if max_ratio > 2.0 {
        FilterType::Triangle
    } else if max_ratio > 1.5 {
        FilterType::CatmullRom
    } else {
        FilterType::Lanczos3
    }
}
