//! Header-only image size probe.

use crate::error::ProcessingError;
use image::{ImageFormat, ImageReader};
use std::io::Cursor;

/// Dimensions and sniffed format of an encoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProbe {
    pub width: u32,
    pub height: u32,
    /// Format detected from the leading bytes, if recognised.
    pub format: Option<ImageFormat>,
}

impl ImageProbe {
    pub fn longer_side(&self) -> u32 {
        self.width.max(self.height)
    }

    /// Whether the source is a PNG: by header, or by `filename` when the header
    /// format is unknown.
    pub fn is_png(&self, filename: &str) -> bool {
        match self.format {
            Some(format) => format == ImageFormat::Png,
            None => filename.to_ascii_lowercase().ends_with(".png"),
        }
    }
}

/// Read width and height from the image header without decoding pixel data.
pub fn probe(data: &[u8]) -> Result<ImageProbe, ProcessingError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ProcessingError::Decode(e.to_string()))?;
    let format = reader.format();
    if format.is_none() {
        return Err(ProcessingError::Unsupported(
            "unrecognised image header".to_string(),
        ));
    }

    let (width, height) = reader.into_dimensions()?;
    if width == 0 || height == 0 {
        return Err(ProcessingError::Decode(format!(
            "degenerate dimensions {}x{}",
            width, height
        )));
    }

    Ok(ImageProbe {
        width,
        height,
        format,
    })
}
