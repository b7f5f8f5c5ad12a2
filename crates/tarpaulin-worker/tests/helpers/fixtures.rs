use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Diagonal gradient, so encoders have real content to work with.
fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    }))
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    gradient(width, height)
        .write_to(&mut out, format)
        .expect("Failed to encode fixture");
    out.into_inner()
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

/// Width, height and format of encoded bytes.
pub fn dimensions(data: &[u8]) -> (u32, u32, ImageFormat) {
    let reader = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .expect("Failed to sniff format");
    let format = reader.format().expect("Unknown format");
    let (width, height) = reader.into_dimensions().expect("Failed to read dimensions");
    (width, height, format)
}
