//! Image loading, downscaling and base64 JPEG encoding.
//!
//! Pure conversion: no shared state, safe to call concurrently for
//! different inputs.

use crate::error::{BridgeError, Result};
use base64::engine::general_purpose;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;

pub const DEFAULT_MAX_DIMS: (u32, u32) = (640, 480);
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Load an image, downscale it to fit within `max_dims` (aspect-ratio
/// preserving, never upscaling), re-encode as JPEG and return the base64
/// text encoding.
///
/// Fails with [`BridgeError::SourceNotFound`] when the path is unreadable.
pub fn encode_image(path: &Path, max_dims: (u32, u32), jpeg_quality: u8) -> Result<String> {
    let img = image::open(path).map_err(|e| match e {
        image::ImageError::IoError(_) => BridgeError::SourceNotFound(path.to_path_buf()),
        other => BridgeError::Image(other),
    })?;

    let img = downscale(img, max_dims);
    let rgb = img.to_rgb8();

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality);
    encoder.encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;

    Ok(general_purpose::STANDARD.encode(&jpeg))
}

/// Wrap a base64 JPEG in a data URI suitable for an image part.
pub fn data_url(b64: &str) -> String {
    format!("data:image/jpeg;base64,{b64}")
}

fn downscale(img: DynamicImage, (max_w, max_h): (u32, u32)) -> DynamicImage {
    if img.width() <= max_w && img.height() <= max_h {
        return img;
    }
    // resize() keeps aspect ratio and fits within the bounds
    img.resize(max_w, max_h, FilterType::Triangle)
}
