//! Still-image codecs for single frames.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::{MediaError, MediaResult};

/// JPEG quality used for live responses.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Decode JPEG/PNG bytes into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> MediaResult<RgbImage> {
    if bytes.is_empty() {
        return Err(MediaError::decode("empty image data"));
    }

    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| MediaError::decode(e.to_string()))
}

/// Encode an RGB frame as JPEG.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> MediaResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));

    frame
        .write_with_encoder(encoder)
        .map_err(|e| MediaError::encode(e.to_string()))?;

    Ok(buffer.into_inner())
}
