use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::UploadError;
use crate::models::upload::{CompressionPreset, MAX_UPLOAD_BYTES};

/// Lowest quality the size-target loop will step down to.
const MIN_QUALITY: f32 = 0.3;
const QUALITY_STEP: f32 = 0.1;

/// JPEG output of the compressor.
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: f32,
}

/// Decode, downscale and JPEG-encode raw image bytes.
pub fn compress(data: &[u8], preset: CompressionPreset) -> Result<CompressedImage, UploadError> {
    let image = image::load_from_memory(data)?;
    compress_image(&image, preset)
}

/// Run [`compress`] on the blocking pool so decoding never stalls the runtime.
pub async fn compress_off_thread(
    data: Vec<u8>,
    preset: CompressionPreset,
) -> Result<CompressedImage, UploadError> {
    tokio::task::spawn_blocking(move || compress(&data, preset))
        .await
        .map_err(|e| UploadError::CompressionFailed(e.to_string()))?
}

/// Downscale an already decoded image and encode it under the preset.
///
/// Aspect ratio is preserved and the image is never upscaled. Presets with a
/// byte target re-encode at lower quality until the target is met or the
/// quality floor is reached. The 5 MB ceiling is checked last.
pub fn compress_image(
    image: &DynamicImage,
    preset: CompressionPreset,
) -> Result<CompressedImage, UploadError> {
    let (width, height) = scaled_dimensions(image.width(), image.height(), preset.max_dimension());

    let resized = if (width, height) == (image.width(), image.height()) {
        image.to_rgb8()
    } else {
        image.resize_exact(width, height, FilterType::Triangle).to_rgb8()
    };

    let (bytes, quality) = match preset.target_bytes() {
        Some(target) => encode_within(&resized, preset.quality(), target)?,
        None => (encode_jpeg(&resized, preset.quality())?, preset.quality()),
    };

    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(UploadError::ImageTooLarge {
            size: bytes.len(),
            limit: MAX_UPLOAD_BYTES,
        });
    }

    Ok(CompressedImage {
        bytes,
        width,
        height,
        quality,
    })
}

/// Encode at `quality`, stepping down towards `MIN_QUALITY` until the output
/// fits in `target` bytes. The last step lands on the floor exactly.
fn encode_within(
    image: &image::RgbImage,
    mut quality: f32,
    target: usize,
) -> Result<(Vec<u8>, f32), UploadError> {
    let mut bytes = encode_jpeg(image, quality)?;
    while bytes.len() > target && quality > MIN_QUALITY + f32::EPSILON {
        quality = (quality - QUALITY_STEP).max(MIN_QUALITY);
        bytes = encode_jpeg(image, quality)?;
        tracing::debug!(
            size = bytes.len(),
            target_bytes = target,
            quality,
            "Re-encoded image at lower quality"
        );
    }
    Ok((bytes, quality))
}

/// Fit `width` x `height` inside a square of `max_dimension`, shrinking only.
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension || longest == 0 {
        return (width, height);
    }

    let scale = max_dimension as f64 / longest as f64;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, max_dimension);
    (scaled(width), scaled(height))
}

fn encode_jpeg(image: &image::RgbImage, quality: f32) -> Result<Vec<u8>, UploadError> {
    let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(image)
        .map_err(|e| UploadError::CompressionFailed(e.to_string()))?;
    Ok(buffer)
}
