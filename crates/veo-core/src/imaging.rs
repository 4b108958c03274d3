//! Image preparation for the providers
//!
//! Everything here is synchronous and CPU bound. Callers on the runtime
//! wrap it in `spawn_blocking`.

use crate::error::VeoError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

/// Longest side of an image sent to a provider
pub const MAX_UPLOAD_SIDE: u32 = 1024;

const UPLOAD_JPEG_QUALITY: u8 = 95;

/// Open any supported image and convert it to RGB
pub fn load_rgb(path: &Path) -> Result<RgbImage, VeoError> {
    Ok(image::open(path)?.to_rgb8())
}

/// Shrink so the longest side is at most `max_side`, keeping the aspect ratio
pub fn shrink_to_fit(img: RgbImage, max_side: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    let longest = width.max(height);
    if longest <= max_side {
        return img;
    }
    let ratio = max_side as f64 / longest as f64;
    let new_width = ((width as f64 * ratio) as u32).max(1);
    let new_height = ((height as f64 * ratio) as u32).max(1);
    image::imageops::resize(&img, new_width, new_height, FilterType::Lanczos3)
}

pub fn resize_exact(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    image::imageops::resize(img, width, height, FilterType::Lanczos3)
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, VeoError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(buf)
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, VeoError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Load an image for the cloud API: RGB, shrunk to fit, JPEG, base64
pub fn prepare_upload(path: &Path) -> Result<String, VeoError> {
    let img = shrink_to_fit(load_rgb(path)?, MAX_UPLOAD_SIDE);
    Ok(STANDARD.encode(encode_jpeg(&img, UPLOAD_JPEG_QUALITY)?))
}

pub fn to_base64_png(img: &RgbImage) -> Result<String, VeoError> {
    Ok(STANDARD.encode(encode_png(img)?))
}

pub fn decode_base64_image(data: &str) -> Result<RgbImage, VeoError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| VeoError::Serialization(format!("invalid base64 frame: {}", e)))?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}

/// Conditioning image used by image-to-video pipelines when the request
/// carries none: a flat blue background with five circles across the middle
pub fn placeholder_image(width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([100, 150, 200]));

    for i in 0..5u32 {
        let cx = ((i + 1) * width / 6) as i64;
        let cy = (height / 2) as i64;
        let radius = (50 + i * 10) as i64;
        let color = Rgb([(255 - i * 50) as u8, (100 + i * 30) as u8, (150 + i * 20) as u8]);

        let x0 = (cx - radius).max(0);
        let x1 = (cx + radius).min(width as i64 - 1);
        let y0 = (cy - radius).max(0);
        let y1 = (cy + radius).min(height as i64 - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let (dx, dy) = (x - cx, y - cy);
                if dx * dx + dy * dy <= radius * radius {
                    img.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }

    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shrink_keeps_aspect_ratio() {
        let img = RgbImage::new(2048, 1024);
        let shrunk = shrink_to_fit(img, MAX_UPLOAD_SIDE);
        assert_eq!(shrunk.dimensions(), (1024, 512));

        let small = RgbImage::new(640, 480);
        assert_eq!(shrink_to_fit(small, MAX_UPLOAD_SIDE).dimensions(), (640, 480));
    }

    #[test]
    fn test_prepare_upload_produces_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.png");
        RgbImage::from_pixel(1500, 300, Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let encoded = prepare_upload(&path).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 1024);
    }

    #[test]
    fn test_png_base64_round_trip() {
        let img = RgbImage::from_pixel(8, 4, Rgb([1, 2, 3]));
        let decoded = decode_base64_image(&to_base64_png(&img).unwrap()).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_placeholder_image() {
        let img = placeholder_image(1024, 576);
        assert_eq!(img.dimensions(), (1024, 576));
        assert_eq!(*img.get_pixel(0, 0), Rgb([100, 150, 200]));
        // centre of the first circle
        assert_eq!(*img.get_pixel(1024 / 6, 288), Rgb([255, 100, 150]));
        // centre of the last circle
        assert_eq!(*img.get_pixel(5 * 1024 / 6, 288), Rgb([55, 220, 230]));
    }
}
