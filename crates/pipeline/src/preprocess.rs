//! Image decode, crop and normalization ahead of model inference and OCR.

use std::io::Cursor;

use docuflow_core::BoundingBox;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to encode processed image: {0}")]
    Encode(String),
    #[error("region lies outside the image bounds")]
    EmptyRegion,
}

/// Decode raw image bytes (JPEG / PNG / WEBP / …).
pub fn decode_image(data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    Ok(image::load_from_memory(data)?)
}

/// Cut a detected region out of the source image. The box is clamped to the
/// image bounds; a box entirely outside them is an error.
pub fn crop_region(
    img: &DynamicImage,
    bounds: &BoundingBox,
) -> Result<DynamicImage, PreprocessError> {
    let clamped = bounds
        .clamp_to(img.width(), img.height())
        .ok_or(PreprocessError::EmptyRegion)?;
    Ok(img.crop_imm(clamped.x, clamped.y, clamped.width, clamped.height))
}

/// Grayscale + contrast stretch, downscaling very large scans first.
pub fn normalize_for_ocr(img: DynamicImage) -> DynamicImage {
    // Cloud OCR engines work best around 300 DPI / ~2000 px; beyond that the
    // upload cost outweighs any accuracy gain.
    let img = if img.width() > 2800 || img.height() > 2800 {
        img.resize(2800, 2800, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let gray: GrayImage = img.to_luma8();

    let (min_px, max_px) = gray
        .pixels()
        .fold((255u8, 0u8), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));

    if max_px == min_px {
        // Uniform image — nothing to stretch.
        return DynamicImage::ImageLuma8(gray);
    }

    let range = (max_px - min_px) as u32;
    let stretched: GrayImage = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0];
        let v = ((p - min_px) as u32 * 255 / range) as u8;
        Luma([v])
    });

    DynamicImage::ImageLuma8(stretched)
}

/// Encode as PNG bytes, the format both cloud adapters accept.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_gray(width: u32, height: u32, value: u8) -> DynamicImage {
        let img: GrayImage = ImageBuffer::from_fn(width, height, |_, _| Luma([value]));
        DynamicImage::ImageLuma8(img)
    }

    fn gradient_gray(width: u32, height: u32) -> DynamicImage {
        let img: GrayImage =
            ImageBuffer::from_fn(width, height, |x, _| Luma([(x * 255 / width) as u8]));
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_image(b"not an image at all"),
            Err(PreprocessError::Decode(_))
        ));
    }

    #[test]
    fn crop_clamps_overhanging_region() {
        let img = solid_gray(100, 100, 128);
        let cropped = crop_region(&img, &BoundingBox::new(60, 60, 100, 100)).unwrap();
        assert_eq!(cropped.width(), 40);
        assert_eq!(cropped.height(), 40);
    }

    #[test]
    fn crop_rejects_region_outside_image() {
        let img = solid_gray(50, 50, 128);
        assert!(matches!(
            crop_region(&img, &BoundingBox::new(200, 200, 10, 10)),
            Err(PreprocessError::EmptyRegion)
        ));
    }

    #[test]
    fn normalize_uniform_image_is_unchanged_in_size() {
        let result = normalize_for_ocr(solid_gray(10, 10, 128));
        assert_eq!(result.width(), 10);
        assert_eq!(result.height(), 10);
    }

    #[test]
    fn normalize_stretches_gradient_to_full_range() {
        let result = normalize_for_ocr(gradient_gray(256, 1));
        let gray = result.to_luma8();
        let min = gray.pixels().map(|p| p[0]).min().unwrap();
        let max = gray.pixels().map(|p| p[0]).max().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn normalize_downscales_large_scans() {
        let img: GrayImage = ImageBuffer::from_fn(3000, 3000, |_, _| Luma([200u8]));
        let result = normalize_for_ocr(DynamicImage::ImageLuma8(img));
        assert!(result.width() <= 2800 && result.height() <= 2800);
    }

    #[test]
    fn encode_produces_png_header() {
        let bytes = encode_png(&solid_gray(4, 4, 100)).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
    }
}
