//! Deterministic image preprocessing: encoded bytes to a normalized NCHW tensor
//!
//! Both policies follow the standard ImageNet evaluation transform: resize the
//! shorter side, center-crop a square, scale to `[0, 1]`, then normalize per
//! channel. They differ only in the resampling filter.

use crate::error::{InferenceError, InferenceResult};
use crate::models::{Architecture, ModelKind};
use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};

/// Per-channel mean of the ImageNet training set (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation of the ImageNet training set (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize edge used with the canonical 224px crop
const REFERENCE_RESIZE: u32 = 256;
const REFERENCE_CROP: u32 = 224;

/// Aspect ratio above which the long axis is cut down before resizing
const MAX_ASPECT: u32 = 4;
/// Aspect ratio of the band kept along the long axis
const BAND_ASPECT: u32 = 2;

/// Resampling policy applied before the center crop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessPolicy {
    /// Bicubic resize, used for transformer-style models
    Bicubic,
    /// Bilinear resize, used for convnet-style models
    Bilinear,
}

impl PreprocessPolicy {
    /// Policy for an architecture family
    #[must_use]
    pub const fn for_kind(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Transformer => Self::Bicubic,
            ModelKind::ConvNet => Self::Bilinear,
        }
    }

    /// Policy for an architecture
    #[must_use]
    pub const fn for_architecture(architecture: Architecture) -> Self {
        Self::for_kind(architecture.family())
    }

    const fn filter(self) -> FilterType {
        match self {
            Self::Bicubic => FilterType::CatmullRom,
            Self::Bilinear => FilterType::Triangle,
        }
    }

    /// Short description of the full transform for a given crop size
    #[must_use]
    pub fn describe(self, input_size: u32) -> String {
        let filter = match self {
            Self::Bicubic => "bicubic",
            Self::Bilinear => "bilinear",
        };
        format!(
            "resize {}px {filter} / center-crop {input_size}px / imagenet-normalize",
            resize_edge(input_size)
        )
    }
}

/// Shorter-side resize target for a given crop size (256 for 224)
#[must_use]
pub fn resize_edge(input_size: u32) -> u32 {
    let scaled = f64::from(input_size) * f64::from(REFERENCE_RESIZE) / f64::from(REFERENCE_CROP);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let edge = scaled.round() as u32;
    edge.max(input_size)
}

/// Decode `bytes` and transform them into a `[1, 3, input_size, input_size]`
/// f32 tensor on the CPU
pub fn preprocess(
    bytes: &[u8],
    input_size: u32,
    architecture: Architecture,
) -> InferenceResult<Tensor> {
    let policy = PreprocessPolicy::for_architecture(architecture);
    let rgb = decode_rgb(bytes)?;
    let cropped = resize_and_crop(&rgb, input_size, policy);
    to_normalized_tensor(&cropped)
}

/// Decode any supported format into 8-bit RGB
pub fn decode_rgb(bytes: &[u8]) -> InferenceResult<RgbImage> {
    if bytes.is_empty() {
        return Err(InferenceError::ImageDecode("empty image payload".to_string()));
    }

    let format = image::guess_format(bytes).map_err(|e| InferenceError::ImageDecode(e.to_string()))?;
    // The JPEG decoder pads a cut-off scan instead of failing
    if format == ImageFormat::Jpeg && !jpeg_scan_is_terminated(bytes) {
        return Err(InferenceError::ImageDecode(
            "truncated JPEG: no end-of-image marker after the last scan".to_string(),
        ));
    }

    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| InferenceError::ImageDecode(e.to_string()))?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(InferenceError::ImageDecode(format!(
            "image has zero extent ({}x{})",
            decoded.width(),
            decoded.height()
        )));
    }

    Ok(decoded.to_rgb8())
}

/// Whether an EOI marker follows the start of the last scan. Entropy-coded
/// data byte-stuffs `0xFF`, so neither marker can occur inside a scan.
fn jpeg_scan_is_terminated(bytes: &[u8]) -> bool {
    const SOS: [u8; 2] = [0xFF, 0xDA];
    const EOI: [u8; 2] = [0xFF, 0xD9];

    bytes
        .windows(2)
        .rposition(|pair| pair == SOS)
        .is_some_and(|start| bytes[start + 2..].windows(2).any(|pair| pair == EOI))
}

fn resize_and_crop(rgb: &RgbImage, input_size: u32, policy: PreprocessPolicy) -> RgbImage {
    let edge = resize_edge(input_size);

    // Past MAX_ASPECT only a central band of the long axis can reach the
    // crop; resizing the whole strip would allocate edge * edge * aspect.
    let band;
    let rgb = {
        let (width, height) = rgb.dimensions();
        let (short, long) = (width.min(height), width.max(height));
        if long / short > MAX_ASPECT {
            let keep = short.saturating_mul(BAND_ASPECT).min(long);
            let offset = (long - keep) / 2;
            band = if width < height {
                imageops::crop_imm(rgb, 0, offset, width, keep).to_image()
            } else {
                imageops::crop_imm(rgb, offset, 0, keep, height).to_image()
            };
            &band
        } else {
            rgb
        }
    };
    let (width, height) = rgb.dimensions();

    // Shorter side goes to `edge`; the longer side keeps the aspect ratio,
    // truncated, and never drops below the crop.
    let (new_width, new_height) = if width <= height {
        (edge, scale_long_side(height, width, edge).max(input_size))
    } else {
        (scale_long_side(width, height, edge).max(input_size), edge)
    };

    let resized = imageops::resize(rgb, new_width, new_height, policy.filter());

    let left = center_offset(new_width - input_size);
    let top = center_offset(new_height - input_size);
    imageops::crop_imm(&resized, left, top, input_size, input_size).to_image()
}

/// Half of `excess`, rounded half to even like the reference center crop
fn center_offset(excess: u32) -> u32 {
    let half = excess / 2;
    if excess % 2 == 1 && half % 2 == 1 {
        half + 1
    } else {
        half
    }
}

fn scale_long_side(long: u32, short: u32, edge: u32) -> u32 {
    let scaled = u64::from(edge) * u64::from(long) / u64::from(short);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

fn to_normalized_tensor(image: &RgbImage) -> InferenceResult<Tensor> {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);
    let plane = width * height;

    let mut chw = vec![0f32; 3 * plane];
    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for channel in 0..3 {
            let value = f32::from(pixel[channel]) / 255.0;
            chw[channel * plane + offset] = (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
        }
    }

    Ok(Tensor::from_vec(chw, (1, 3, height, width), &Device::Cpu)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut buffer), format)
            .unwrap();
        buffer
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
        })
    }

    #[test]
    fn test_resize_edge() {
        assert_eq!(resize_edge(224), 256);
        assert_eq!(resize_edge(64), 73);
        assert_eq!(resize_edge(384), 439);
    }

    #[test]
    fn test_policy_by_family() {
        assert_eq!(PreprocessPolicy::for_architecture(Architecture::VitB16), PreprocessPolicy::Bicubic);
        assert_eq!(PreprocessPolicy::for_architecture(Architecture::ResNet50), PreprocessPolicy::Bilinear);
        assert!(PreprocessPolicy::Bicubic.describe(224).contains("resize 256px bicubic"));
    }

    #[test]
    fn test_output_shape_for_non_square_input() {
        let bytes = encode(gradient(320, 200), ImageFormat::Png);
        let tensor = preprocess(&bytes, 224, Architecture::ResNet18).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
        assert_eq!(tensor.dtype(), candle_core::DType::F32);
    }

    #[test]
    fn test_small_input_is_upscaled() {
        let bytes = encode(gradient(10, 30), ImageFormat::Png);
        let tensor = preprocess(&bytes, 224, Architecture::VitB16).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_deterministic() {
        let bytes = encode(gradient(300, 260), ImageFormat::Jpeg);
        let a = preprocess(&bytes, 224, Architecture::VitB16).unwrap();
        let b = preprocess(&bytes, 224, Architecture::VitB16).unwrap();
        let a: Vec<f32> = a.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = b.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_policies_differ() {
        let bytes = encode(gradient(500, 333), ImageFormat::Png);
        let bicubic: Vec<f32> = preprocess(&bytes, 224, Architecture::VitB16)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let bilinear: Vec<f32> = preprocess(&bytes, 224, Architecture::ResNet50)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_ne!(bicubic, bilinear);
    }

    #[test]
    fn test_normalization_of_uniform_image() {
        let white = RgbImage::from_pixel(256, 256, Rgb([255, 255, 255]));
        let bytes = encode(white, ImageFormat::Png);
        let tensor = preprocess(&bytes, 224, Architecture::ResNet18).unwrap();
        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        let plane = 224 * 224;
        for channel in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            assert!((values[channel * plane] - expected).abs() < 1e-5);
            assert!((values[(channel + 1) * plane - 1] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_grayscale_converted_to_rgb() {
        let gray = image::GrayImage::from_pixel(240, 240, image::Luma([90]));
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let tensor = preprocess(&bytes, 224, Architecture::ResNet18).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
    }

    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ (x * y);
            Rgb([(v % 251) as u8, (v / 7 % 241) as u8, (v / 13 % 239) as u8])
        })
    }

    #[test]
    fn test_corrupt_bytes_fail_with_decode_error() {
        let mut png = encode(gradient(224, 224), ImageFormat::Png);
        png.truncate(png.len() / 2);
        let mut jpeg = encode(gradient(224, 224), ImageFormat::Jpeg);
        jpeg.truncate(100);

        for payload in [Vec::new(), b"definitely not an image".to_vec(), png, jpeg] {
            match preprocess(&payload, 224, Architecture::ResNet50) {
                Err(InferenceError::ImageDecode(_)) => {}
                other => panic!("expected ImageDecode, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_jpeg_cut_inside_scan_data() {
        let jpeg = encode(textured(224, 224), ImageFormat::Jpeg);
        assert!(preprocess(&jpeg, 224, Architecture::ResNet50).is_ok());

        for percent in [90, 75, 50, 30] {
            let cut = jpeg.len() * percent / 100;
            match preprocess(&jpeg[..cut], 224, Architecture::ResNet50) {
                Err(InferenceError::ImageDecode(message)) => assert!(message.contains("truncated")),
                other => panic!("cut at {percent}%: expected ImageDecode, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_jpeg_with_trailing_padding_is_accepted() {
        let mut jpeg = encode(textured(64, 64), ImageFormat::Jpeg);
        jpeg.extend_from_slice(&[0; 16]);
        assert!(decode_rgb(&jpeg).is_ok());
    }

    #[test]
    fn test_extreme_aspect_ratios() {
        let tall = encode(gradient(1, 40_000), ImageFormat::Png);
        let wide = encode(gradient(40_000, 1), ImageFormat::Png);

        for bytes in [tall, wide] {
            let tensor = preprocess(&bytes, 224, Architecture::ResNet50).unwrap();
            assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
        }
    }

    #[test]
    fn test_moderate_aspect_ratio_is_not_banded() {
        // 4:1 stays on the full-resize path
        let strip = gradient(400, 100);
        let cropped = resize_and_crop(&strip, 224, PreprocessPolicy::Bilinear);
        assert_eq!(cropped.dimensions(), (224, 224));
    }

    #[test]
    fn test_center_offset_rounds_half_to_even() {
        assert_eq!(center_offset(0), 0);
        assert_eq!(center_offset(1), 0);
        assert_eq!(center_offset(3), 2);
        assert_eq!(center_offset(4), 2);
        assert_eq!(center_offset(5), 2);
        assert_eq!(center_offset(32), 16);
        assert_eq!(center_offset(119), 60);
    }
}
