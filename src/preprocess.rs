//! Image to network-input conversion shared by both inference backends and
//! the training data pipeline.

use image::{imageops, DynamicImage, RgbImage};
use ndarray::{Array3, Array4, Axis};

/// ImageNet channel statistics, RGB order.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A resized, normalized image ready for the network.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// `1 x 3 x H x W`.
    pub input: Array4<f32>,
    pub orig_width: u32,
    pub orig_height: u32,
}

/// Scales so the long side equals `max_side`, then rounds both sides to a
/// multiple of 32 (at least 32).
pub fn inference_size(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let scale = max_side as f32 / width.max(height).max(1) as f32;
    let round32 = |v: f32| (((v / 32.0).round() as u32).max(1)) * 32;
    (round32(width as f32 * scale), round32(height as f32 * scale))
}

/// Normalized CHW array from an RGB image.
pub fn normalize(img: &RgbImage) -> Array3<f32> {
    let (width, height) = img.dimensions();
    let mut out = Array3::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            out[[c, y as usize, x as usize]] = (pixel.0[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    out
}

/// Inverse of [`normalize`], for visualizations.
pub fn denormalize(input: &Array3<f32>) -> RgbImage {
    let (_, height, width) = input.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let mut rgb = [0u8; 3];
        for (c, v) in rgb.iter_mut().enumerate() {
            let value = (input[[c, y as usize, x as usize]] * STD[c] + MEAN[c]) * 255.0;
            *v = value.round().clamp(0.0, 255.0) as u8;
        }
        image::Rgb(rgb)
    })
}

pub fn prepare(img: &DynamicImage, max_side: u32) -> PreparedImage {
    let (orig_width, orig_height) = (img.width(), img.height());
    let (width, height) = inference_size(orig_width, orig_height, max_side);
    let resized = imageops::resize(&img.to_rgb8(), width, height, imageops::FilterType::Triangle);

    PreparedImage {
        input: normalize(&resized).insert_axis(Axis(0)),
        orig_width,
        orig_height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_size_is_multiple_of_32() {
        assert_eq!(inference_size(1280, 720, 736), (736, 416));
        assert_eq!(inference_size(10, 10, 736), (736, 736));
        let (w, h) = inference_size(1000, 30, 640);
        assert_eq!((w % 32, h % 32), (0, 0));
        assert!(h >= 32);
    }

    #[test]
    fn test_normalize_roundtrip() {
        let img = RgbImage::from_pixel(4, 3, image::Rgb([200, 10, 90]));
        let arr = normalize(&img);
        assert_eq!(arr.dim(), (3, 3, 4));
        assert_eq!(denormalize(&arr).get_pixel(2, 1).0, [200, 10, 90]);
    }

    #[test]
    fn test_prepare_shape() {
        let img = DynamicImage::new_rgb8(300, 100);
        let prepared = prepare(&img, 320);
        assert_eq!(prepared.input.dim(), (1, 3, 96, 320));
        assert_eq!((prepared.orig_width, prepared.orig_height), (300, 100));
    }
}
