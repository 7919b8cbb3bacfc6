//! Geometric augmentation applied jointly to an image and its polygons.

use geo_types::coord;
use image::{imageops, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use rand::Rng;

use super::annotation::Annotation;
use crate::geometry;

#[derive(Debug, Clone, Copy)]
pub struct AugmentConfig {
    pub flip_prob: f64,
    /// Maximum absolute rotation in degrees.
    pub max_rotation: f32,
    pub scale_range: (f32, f32),
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            flip_prob: 0.5,
            max_rotation: 10.0,
            scale_range: (0.5, 1.5),
        }
    }
}

fn map_points(annotations: &mut [Annotation], f: impl Fn(f32, f32) -> (f32, f32)) {
    for ann in annotations.iter_mut() {
        for p in ann.points.iter_mut() {
            let (x, y) = f(p.x, p.y);
            *p = coord! { x: x, y: y };
        }
    }
}

pub fn flip_horizontal(img: &RgbImage, annotations: &mut [Annotation]) -> RgbImage {
    let width = img.width() as f32;
    map_points(annotations, |x, y| (width - 1.0 - x, y));
    imageops::flip_horizontal(img)
}

/// Rotates about the image center; corners uncovered by the rotation are black.
pub fn rotate(img: &RgbImage, annotations: &mut [Annotation], degrees: f32) -> RgbImage {
    let (cx, cy) = (img.width() as f32 / 2.0, img.height() as f32 / 2.0);
    let projection = Projection::translate(cx, cy)
        * Projection::rotate(degrees.to_radians())
        * Projection::translate(-cx, -cy);
    map_points(annotations, |x, y| projection * (x, y));
    warp(img, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]))
}

pub fn resize(img: &RgbImage, annotations: &mut [Annotation], width: u32, height: u32) -> RgbImage {
    let sx = width as f32 / img.width() as f32;
    let sy = height as f32 / img.height() as f32;
    map_points(annotations, |x, y| (x * sx, y * sy));
    imageops::resize(img, width, height, imageops::FilterType::Triangle)
}

/// Crops a `size x size` window, zero-padding when the image is smaller.
/// The window is centered near a random non-ignored text instance when there
/// is one. Polygons left entirely outside the window are dropped.
pub fn random_crop<R: Rng>(
    img: &RgbImage,
    annotations: Vec<Annotation>,
    size: u32,
    rng: &mut R,
) -> (RgbImage, Vec<Annotation>) {
    let (width, height) = img.dimensions();
    let max_x0 = width.saturating_sub(size);
    let max_y0 = height.saturating_sub(size);

    let cared: Vec<&Annotation> = annotations.iter().filter(|a| !a.ignore).collect();
    let (x0, y0) = match cared.get(rng.gen_range(0..cared.len().max(1))) {
        Some(ann) => {
            let center = geometry::bounding_rect(&ann.points)
                .map(|r| r.center())
                .unwrap_or(coord! { x: 0.0, y: 0.0 });
            let jitter = size as f32 / 4.0;
            let cx = center.x + rng.gen_range(-jitter..=jitter);
            let cy = center.y + rng.gen_range(-jitter..=jitter);
            (
                ((cx - size as f32 / 2.0).max(0.0) as u32).min(max_x0),
                ((cy - size as f32 / 2.0).max(0.0) as u32).min(max_y0),
            )
        }
        None => (rng.gen_range(0..=max_x0), rng.gen_range(0..=max_y0)),
    };

    let crop_w = size.min(width);
    let crop_h = size.min(height);
    let mut canvas = RgbImage::new(size, size);
    let cropped = imageops::crop_imm(img, x0, y0, crop_w, crop_h).to_image();
    imageops::replace(&mut canvas, &cropped, 0, 0);

    let (fx, fy, limit) = (x0 as f32, y0 as f32, size as f32);
    let mut kept: Vec<Annotation> = annotations
        .into_iter()
        .filter(|ann| {
            geometry::bounding_rect(&ann.points).map_or(false, |r| {
                r.max().x >= fx && r.max().y >= fy && r.min().x < fx + limit && r.min().y < fy + limit
            })
        })
        .collect();
    map_points(&mut kept, |x, y| (x - fx, y - fy));
    (canvas, kept)
}

/// Training-time augmentation: flip, rotation, scaling, then a square crop.
pub fn augment<R: Rng>(
    img: &RgbImage,
    mut annotations: Vec<Annotation>,
    size: u32,
    cfg: &AugmentConfig,
    rng: &mut R,
) -> (RgbImage, Vec<Annotation>) {
    let mut img = img.clone();
    if rng.gen_bool(cfg.flip_prob) {
        img = flip_horizontal(&img, &mut annotations);
    }
    if cfg.max_rotation > 0.0 {
        let degrees = rng.gen_range(-cfg.max_rotation..=cfg.max_rotation);
        img = rotate(&img, &mut annotations, degrees);
    }
    let (lo, hi) = cfg.scale_range;
    let scale = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
    let new_w = ((img.width() as f32 * scale).round() as u32).max(1);
    let new_h = ((img.height() as f32 * scale).round() as u32).max(1);
    img = resize(&img, &mut annotations, new_w, new_h);

    random_crop(&img, annotations, size, rng)
}
