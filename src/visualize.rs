//! PNG renderings of probability maps and detections.

use std::path::Path;

use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use ndarray::{Array3, ArrayView2, ArrayView4, Axis};

use crate::error::Result;
use crate::geometry::Point;
use crate::preprocess;
use crate::text_region::TextRegion;

pub const POLYGON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const RECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Blue (0) to red (1) "jet" colormap.
pub fn colormap(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel = |center: f32| ((1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

pub fn heatmap(map: ArrayView2<f32>) -> RgbImage {
    let (height, width) = map.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| colormap(map[[y as usize, x as usize]]))
}

pub fn binary_map(map: ArrayView2<f32>, thresh: f32) -> GrayImage {
    let (height, width) = map.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([if map[[y as usize, x as usize]] > thresh { 255 } else { 0 }])
    })
}

/// Heatmap resized to `img` and blended over it with weight `alpha`.
pub fn overlay_heatmap(img: &RgbImage, map: ArrayView2<f32>, alpha: f32) -> RgbImage {
    let heat = imageops::resize(&heatmap(map), img.width(), img.height(), imageops::FilterType::Triangle);
    let mut out = img.clone();
    for (dst, src) in out.pixels_mut().zip(heat.pixels()) {
        for c in 0..3 {
            let blended = dst.0[c] as f32 * (1.0 - alpha) + src.0[c] as f32 * alpha;
            dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Closed outline, `thickness` pixels wide.
pub fn draw_polygon_outline(img: &mut RgbImage, points: &[Point], color: Rgb<u8>, thickness: u32) {
    let n = points.len();
    if n < 2 {
        return;
    }
    for i in 0..n {
        let (p1, p2) = (points[i], points[(i + 1) % n]);
        for t in 0..thickness.max(1) {
            let offset = t as f32 - (thickness.max(1) - 1) as f32 / 2.0;
            draw_line_segment_mut(img, (p1.x + offset, p1.y), (p2.x + offset, p2.y), color);
            draw_line_segment_mut(img, (p1.x, p1.y + offset), (p2.x, p2.y + offset), color);
        }
    }
}

pub fn draw_polygons(img: &RgbImage, regions: &[TextRegion]) -> RgbImage {
    let mut out = img.clone();
    for region in regions {
        draw_polygon_outline(&mut out, &region.points, POLYGON_COLOR, 2);
    }
    out
}

/// Draws the rotated rectangle enclosing each region.
pub fn draw_rects(img: &RgbImage, regions: &[TextRegion]) -> RgbImage {
    let mut out = img.clone();
    for region in regions {
        if let Some(quad) = region.min_area_quad() {
            draw_polygon_outline(&mut out, &quad, RECT_COLOR, 2);
        }
    }
    out
}

fn gray_to_rgb(img: &GrayImage) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let v = img.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// One row per image (at most `max_rows`): the input, then a heatmap per
/// prediction channel, then the binarized probability map.
/// `images` is `N x 3 x H x W` (normalized), `preds` is `N x C x H x W`.
pub fn prediction_grid(images: ArrayView4<f32>, preds: ArrayView4<f32>, thresh: f32, max_rows: usize) -> RgbImage {
    let (n, _, height, width) = images.dim();
    let channels = preds.len_of(Axis(1));
    let rows = n.min(max_rows).max(1);
    let cols = channels + 2;
    let (h, w) = (height as u32, width as u32);
    let mut grid = RgbImage::new(w * cols as u32, h * rows as u32);

    for row in 0..n.min(max_rows) {
        let y = (row as u32 * h) as i64;
        let input: Array3<f32> = images.index_axis(Axis(0), row).to_owned();
        imageops::overlay(&mut grid, &preprocess::denormalize(&input), 0, y);

        let pred = preds.index_axis(Axis(0), row);
        for c in 0..channels {
            let tile = heatmap(pred.index_axis(Axis(0), c));
            let tile = imageops::resize(&tile, w, h, imageops::FilterType::Nearest);
            imageops::overlay(&mut grid, &tile, ((c as u32 + 1) * w) as i64, y);
        }
        if channels > 0 {
            let binary = gray_to_rgb(&binary_map(pred.index_axis(Axis(0), 0), thresh));
            let binary = imageops::resize(&binary, w, h, imageops::FilterType::Nearest);
            imageops::overlay(&mut grid, &binary, ((channels as u32 + 1) * w) as i64, y);
        }
    }
    grid
}

pub fn save_png(img: &RgbImage, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    img.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::coord;
    use ndarray::{Array2, Array4};

    #[test]
    fn test_colormap_ends() {
        assert_eq!(colormap(0.0), Rgb([0, 0, 128]));
        assert_eq!(colormap(1.0), Rgb([128, 0, 0]));
        assert_eq!(colormap(0.5), Rgb([128, 255, 128]));
    }

    #[test]
    fn test_heatmap_and_binary_shape() {
        let mut map = Array2::<f32>::zeros((10, 20));
        map[[5, 5]] = 1.0;
        assert_eq!(heatmap(map.view()).dimensions(), (20, 10));
        let bin = binary_map(map.view(), 0.5);
        assert_eq!(bin.get_pixel(5, 5).0[0], 255);
        assert_eq!(bin.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_draw_polygons_marks_outline() {
        let img = RgbImage::new(50, 50);
        let region = TextRegion::new(
            vec![
                coord! { x: 10.0, y: 10.0 },
                coord! { x: 40.0, y: 10.0 },
                coord! { x: 40.0, y: 30.0 },
                coord! { x: 10.0, y: 30.0 },
            ],
            0.9,
        );
        let out = draw_polygons(&img, &[region.clone()]);
        assert_eq!(*out.get_pixel(25, 10), POLYGON_COLOR);
        assert_eq!(*out.get_pixel(25, 20), Rgb([0, 0, 0]));
        let rects = draw_rects(&img, &[region]);
        assert_eq!(*rects.get_pixel(10, 20), RECT_COLOR);
    }

    #[test]
    fn test_prediction_grid_layout() {
        let images = Array4::<f32>::zeros((3, 3, 32, 48));
        let preds = Array4::<f32>::zeros((3, 3, 32, 48));
        let grid = prediction_grid(images.view(), preds.view(), 0.3, 2);
        assert_eq!(grid.dimensions(), (48 * 5, 32 * 2));
    }

    #[test]
    fn test_save_png_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.png");
        save_png(&RgbImage::new(4, 4), &path).unwrap();
        assert!(path.exists());
    }
}
