//! Probability map to text regions.

use geo_types::coord;
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use ndarray::{s, Array2, ArrayView2};

use crate::config::TestConfig;
use crate::geometry::{self, Point};
use crate::text_region::TextRegion;

#[derive(Debug, Clone, Copy)]
pub struct DbPostProcess {
    /// Binarization threshold on the probability map.
    pub thresh: f32,
    /// Minimum mean probability inside a candidate.
    pub box_thresh: f32,
    pub max_candidates: usize,
    pub unclip_ratio: f32,
    /// Minimum short side, in probability-map pixels.
    pub min_size: f32,
}

impl Default for DbPostProcess {
    fn default() -> Self {
        Self {
            thresh: 0.3,
            box_thresh: 0.7,
            max_candidates: 1000,
            unclip_ratio: 1.5,
            min_size: 3.0,
        }
    }
}

impl From<&TestConfig> for DbPostProcess {
    fn from(cfg: &TestConfig) -> Self {
        Self {
            thresh: cfg.thresh,
            box_thresh: cfg.box_thresh,
            max_candidates: cfg.max_candidates,
            unclip_ratio: cfg.unclip_ratio,
            min_size: cfg.min_size,
        }
    }
}

impl DbPostProcess {
    /// Extracts regions from `pred` and maps them onto a `dest_width x dest_height` image.
    pub fn represent(
        &self,
        pred: ArrayView2<f32>,
        dest_width: u32,
        dest_height: u32,
        output_polygon: bool,
    ) -> Vec<TextRegion> {
        let bitmap = self.binarize(pred);
        if output_polygon {
            self.polygons_from_bitmap(pred, &bitmap, dest_width, dest_height)
        } else {
            self.boxes_from_bitmap(pred, &bitmap, dest_width, dest_height)
        }
    }

    pub fn binarize(&self, pred: ArrayView2<f32>) -> GrayImage {
        let (height, width) = pred.dim();
        GrayImage::from_fn(width as u32, height as u32, |x, y| {
            if pred[[y as usize, x as usize]] > self.thresh {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    fn outer_contours(&self, bitmap: &GrayImage) -> Vec<Vec<Point>> {
        find_contours::<u32>(bitmap)
            .iter()
            .filter(|c| c.border_type == BorderType::Outer)
            .take(self.max_candidates)
            .map(geometry::contour_points)
            .collect()
    }

    fn polygons_from_bitmap(
        &self,
        pred: ArrayView2<f32>,
        bitmap: &GrayImage,
        dest_width: u32,
        dest_height: u32,
    ) -> Vec<TextRegion> {
        let (width, height) = bitmap.dimensions();
        let mut regions = Vec::new();

        for contour in self.outer_contours(bitmap) {
            let epsilon = 0.005 * geometry::polygon_perimeter(&contour);
            let points = geometry::approx_poly_dp(&contour, epsilon);
            if points.len() < 4 {
                continue;
            }
            let score = box_score_fast(pred, &points);
            if score < self.box_thresh {
                continue;
            }
            let Some(expanded) = geometry::unclip(&points, self.unclip_ratio) else {
                continue;
            };
            match geometry::mini_box(&expanded) {
                Some((_, short)) if short >= self.min_size + 2.0 => {}
                _ => continue,
            }
            let mut region = TextRegion::new(expanded, score);
            region.transform(rescale(width, height, dest_width, dest_height));
            regions.push(region);
        }
        regions
    }

    fn boxes_from_bitmap(
        &self,
        pred: ArrayView2<f32>,
        bitmap: &GrayImage,
        dest_width: u32,
        dest_height: u32,
    ) -> Vec<TextRegion> {
        let (width, height) = bitmap.dimensions();
        let mut regions = Vec::new();

        for contour in self.outer_contours(bitmap) {
            let Some((quad, short)) = geometry::mini_box(&contour) else {
                continue;
            };
            if short < self.min_size {
                continue;
            }
            let score = box_score_fast(pred, &quad);
            if score < self.box_thresh {
                continue;
            }
            let Some(expanded) = geometry::unclip(&quad, self.unclip_ratio) else {
                continue;
            };
            let Some((quad, short)) = geometry::mini_box(&expanded) else {
                continue;
            };
            if short < self.min_size + 2.0 {
                continue;
            }
            let mut region = TextRegion::from_quad(quad, score);
            region.transform(rescale(width, height, dest_width, dest_height));
            regions.push(region);
        }
        regions
    }
}

/// Maps bitmap coordinates to the destination size, rounded and clamped.
fn rescale(width: u32, height: u32, dest_width: u32, dest_height: u32) -> impl Fn(Point) -> Point {
    let sx = dest_width as f32 / width as f32;
    let sy = dest_height as f32 / height as f32;
    move |p| coord! {
        x: (p.x * sx).round().clamp(0.0, dest_width as f32),
        y: (p.y * sy).round().clamp(0.0, dest_height as f32),
    }
}

/// Mean of `pred` over the polygon, computed inside its clipped bounding box.
pub fn box_score_fast(pred: ArrayView2<f32>, points: &[Point]) -> f32 {
    let (height, width) = pred.dim();
    let Some(bounds) = geometry::bounding_rect(points) else {
        return 0.0;
    };
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    let xmin = bounds.min().x.floor().clamp(0.0, max_x) as usize;
    let xmax = bounds.max().x.ceil().clamp(0.0, max_x) as usize;
    let ymin = bounds.min().y.floor().clamp(0.0, max_y) as usize;
    let ymax = bounds.max().y.ceil().clamp(0.0, max_y) as usize;

    let mut mask = Array2::<f32>::zeros((ymax - ymin + 1, xmax - xmin + 1));
    let shifted: Vec<Point> = points
        .iter()
        .map(|p| coord! { x: p.x - xmin as f32, y: p.y - ymin as f32 })
        .collect();
    geometry::fill_polygon(&mut mask, &shifted, 1.0);

    let covered = mask.sum();
    if covered <= 0.0 {
        return 0.0;
    }
    let window = pred.slice(s![ymin..=ymax, xmin..=xmax]);
    (&window * &mask).sum() / covered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_map() -> Array2<f32> {
        let mut pred = Array2::<f32>::zeros((64, 128));
        pred.slice_mut(s![20..40, 10..90]).fill(0.9);
        pred
    }

    #[test]
    fn test_box_score_fast() {
        let pred = blob_map();
        let inside = [
            coord! { x: 20.0, y: 25.0 },
            coord! { x: 60.0, y: 25.0 },
            coord! { x: 60.0, y: 35.0 },
            coord! { x: 20.0, y: 35.0 },
        ];
        assert!((box_score_fast(pred.view(), &inside) - 0.9).abs() < 1e-5);

        let outside = [
            coord! { x: 100.0, y: 45.0 },
            coord! { x: 120.0, y: 45.0 },
            coord! { x: 120.0, y: 60.0 },
            coord! { x: 100.0, y: 60.0 },
        ];
        assert_eq!(box_score_fast(pred.view(), &outside), 0.0);
    }

    #[test]
    fn test_boxes_cover_blob() {
        let pred = blob_map();
        let post = DbPostProcess::default();
        let regions = post.represent(pred.view(), 128, 64, false);
        assert_eq!(regions.len(), 1);

        let region = &regions[0];
        assert!(region.is_quad());
        assert!((region.score - 0.9).abs() < 1e-3);
        // the unclipped box contains the blob
        let bbox = region.bbox();
        assert!(bbox.min().x <= 10.0 && bbox.max().x >= 89.0);
        assert!(bbox.min().y <= 20.0 && bbox.max().y >= 39.0);
    }

    #[test]
    fn test_rescale_rounds_and_clamps() {
        let mut region = TextRegion::new(vec![coord! { x: 70.0, y: 10.2 }, coord! { x: -1.0, y: 3.0 }], 1.0);
        region.transform(rescale(64, 64, 128, 32));
        assert_eq!(region.points, vec![coord! { x: 128.0, y: 5.0 }, coord! { x: 0.0, y: 2.0 }]);
    }

    #[test]
    fn test_boxes_rescaled_to_destination() {
        let pred = blob_map();
        let post = DbPostProcess::default();
        let regions = post.represent(pred.view(), 256, 128, false);
        assert_eq!(regions.len(), 1);
        let bbox = regions[0].bbox();
        assert!(bbox.min().x <= 20.0 && bbox.max().x >= 178.0);
        assert!(bbox.max().x <= 256.0 && bbox.max().y <= 128.0);
    }

    #[test]
    fn test_polygon_mode() {
        let pred = blob_map();
        let post = DbPostProcess::default();
        let regions = post.represent(pred.view(), 128, 64, true);
        assert_eq!(regions.len(), 1);
        assert!(regions[0].points.len() >= 4);
        assert!(regions[0].area() > 80.0 * 20.0);
    }

    #[test]
    fn test_low_scores_and_small_blobs_dropped() {
        let mut pred = Array2::<f32>::zeros((64, 64));
        // above thresh, below box_thresh
        pred.slice_mut(s![10..30, 10..50]).fill(0.5);
        // confident but tiny
        pred.slice_mut(s![50..52, 50..52]).fill(0.95);
        let regions = DbPostProcess::default().represent(pred.view(), 64, 64, false);
        assert!(regions.is_empty());
    }

    #[test]
    fn test_empty_map() {
        let pred = Array2::<f32>::zeros((32, 32));
        assert!(DbPostProcess::default().represent(pred.view(), 32, 32, true).is_empty());
    }
}
