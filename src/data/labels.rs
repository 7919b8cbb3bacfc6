//! Training targets: shrunk probability map, supervision mask, threshold map
//! and text-area map.

use geo_types::coord;
use ndarray::Array2;

use super::annotation::Annotation;
use crate::config::LabelConfig;
use crate::geometry::{self, fill_polygon, Point};

#[derive(Debug, Clone)]
pub struct LabelMaps {
    pub prob_map: Array2<f32>,
    pub supervision_mask: Array2<f32>,
    pub threshold_map: Array2<f32>,
    pub text_area_map: Array2<f32>,
}

/// Builds every target map for an image of `height x width`.
/// `annotations` must already be in that image's coordinate frame.
pub fn make_label_maps(
    annotations: &[Annotation],
    height: usize,
    width: usize,
    cfg: &LabelConfig,
) -> LabelMaps {
    let mut annotations = validate_annotations(annotations, height, width);
    let (prob_map, supervision_mask) = make_shrink_map(&mut annotations, height, width, cfg);
    let (threshold_map, text_area_map) = make_border_map(&annotations, height, width, cfg);
    LabelMaps {
        prob_map,
        supervision_mask,
        threshold_map,
        text_area_map,
    }
}

/// Clamps polygons to the image and flags degenerate ones as ignored.
fn validate_annotations(annotations: &[Annotation], height: usize, width: usize) -> Vec<Annotation> {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    annotations
        .iter()
        .map(|ann| {
            let points: Vec<Point> = ann
                .points
                .iter()
                .map(|p| coord! { x: p.x.clamp(0.0, max_x), y: p.y.clamp(0.0, max_y) })
                .collect();
            let ignore = ann.ignore || geometry::polygon_area(&points) < 1.0;
            Annotation {
                points,
                text: ann.text.clone(),
                ignore,
            }
        })
        .collect()
}

/// Also flags polygons too small to shrink as ignored, so the border map skips them.
pub fn make_shrink_map(
    annotations: &mut [Annotation],
    height: usize,
    width: usize,
    cfg: &LabelConfig,
) -> (Array2<f32>, Array2<f32>) {
    let mut prob_map = Array2::<f32>::zeros((height, width));
    let mut mask = Array2::<f32>::ones((height, width));

    for ann in annotations.iter_mut() {
        let Some(bounds) = geometry::bounding_rect(&ann.points) else {
            continue;
        };
        if ann.ignore || bounds.width().min(bounds.height()) < cfg.min_text_size {
            fill_polygon(&mut mask, &ann.points, 0.0);
            ann.ignore = true;
            continue;
        }
        match geometry::shrink(&ann.points, cfg.shrink_ratio) {
            Some(shrunk) => fill_polygon(&mut prob_map, &shrunk, 1.0),
            None => {
                fill_polygon(&mut mask, &ann.points, 0.0);
                ann.ignore = true;
            }
        }
    }

    (prob_map, mask)
}

pub fn make_border_map(
    annotations: &[Annotation],
    height: usize,
    width: usize,
    cfg: &LabelConfig,
) -> (Array2<f32>, Array2<f32>) {
    let mut canvas = Array2::<f32>::zeros((height, width));
    let mut mask = Array2::<f32>::zeros((height, width));

    for ann in annotations.iter().filter(|a| !a.ignore) {
        draw_border_map(&ann.points, &mut canvas, &mut mask, cfg.shrink_ratio);
    }

    let span = cfg.thresh_max - cfg.thresh_min;
    canvas.mapv_inplace(|v| v * span + cfg.thresh_min);
    (canvas, mask)
}

fn draw_border_map(polygon: &[Point], canvas: &mut Array2<f32>, mask: &mut Array2<f32>, shrink_ratio: f32) {
    let distance = geometry::shrink_distance(polygon, shrink_ratio);
    if distance <= 0.0 {
        return;
    }
    let Some(padded) = geometry::offset_polygon(polygon, distance)
        .into_iter()
        .max_by(|a, b| geometry::polygon_area(a).total_cmp(&geometry::polygon_area(b)))
    else {
        return;
    };
    fill_polygon(mask, &padded, 1.0);

    let Some(bounds) = geometry::bounding_rect(&padded) else {
        return;
    };
    let (height, width) = canvas.dim();
    let x0 = bounds.min().x.floor().max(0.0) as usize;
    let y0 = bounds.min().y.floor().max(0.0) as usize;
    let x1 = (bounds.max().x.ceil() as usize).min(width.saturating_sub(1));
    let y1 = (bounds.max().y.ceil() as usize).min(height.saturating_sub(1));
    if x0 > x1 || y0 > y1 {
        return;
    }

    let n = polygon.len();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = coord! { x: x as f32, y: y as f32 };
            let nearest = (0..n)
                .map(|i| geometry::point_segment_distance(p, polygon[i], polygon[(i + 1) % n]))
                .fold(f32::INFINITY, f32::min);
            let value = 1.0 - (nearest / distance).clamp(0.0, 1.0);
            let cell = &mut canvas[[y, x]];
            *cell = cell.max(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<Point> {
        vec![
            coord! { x: x0, y: y0 },
            coord! { x: x1, y: y0 },
            coord! { x: x1, y: y1 },
            coord! { x: x0, y: y1 },
        ]
    }

    #[test]
    fn test_prob_map_inside_text_area() {
        let cfg = LabelConfig::default();
        let annotations = vec![Annotation::new(rect(10.0, 10.0, 90.0, 40.0), "text")];
        let maps = make_label_maps(&annotations, 64, 100, &cfg);

        assert_eq!(maps.prob_map[[25, 50]], 1.0);
        // the shrunk map stays clear of the original border
        assert_eq!(maps.prob_map[[11, 50]], 0.0);
        for ((prob, area), sup) in maps
            .prob_map
            .iter()
            .zip(maps.text_area_map.iter())
            .zip(maps.supervision_mask.iter())
        {
            if *prob > 0.0 {
                assert_eq!(*area, 1.0);
            }
            assert_eq!(*sup, 1.0);
        }
    }

    #[test]
    fn test_threshold_map_range() {
        let cfg = LabelConfig::default();
        let annotations = vec![Annotation::new(rect(10.0, 10.0, 90.0, 40.0), "text")];
        let maps = make_label_maps(&annotations, 64, 100, &cfg);

        let eps = 1e-5;
        assert!(maps
            .threshold_map
            .iter()
            .all(|&v| v >= cfg.thresh_min - eps && v <= cfg.thresh_max + eps));
        // on the text border the threshold peaks
        assert!((maps.threshold_map[[10, 50]] - cfg.thresh_max).abs() < 1e-3);
        // far from any text it sits at the floor
        assert!((maps.threshold_map[[60, 5]] - cfg.thresh_min).abs() < 1e-5);
    }

    #[test]
    fn test_ignored_and_tiny_text_is_masked_out() {
        let cfg = LabelConfig::default();
        let annotations = vec![
            Annotation::new(rect(10.0, 10.0, 60.0, 30.0), "###"),
            Annotation::new(rect(70.0, 10.0, 95.0, 14.0), "tiny"),
        ];
        let maps = make_label_maps(&annotations, 50, 100, &cfg);

        assert_eq!(maps.supervision_mask[[20, 30]], 0.0);
        assert_eq!(maps.supervision_mask[[12, 80]], 0.0);
        assert_eq!(maps.prob_map.sum(), 0.0);
        // ignored and tiny text get no threshold supervision either
        assert_eq!(maps.text_area_map[[20, 30]], 0.0);
        assert_eq!(maps.text_area_map[[12, 80]], 0.0);
        assert_eq!(maps.supervision_mask[[45, 5]], 1.0);
    }
}
