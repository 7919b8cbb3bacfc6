use geo_types::{coord, Coord, Rect};
use ndarray::Array2;

use crate::geometry;

/// A detected text region: an outline in source-image pixels and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    pub points: Vec<Coord<f32>>,
    pub score: f32,
}

impl TextRegion {
    pub fn new(points: Vec<Coord<f32>>, score: f32) -> Self {
        Self { points, score }
    }

    pub fn from_quad(quad: [Coord<f32>; 4], score: f32) -> Self {
        Self {
            points: quad.to_vec(),
            score,
        }
    }

    pub fn is_quad(&self) -> bool {
        self.points.len() == 4
    }

    pub fn bbox(&self) -> Rect<f32> {
        geometry::bounding_rect(&self.points)
            .unwrap_or_else(|| Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 0.0, y: 0.0 }))
    }

    pub fn area(&self) -> f32 {
        geometry::polygon_area(&self.points)
    }

    /// The rotated rectangle enclosing this region, ordered clockwise from top-left.
    pub fn min_area_quad(&self) -> Option<[Coord<f32>; 4]> {
        geometry::mini_box(&self.points).map(|(quad, _)| quad)
    }

    pub fn transform(&mut self, transform: impl Fn(Coord<f32>) -> Coord<f32>) {
        for p in self.points.iter_mut() {
            *p = transform(*p);
        }
    }

    /// One line of the submission format read by IoU / DetEval harnesses:
    /// `x1,y1,...,xn,yn,score` with integer coordinates.
    pub fn to_result_line(&self) -> String {
        let mut fields: Vec<String> = self
            .points
            .iter()
            .flat_map(|p| [p.x.round() as i64, p.y.round() as i64])
            .map(|v| v.to_string())
            .collect();
        fields.push(format!("{:.4}", self.score));
        fields.join(",")
    }
}

/// Output of a [`crate::models::TextDetector`] for one image.
#[derive(Debug, Clone)]
pub struct Detection {
    pub regions: Vec<TextRegion>,
    /// Probability map at network resolution.
    pub prob_map: Array2<f32>,
    /// Threshold map at network resolution, when the model produces one.
    pub threshold_map: Option<Array2<f32>>,
    pub image_width: u32,
    pub image_height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_line() {
        let region = TextRegion::new(
            vec![
                coord! { x: 1.2, y: 2.0 },
                coord! { x: 10.0, y: 2.0 },
                coord! { x: 10.0, y: 7.6 },
                coord! { x: 1.0, y: 8.0 },
            ],
            0.91234,
        );
        assert_eq!(region.to_result_line(), "1,2,10,2,10,8,1,8,0.9123");
        assert!(region.is_quad());
        assert_eq!(region.bbox().min(), coord! { x: 1.0, y: 2.0 });
    }

    #[test]
    fn test_transform_scales_points() {
        let mut region = TextRegion::from_quad(
            [
                coord! { x: 0.0, y: 0.0 },
                coord! { x: 2.0, y: 0.0 },
                coord! { x: 2.0, y: 1.0 },
                coord! { x: 0.0, y: 1.0 },
            ],
            1.0,
        );
        region.transform(|p| coord! { x: p.x * 2.0, y: p.y * 3.0 });
        assert!((region.area() - 12.0).abs() < 1e-5);
    }
}
