//! Polygon primitives shared by label generation and post-processing.
//!
//! Points are `geo_types::Coord<f32>` in pixel space. Offsetting (shrink /
//! unclip) goes through clipper2 with round joins.

use std::cmp::Ordering;
use std::f32::consts::PI;

use clipper2::{EndType, JoinType, Path as ClipperPath};
use geo_types::{coord, Coord, Rect};
use image::{GrayImage, Luma};
use imageproc::contours::Contour;
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point as DrawPoint;
use itertools::Itertools;
use ndarray::Array2;

pub type Point = Coord<f32>;

/// Absolute area (shoelace formula). Zero for fewer than three points.
pub fn polygon_area(points: &[Point]) -> f32 {
    signed_area(points).abs()
}

fn signed_area(points: &[Point]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x * points[j].y - points[j].x * points[i].y;
    }
    area / 2.0
}

/// Length of the closed outline.
pub fn polygon_perimeter(points: &[Point]) -> f32 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| distance(points[i], points[(i + 1) % n]))
        .sum()
}

pub fn distance(a: Point, b: Point) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Axis-aligned bounding box, `None` for an empty slice.
pub fn bounding_rect(points: &[Point]) -> Option<Rect<f32>> {
    let (min_x, max_x) = points.iter().map(|p| p.x).minmax_by(f32::total_cmp).into_option()?;
    let (min_y, max_y) = points.iter().map(|p| p.y).minmax_by(f32::total_cmp).into_option()?;
    Some(Rect::new(
        coord! { x: min_x, y: min_y },
        coord! { x: max_x, y: max_y },
    ))
}

pub fn contour_points(contour: &Contour<u32>) -> Vec<Point> {
    contour
        .points
        .iter()
        .map(|p| coord! { x: p.x as f32, y: p.y as f32 })
        .collect()
}

/// Distance from `p` to the segment `a`-`b`.
pub fn point_segment_distance(p: Point, a: Point, b: Point) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f32::EPSILON {
        return distance(p, a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    distance(p, coord! { x: a.x + t * dx, y: a.y + t * dy })
}

fn cross(o: Point, a: Point, b: Point) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull (Andrew's monotone chain), counter-clockwise in a y-up frame.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup_by(|a, b| a.x == b.x && a.y == b.y);
    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<Point> = Vec::with_capacity(pts.len());
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Point> = Vec::with_capacity(pts.len());
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Rotated rectangle of minimum area enclosing a point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinAreaRect {
    pub center: Point,
    pub width: f32,
    pub height: f32,
    /// Rotation of the `width` side in degrees.
    pub angle: f32,
}

impl MinAreaRect {
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }

    /// The four corners, unordered.
    pub fn corners(&self) -> [Point; 4] {
        let (sin_a, cos_a) = (self.angle * PI / 180.0).sin_cos();
        let w_2 = self.width / 2.0;
        let h_2 = self.height / 2.0;
        [(-w_2, -h_2), (w_2, -h_2), (w_2, h_2), (-w_2, h_2)].map(|(x, y)| {
            coord! {
                x: x * cos_a - y * sin_a + self.center.x,
                y: x * sin_a + y * cos_a + self.center.y,
            }
        })
    }
}

/// Rotating calipers over the convex hull. Degenerate inputs fall back to the
/// axis-aligned box.
pub fn min_area_rect(points: &[Point]) -> Option<MinAreaRect> {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        let rect = bounding_rect(points)?;
        return Some(MinAreaRect {
            center: rect.center(),
            width: rect.width(),
            height: rect.height(),
            angle: 0.0,
        });
    }

    let mut best: Option<(f32, MinAreaRect)> = None;
    let n = hull.len();
    for i in 0..n {
        let a = hull[i];
        let b = hull[(i + 1) % n];
        let len = distance(a, b);
        if len < f32::EPSILON {
            continue;
        }
        let (ux, uy) = ((b.x - a.x) / len, (b.y - a.y) / len);
        let (vx, vy) = (-uy, ux);

        let (mut min_u, mut max_u, mut min_v, mut max_v) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
        for p in &hull {
            let pu = ux * (p.x - a.x) + uy * (p.y - a.y);
            let pv = vx * (p.x - a.x) + vy * (p.y - a.y);
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }

        let width = max_u - min_u;
        let height = max_v - min_v;
        let area = width * height;
        if best.as_ref().map_or(true, |(best_area, _)| area < *best_area) {
            let cu = (min_u + max_u) / 2.0;
            let cv = (min_v + max_v) / 2.0;
            best = Some((
                area,
                MinAreaRect {
                    center: coord! {
                        x: a.x + cu * ux + cv * vx,
                        y: a.y + cu * uy + cv * vy,
                    },
                    width,
                    height,
                    angle: uy.atan2(ux) * 180.0 / PI,
                },
            ));
        }
    }
    best.map(|(_, rect)| rect)
}

/// Orders four corners as top-left, top-right, bottom-right, bottom-left:
/// sort by x, then pick the upper / lower point of each side pair.
pub fn order_quad(mut points: [Point; 4]) -> [Point; 4] {
    points.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
    let (tl, bl) = if points[1].y > points[0].y {
        (points[0], points[1])
    } else {
        (points[1], points[0])
    };
    let (tr, br) = if points[3].y > points[2].y {
        (points[2], points[3])
    } else {
        (points[3], points[2])
    };
    [tl, tr, br, bl]
}

/// Ordered min-area quad and its short side.
pub fn mini_box(points: &[Point]) -> Option<([Point; 4], f32)> {
    if points.len() < 3 {
        return None;
    }
    let rect = min_area_rect(points)?;
    let short = rect.min_side();
    if !short.is_finite() {
        return None;
    }
    Some((order_quad(rect.corners()), short))
}

/// Douglas-Peucker simplification of a closed contour.
pub fn approx_poly_dp(points: &[Point], epsilon: f32) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let (mut max_dist, mut max_index) = (0.0f32, start);
        for i in start + 1..end {
            let d = point_segment_distance(points[i], points[start], points[end]);
            if d > max_dist {
                max_dist = d;
                max_index = i;
            }
        }
        if max_dist > epsilon {
            keep[max_index] = true;
            stack.push((start, max_index));
            stack.push((max_index, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Offsets a closed polygon by `delta` pixels (negative shrinks) with round
/// joins. Returns every resulting outline.
pub fn offset_polygon(points: &[Point], delta: f32) -> Vec<Vec<Point>> {
    if points.len() < 3 {
        return Vec::new();
    }
    let path: ClipperPath = points
        .iter()
        .map(|p| (p.x as f64, p.y as f64))
        .collect::<Vec<_>>()
        .into();

    path.inflate(delta as f64, JoinType::Round, EndType::Polygon, 2.0)
        .into_iter()
        .map(|outline| {
            let mut out: Vec<Point> = outline
                .iter()
                .map(|pt| coord! { x: pt.x() as f32, y: pt.y() as f32 })
                .collect();
            if out.len() > 1 && out.first() == out.last() {
                out.pop();
            }
            out
        })
        .filter(|outline| outline.len() >= 3)
        .collect()
}

/// Shrink distance `A * (1 - r^2) / L`, also used to dilate for the border map.
pub fn shrink_distance(points: &[Point], shrink_ratio: f32) -> f32 {
    let perimeter = polygon_perimeter(points);
    if perimeter <= f32::EPSILON {
        return 0.0;
    }
    polygon_area(points) * (1.0 - shrink_ratio * shrink_ratio) / perimeter
}

/// Expands a detected region by `A * ratio / L`. `None` when the expansion is
/// degenerate or splits into more than one outline.
pub fn unclip(points: &[Point], unclip_ratio: f32) -> Option<Vec<Point>> {
    let area = polygon_area(points);
    let perimeter = polygon_perimeter(points);
    if area <= f32::EPSILON || perimeter <= f32::EPSILON {
        return None;
    }
    let mut outlines = offset_polygon(points, area * unclip_ratio / perimeter);
    if outlines.len() != 1 {
        return None;
    }
    outlines.pop()
}

/// Shrinks an annotation polygon for the probability map. Keeps the largest
/// outline when shrinking splits the polygon; `None` when it vanishes.
pub fn shrink(points: &[Point], shrink_ratio: f32) -> Option<Vec<Point>> {
    let d = shrink_distance(points, shrink_ratio);
    if d <= 0.0 {
        return None;
    }
    offset_polygon(points, -d)
        .into_iter()
        .max_by(|a, b| polygon_area(a).total_cmp(&polygon_area(b)))
}

/// Rasterizes `polygon` into `canvas`, writing `value` on covered pixels.
pub fn fill_polygon(canvas: &mut Array2<f32>, polygon: &[Point], value: f32) {
    let (height, width) = canvas.dim();
    let Some(bounds) = bounding_rect(polygon) else {
        return;
    };
    let x0 = bounds.min().x.floor().max(0.0) as i32;
    let y0 = bounds.min().y.floor().max(0.0) as i32;
    let x1 = (bounds.max().x.ceil() as i32).min(width as i32 - 1);
    let y1 = (bounds.max().y.ceil() as i32).min(height as i32 - 1);
    if x0 > x1 || y0 > y1 {
        return;
    }

    let mut points: Vec<DrawPoint<i32>> = polygon
        .iter()
        .map(|p| DrawPoint::new(p.x.round() as i32 - x0, p.y.round() as i32 - y0))
        .collect();
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return;
    }

    let mut patch = GrayImage::new((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
    draw_polygon_mut(&mut patch, &points, Luma([255u8]));
    for (px, py, pixel) in patch.enumerate_pixels() {
        if pixel.0[0] > 0 {
            canvas[[py as usize + y0 as usize, px as usize + x0 as usize]] = value;
        }
    }
}
