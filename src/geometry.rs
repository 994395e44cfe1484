use std::cmp::Ordering;
use std::ops::Index;

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Points closer than this (in pixels) are treated as coincident
const MIN_SEPARATION: f64 = 1e-6;

/// Sine of the smallest angle a corner triple may span before it counts as collinear
const COLLINEAR_SINE: f64 = 1e-6;

/// A point in image space: origin top-left, x rightward, y downward
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// z-component of (b - a) × (c - a)
fn cross(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Shoelace area of a closed polygon (always non-negative)
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x * q.y - q.x * p.y;
    }
    twice.abs() / 2.0
}

/// Four corner points describing a document boundary.
///
/// The canonical order is `[top-left, top-right, bottom-right, bottom-left]`.
/// Construction does not reorder or validate: detector output is already
/// canonical, and corners edited by hand are taken in the order given. Call
/// [`Quadrilateral::validate`] to reject degenerate shapes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadrilateral {
    corners: [Point; 4],
}

impl Quadrilateral {
    pub fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    /// Build from an arbitrary slice, which must hold exactly four points
    pub fn from_points(points: &[Point]) -> Result<Self> {
        let corners: [Point; 4] = points.try_into().map_err(|_| {
            ScanError::invalid(format!(
                "a quadrilateral needs exactly 4 points, got {}",
                points.len()
            ))
        })?;
        Ok(Self::new(corners))
    }

    /// The whole `width`×`height` frame shrunk by `margin` pixels on every side.
    ///
    /// This is the usual fallback when detection finds nothing. The margin is
    /// capped at a quarter of the shorter side so the result stays a proper
    /// rectangle on small images.
    pub fn inset(width: u32, height: u32, margin: f64) -> Self {
        let (w, h) = (width as f64, height as f64);
        let m = margin.clamp(0.0, w.min(h) / 4.0);
        Self::new([
            Point::new(m, m),
            Point::new(w - m, m),
            Point::new(w - m, h - m),
            Point::new(m, h - m),
        ])
    }

    /// Quadrilateral covering an entire `width`×`height` image
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::inset(width, height, 0.0)
    }

    pub fn corners(&self) -> &[Point; 4] {
        &self.corners
    }

    pub fn top_left(&self) -> Point {
        self.corners[0]
    }

    pub fn top_right(&self) -> Point {
        self.corners[1]
    }

    pub fn bottom_right(&self) -> Point {
        self.corners[2]
    }

    pub fn bottom_left(&self) -> Point {
        self.corners[3]
    }

    /// Move one corner in place; array order is never permuted
    pub fn set_corner(&mut self, index: usize, point: Point) -> Result<()> {
        let corner = self.corners.get_mut(index).ok_or_else(|| {
            ScanError::invalid(format!("corner index {} out of range 0..4", index))
        })?;
        *corner = point;
        Ok(())
    }

    pub fn area(&self) -> f64 {
        polygon_area(&self.corners)
    }

    pub fn perimeter(&self) -> f64 {
        (0..4)
            .map(|i| self.corners[i].distance(&self.corners[(i + 1) % 4]))
            .sum()
    }

    pub fn centroid(&self) -> Point {
        let sx: f64 = self.corners.iter().map(|p| p.x).sum();
        let sy: f64 = self.corners.iter().map(|p| p.y).sum();
        Point::new(sx / 4.0, sy / 4.0)
    }

    /// True when every turn along the boundary goes the same way.
    ///
    /// Self-intersecting (bow-tie) orderings and shapes with a straight or
    /// reflex corner are not convex.
    pub fn is_convex(&self) -> bool {
        let turns: Vec<f64> = (0..4)
            .map(|i| {
                cross(
                    &self.corners[i],
                    &self.corners[(i + 1) % 4],
                    &self.corners[(i + 2) % 4],
                )
            })
            .collect();
        turns.iter().all(|&t| t > 0.0) || turns.iter().all(|&t| t < 0.0)
    }

    /// Reject quadrilaterals no perspective transform can be solved for
    pub fn validate(&self) -> Result<()> {
        if let Some(p) = self.corners.iter().find(|p| !p.is_finite()) {
            return Err(ScanError::invalid(format!(
                "corner ({}, {}) is not a finite coordinate",
                p.x, p.y
            )));
        }

        for i in 0..4 {
            for j in (i + 1)..4 {
                if self.corners[i].distance(&self.corners[j]) < MIN_SEPARATION {
                    return Err(ScanError::geometry(format!(
                        "corners {} and {} coincide",
                        i, j
                    )));
                }
            }
        }

        // Every triple of the four corners must span a real triangle
        for skip in 0..4 {
            let tri: Vec<&Point> = (0..4)
                .filter(|&k| k != skip)
                .map(|k| &self.corners[k])
                .collect();
            let (a, b, c) = (tri[0], tri[1], tri[2]);
            let scale = a.distance(b) * a.distance(c);
            if cross(a, b, c).abs() <= COLLINEAR_SINE * scale {
                return Err(ScanError::geometry(format!(
                    "three corners are collinear (all but corner {})",
                    skip
                )));
            }
        }

        Ok(())
    }

    /// Reorder the corners into `[top-left, top-right, bottom-right, bottom-left]`.
    ///
    /// Top-left has the smallest `x + y`, bottom-right the largest, top-right
    /// the smallest `y - x` and bottom-left the largest. Ties are settled by
    /// coordinates so the result never depends on the order the corners came
    /// in. When the rule hands one corner two roles (a quadrilateral rotated by
    /// about 45°), corners are instead taken clockwise around the centroid
    /// starting from the top-left one.
    pub fn canonical(&self) -> Self {
        let pts = &self.corners;
        let tl = extreme_index(pts, |p| p.x + p.y, Ordering::Less);
        let br = extreme_index(pts, |p| p.x + p.y, Ordering::Greater);
        let tr = extreme_index(pts, |p| p.y - p.x, Ordering::Less);
        let bl = extreme_index(pts, |p| p.y - p.x, Ordering::Greater);

        let mut seen = [false; 4];
        for idx in [tl, tr, br, bl] {
            seen[idx] = true;
        }
        if seen.iter().all(|&s| s) {
            return Self::new([pts[tl], pts[tr], pts[br], pts[bl]]);
        }

        let c = self.centroid();
        let mut sorted = *pts;
        // y grows downward, so ascending atan2 walks clockwise on screen
        sorted.sort_by(|a, b| {
            let ta = (a.y - c.y).atan2(a.x - c.x);
            let tb = (b.y - c.y).atan2(b.x - c.x);
            ta.total_cmp(&tb).then(coord_cmp(a, b))
        });
        let start = extreme_index(&sorted, |p| p.x + p.y, Ordering::Less);
        sorted.rotate_left(start);
        Self::new(sorted)
    }
}

impl Index<usize> for Quadrilateral {
    type Output = Point;

    fn index(&self, index: usize) -> &Point {
        &self.corners[index]
    }
}

fn coord_cmp(a: &Point, b: &Point) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

/// Index of the point whose key is most `want` (Less = minimal, Greater = maximal)
fn extreme_index(points: &[Point; 4], key: impl Fn(&Point) -> f64, want: Ordering) -> usize {
    let mut best = 0;
    for i in 1..points.len() {
        let (a, b) = (&points[i], &points[best]);
        let ord = key(a).total_cmp(&key(b)).then(coord_cmp(a, b));
        if ord == want {
            best = i;
        }
    }
    best
}

/// A 3×3 projective mapping, normalized so that `h33 = 1`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    matrix: Matrix3<f64>,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Solve the unique homography taking each `src[k]` to `dst[k]`.
    ///
    /// Both point sets are Hartley-normalized (centroid at the origin, mean
    /// distance √2) before the 8×8 system is solved, which keeps the solve
    /// well conditioned for pixel coordinates in the thousands.
    pub fn from_quads(src: &Quadrilateral, dst: &Quadrilateral) -> Result<Self> {
        src.validate()?;
        dst.validate()?;

        let (src_n, t_src) = normalize_points(src.corners());
        let (dst_n, t_dst) = normalize_points(dst.corners());

        // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], h33 = 1
        // h11 x + h12 y + h13 - u h31 x - u h32 y = u
        // h21 x + h22 y + h23 - v h31 x - v h32 y = v
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for k in 0..4 {
            let (x, y) = (src_n[k].x, src_n[k].y);
            let (u, v) = (dst_n[k].x, dst_n[k].y);

            let r0 = 2 * k;
            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -u * x;
            a[(r0, 7)] = -u * y;
            b[r0] = u;

            let r1 = 2 * k + 1;
            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -v * x;
            a[(r1, 7)] = -v * y;
            b[r1] = v;
        }

        let h = a
            .lu()
            .solve(&b)
            .ok_or_else(|| ScanError::geometry("perspective system is singular"))?;

        let hn = Matrix3::new(
            h[0], h[1], h[2], //
            h[3], h[4], h[5], //
            h[6], h[7], 1.0,
        );

        // H = T_dst⁻¹ · Hn · T_src
        let t_dst_inv = t_dst
            .try_inverse()
            .ok_or_else(|| ScanError::geometry("destination normalization is singular"))?;
        let full = t_dst_inv * hn * t_src;

        let scale = full[(2, 2)];
        if scale.abs() < 1e-12 || full.iter().any(|v| !v.is_finite()) {
            return Err(ScanError::geometry("perspective solution is not finite"));
        }

        Ok(Self::from_matrix(full / scale))
    }

    /// Map a point through the transform (homogeneous divide included)
    pub fn apply(&self, p: Point) -> Point {
        let v = self.matrix * Vector3::new(p.x, p.y, 1.0);
        Point::new(v.x / v.z, v.y / v.z)
    }

    pub fn inverse(&self) -> Result<Self> {
        let inv = self
            .matrix
            .try_inverse()
            .ok_or_else(|| ScanError::geometry("transform is not invertible"))?;
        let scale = inv[(2, 2)];
        if scale.abs() < 1e-12 {
            return Ok(Self::from_matrix(inv));
        }
        Ok(Self::from_matrix(inv / scale))
    }
}

/// Translate to the centroid and scale so the mean distance is √2
fn normalize_points(pts: &[Point; 4]) -> ([Point; 4], Matrix3<f64>) {
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let mean_dist = pts
        .iter()
        .map(|p| (p.x - cx).hypot(p.y - cy))
        .sum::<f64>()
        / 4.0;

    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(
        s, 0.0, -s * cx, //
        0.0, s, -s * cy, //
        0.0, 0.0, 1.0,
    );

    let mut out = [Point::default(); 4];
    for (o, p) in out.iter_mut().zip(pts) {
        let v = t * Vector3::new(p.x, p.y, 1.0);
        *o = Point::new(v.x, v.y);
    }
    (out, t)
}
