//! Sub-pixel corner refinement.
//!
//! Contour vertices sit on the edge map, which is blurred, thinned and
//! dilated, so they can be several pixels off the true corner. Each side of a
//! coarse quadrilateral is re-measured against the grey image instead: the
//! intensity step is located along short profiles across the side, a line is
//! fitted through those step positions, and neighbouring lines are
//! intersected.

use image::GrayImage;

use crate::geometry::{Point, Quadrilateral};

/// Spacing of samples along a profile, in pixels
const PROFILE_STEP: f64 = 0.25;
/// Fraction of each side skipped at both ends, where corners are rounded
const SIDE_TRIM: f64 = 0.2;
const MAX_PROFILES_PER_SIDE: usize = 64;
const MIN_PROFILES_PER_SIDE: usize = 4;
/// Profiles whose two ends differ by less than this are not on an edge
const MIN_STEP_CONTRAST: f64 = 16.0;
/// The outermost document pixel centres lie half a pixel inside the step
const PIXEL_CENTRE_INSET: f64 = 0.5;

/// A line through `origin` with unit `direction`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Line {
    origin: Point,
    direction: Point,
}

impl Line {
    fn intersect(&self, other: &Line) -> Option<Point> {
        let (d, e) = (self.direction, other.direction);
        let denom = d.x * e.y - d.y * e.x;
        if denom.abs() < 1e-9 {
            return None;
        }
        let dx = other.origin.x - self.origin.x;
        let dy = other.origin.y - self.origin.y;
        let t = (dx * e.y - dy * e.x) / denom;
        Some(Point::new(
            self.origin.x + t * d.x,
            self.origin.y + t * d.y,
        ))
    }
}

/// Move each corner of `coarse` onto the intensity edges of `gray`.
///
/// Returns the corners of the outermost document pixels (pixel-centre
/// coordinates), in the same order as `coarse`. Returns `None` when any side
/// cannot be measured, when a refined corner strays more than twice `radius`
/// from its coarse position, or when the result is not convex.
pub fn refine_corners(gray: &GrayImage, coarse: &Quadrilateral, radius: f64) -> Option<Quadrilateral> {
    if !(radius > 0.0) || gray.width() == 0 || gray.height() == 0 {
        return None;
    }

    let centroid = coarse.centroid();
    let mut sides = [Line {
        origin: Point::default(),
        direction: Point::default(),
    }; 4];
    for (i, side) in sides.iter_mut().enumerate() {
        *side = fit_side(gray, coarse[i], coarse[(i + 1) % 4], centroid, radius)?;
    }

    let mut corners = [Point::default(); 4];
    for (i, corner) in corners.iter_mut().enumerate() {
        // Corner i joins the side ending at it and the side starting at it
        *corner = sides[(i + 3) % 4].intersect(&sides[i])?;
        if !corner.x.is_finite()
            || !corner.y.is_finite()
            || corner.distance(&coarse[i]) > 2.0 * radius
        {
            return None;
        }
    }

    let refined = Quadrilateral::new(corners);
    refined.is_convex().then_some(refined)
}

/// Fit the edge running roughly from `a` to `b`, shifted onto the outermost
/// pixel centres on the `centroid` side.
fn fit_side(gray: &GrayImage, a: Point, b: Point, centroid: Point, radius: f64) -> Option<Line> {
    let length = a.distance(&b);
    if length < f64::EPSILON {
        return None;
    }
    let direction = Point::new((b.x - a.x) / length, (b.y - a.y) / length);
    let mut normal = Point::new(direction.y, -direction.x);
    let mid = Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0);
    if (mid.x - centroid.x) * normal.x + (mid.y - centroid.y) * normal.y < 0.0 {
        normal = Point::new(-normal.x, -normal.y);
    }

    let span = length * (1.0 - 2.0 * SIDE_TRIM);
    let count = ((span / 2.0).ceil() as usize).clamp(MIN_PROFILES_PER_SIDE, MAX_PROFILES_PER_SIDE);

    let hits: Vec<Point> = (0..count)
        .filter_map(|k| {
            let t = length * SIDE_TRIM + span * k as f64 / (count - 1) as f64;
            let origin = Point::new(a.x + t * direction.x, a.y + t * direction.y);
            let s = locate_step(gray, origin, normal, radius)?;
            Some(Point::new(origin.x + s * normal.x, origin.y + s * normal.y))
        })
        .collect();
    if hits.len() < (count / 2).max(3) {
        return None;
    }

    let mut line = fit_line(&hits)?;
    line.origin = Point::new(
        line.origin.x - PIXEL_CENTRE_INSET * normal.x,
        line.origin.y - PIXEL_CENTRE_INSET * normal.y,
    );
    Some(line)
}

/// Offset along `normal` from `origin` where the profile crosses the level
/// halfway between its two ends. The steepest crossing wins.
fn locate_step(gray: &GrayImage, origin: Point, normal: Point, radius: f64) -> Option<f64> {
    let steps = (radius / PROFILE_STEP).ceil() as i64;
    let profile: Vec<(f64, f64)> = (-steps..=steps)
        .map(|k| {
            let s = k as f64 * PROFILE_STEP;
            (s, sample_bilinear(gray, origin.x + s * normal.x, origin.y + s * normal.y))
        })
        .collect();

    let (_, inner) = *profile.first()?;
    let (_, outer) = *profile.last()?;
    if (inner - outer).abs() < MIN_STEP_CONTRAST {
        return None;
    }
    let level = (inner + outer) / 2.0;

    profile
        .windows(2)
        .filter_map(|pair| {
            let ((s0, v0), (s1, v1)) = (pair[0], pair[1]);
            if v0 == v1 || (v0 - level) * (v1 - level) > 0.0 {
                return None;
            }
            let t = (level - v0) / (v1 - v0);
            Some((s0 + t * (s1 - s0), (v1 - v0).abs()))
        })
        .max_by(|x, y| x.1.total_cmp(&y.1))
        .map(|(s, _)| s)
}

/// Total least squares line through `points`
fn fit_line(points: &[Point]) -> Option<Line> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let (dx, dy) = (p.x - mean_x, p.y - mean_y);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx + syy < f64::EPSILON {
        return None;
    }

    let angle = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(Line {
        origin: Point::new(mean_x, mean_y),
        direction: Point::new(angle.cos(), angle.sin()),
    })
}

/// Bilinear grey level at a fractional position, clamping to the image edge
fn sample_bilinear(gray: &GrayImage, x: f64, y: f64) -> f64 {
    let (width, height) = gray.dimensions();
    let get = |px: i64, py: i64| {
        let px = px.clamp(0, width as i64 - 1) as u32;
        let py = py.clamp(0, height as i64 - 1) as u32;
        gray.get_pixel(px, py)[0] as f64
    };

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let a = get(x0, y0) + fx * (get(x0 + 1, y0) - get(x0, y0));
    let b = get(x0, y0 + 1) + fx * (get(x0 + 1, y0 + 1) - get(x0, y0 + 1));
    a + fy * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn page(width: u32, height: u32, rect: Rect) -> GrayImage {
        let mut img = GrayImage::from_pixel(width, height, Luma([0]));
        draw_filled_rect_mut(&mut img, rect, Luma([255]));
        img
    }

    fn quad(pts: [(f64, f64); 4]) -> Quadrilateral {
        Quadrilateral::new(pts.map(Point::from))
    }

    #[test]
    fn test_step_found_halfway_between_pixels() {
        let img = page(40, 20, Rect::at(10, 0).of_size(30, 20));
        // Profile pointing from the white side towards the black side
        let s = locate_step(&img, Point::new(12.3, 10.0), Point::new(-1.0, 0.0), 6.0).unwrap();
        assert_abs_diff_eq!(12.3 - s, 9.5, epsilon = 1e-9);
    }

    #[test]
    fn test_flat_profile_has_no_step() {
        let img = GrayImage::from_pixel(20, 20, Luma([90]));
        assert!(locate_step(&img, Point::new(10.0, 10.0), Point::new(1.0, 0.0), 5.0).is_none());
    }

    #[test]
    fn test_fit_line_through_points() {
        let pts: Vec<Point> = (0..10).map(|i| Point::new(i as f64, 2.0 * i as f64 + 1.0)).collect();
        let line = fit_line(&pts).unwrap();
        assert_abs_diff_eq!(line.direction.y / line.direction.x, 2.0, epsilon = 1e-9);
        assert!(fit_line(&[Point::new(1.0, 1.0)]).is_none());
    }

    #[test]
    fn test_refine_snaps_skewed_coarse_corners() {
        let img = page(400, 300, Rect::at(50, 50).of_size(300, 200));
        // Vertices as a dilated contour would report them
        let coarse = quad([(53.0, 48.0), (350.0, 49.0), (351.0, 246.0), (53.0, 251.0)]);
        let refined = refine_corners(&img, &coarse, 8.0).unwrap();

        let expected = [(50.0, 50.0), (349.0, 50.0), (349.0, 249.0), (50.0, 249.0)];
        for (p, (x, y)) in refined.corners().iter().zip(expected) {
            assert_abs_diff_eq!(p.x, x, epsilon = 1e-6);
            assert_abs_diff_eq!(p.y, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_refine_gives_up_without_edges() {
        let img = GrayImage::from_pixel(200, 200, Luma([128]));
        let coarse = quad([(20.0, 20.0), (180.0, 20.0), (180.0, 180.0), (20.0, 180.0)]);
        assert!(refine_corners(&img, &coarse, 8.0).is_none());
        assert!(refine_corners(&img, &coarse, 0.0).is_none());
    }
}
