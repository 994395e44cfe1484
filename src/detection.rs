use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::dilate;
use imageproc::point::Point as PixelPoint;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::geometry::{polygon_area, Point, Quadrilateral};
use crate::refine::refine_corners;

/// Tunables for the corner detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Lower Canny hysteresis threshold on the 8-bit intensity scale
    pub low_threshold: f32,
    /// Upper Canny hysteresis threshold on the 8-bit intensity scale
    pub high_threshold: f32,
    /// Radius of the square dilation that closes small gaps in the edge map (0 disables)
    pub dilate_radius: u8,
    /// Douglas-Peucker tolerance as a fraction of the contour perimeter
    pub approx_epsilon_ratio: f64,
    /// Smallest contour area accepted, as a fraction of the image area
    pub min_area_ratio: f64,
    /// Largest allowed ratio of contour length to the simplified quad's perimeter
    pub max_perimeter_ratio: f64,
    /// Contours reaching this close to the image frame are discarded
    pub frame_margin: u32,
    /// How far (in pixels) either side of a coarse edge the corner refinement
    /// searches for the intensity step (0 disables refinement)
    pub refine_radius: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            low_threshold: 50.0,
            high_threshold: 100.0,
            dilate_radius: 1,
            approx_epsilon_ratio: 0.02,
            min_area_ratio: 0.01,
            max_perimeter_ratio: 1.5,
            frame_margin: 2,
            refine_radius: 8.0,
        }
    }
}

/// A contour whose simplified outline is a convex quadrilateral
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Simplified vertices, in contour traversal order
    pub quad: Quadrilateral,
    /// Area enclosed by the raw contour
    pub contour_area: f64,
    /// Length of the raw contour
    pub perimeter: f64,
}

/// Ranks candidate document outlines; the highest score wins.
pub trait CandidateScorer: Send + Sync {
    fn score(&self, candidate: &Candidate, frame: (u32, u32)) -> f64;
}

/// Prefers the largest enclosed area
#[derive(Debug, Clone, Copy, Default)]
pub struct AreaScorer;

impl CandidateScorer for AreaScorer {
    fn score(&self, candidate: &Candidate, _frame: (u32, u32)) -> f64 {
        candidate.contour_area
    }
}

/// Area weighted down linearly as the centroid moves away from the image centre
#[derive(Debug, Clone, Copy, Default)]
pub struct CentralityScorer;

impl CandidateScorer for CentralityScorer {
    fn score(&self, candidate: &Candidate, (width, height): (u32, u32)) -> f64 {
        let centre = Point::new(width as f64 / 2.0, height as f64 / 2.0);
        let half_diagonal = centre.x.hypot(centre.y).max(1.0);
        let offset = candidate.quad.centroid().distance(&centre) / half_diagonal;
        candidate.contour_area * (1.0 - offset).max(0.0)
    }
}

/// Finds the dominant document-like quadrilateral in a photograph
#[derive(Debug, Clone)]
pub struct CornerDetector<S = AreaScorer> {
    params: DetectorParams,
    scorer: S,
}

impl CornerDetector<AreaScorer> {
    pub fn new(params: DetectorParams) -> Self {
        Self::with_scorer(params, AreaScorer)
    }
}

impl Default for CornerDetector<AreaScorer> {
    fn default() -> Self {
        Self::new(DetectorParams::default())
    }
}

impl<S: CandidateScorer> CornerDetector<S> {
    pub fn with_scorer(params: DetectorParams, scorer: S) -> Self {
        Self { params, scorer }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Every contour in `gray` that passes the quadrilateral filters, in the
    /// order contour extraction found them. Vertices are the coarse contour
    /// vertices, before refinement.
    pub fn candidates(&self, gray: &GrayImage) -> Result<Vec<Candidate>> {
        ensure_not_empty(gray.dimensions())?;
        let mut edges = canny(gray, self.params.low_threshold, self.params.high_threshold);
        if self.params.dilate_radius > 0 {
            edges = dilate(&edges, Norm::LInf, self.params.dilate_radius);
        }

        Ok(find_contours::<i32>(&edges)
            .iter()
            .filter_map(|contour| self.candidate_from_contour(&contour.points, gray.dimensions()))
            .collect())
    }

    fn candidate_from_contour(
        &self,
        points: &[PixelPoint<i32>],
        (width, height): (u32, u32),
    ) -> Option<Candidate> {
        if points.len() < 4 {
            return None;
        }

        let margin = self.params.frame_margin as i32;
        let touches_frame = points.iter().any(|p| {
            p.x < margin || p.y < margin || p.x >= width as i32 - margin || p.y >= height as i32 - margin
        });
        if touches_frame {
            return None;
        }

        let perimeter = arc_length(points, true);
        let epsilon = self.params.approx_epsilon_ratio * perimeter;
        if !(epsilon > 0.0) {
            return None;
        }

        let simplified = approximate_polygon_dp(points, epsilon, true);
        let mut vertices: Vec<Point> = simplified.iter().map(to_point).collect();
        prune_closed_polygon(&mut vertices, epsilon);
        if vertices.len() != 4 {
            return None;
        }

        let quad = Quadrilateral::from_points(&vertices).ok()?;
        if !quad.is_convex() {
            return None;
        }

        let outline: Vec<Point> = points.iter().map(to_point).collect();
        let contour_area = polygon_area(&outline);
        let frame_area = width as f64 * height as f64;
        if contour_area < self.params.min_area_ratio * frame_area {
            return None;
        }

        // Ragged outlines (noise, text) are far longer than the quad they simplify to
        if perimeter > self.params.max_perimeter_ratio * quad.perimeter() {
            return None;
        }

        Some(Candidate {
            quad,
            contour_area,
            perimeter,
        })
    }

    /// Locate the document and return its corners in canonical order.
    ///
    /// Corners are the centres of the document's outermost pixels, refined
    /// against the grey image when `refine_radius` allows it.
    pub fn detect(&self, image: &DynamicImage) -> Result<Quadrilateral> {
        ensure_not_empty((image.width(), image.height()))?;
        let gray = image.to_luma8();
        let frame = gray.dimensions();

        let mut best: Option<(f64, Candidate)> = None;
        for candidate in self.candidates(&gray)? {
            let score = self.scorer.score(&candidate, frame);
            // Strictly greater keeps the first candidate on ties
            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, candidate));
            }
        }

        let (_, winner) = best.ok_or(ScanError::NoDocumentFound)?;
        let quad = refine_corners(&gray, &winner.quad, self.params.refine_radius)
            .unwrap_or(winner.quad);
        Ok(quad.canonical())
    }
}

fn to_point(p: &PixelPoint<i32>) -> Point {
    Point::new(p.x as f64, p.y as f64)
}

/// Drop vertices lying within `epsilon` of the line through their
/// neighbours, treating the polygon as closed. This also removes a trailing
/// vertex that only repeats the start of the contour.
fn prune_closed_polygon(vertices: &mut Vec<Point>, epsilon: f64) {
    let mut i = 0;
    while vertices.len() > 3 && i < vertices.len() {
        let n = vertices.len();
        let prev = vertices[(i + n - 1) % n];
        let next = vertices[(i + 1) % n];
        if distance_to_line(vertices[i], prev, next) < epsilon {
            vertices.remove(i);
            i = i.saturating_sub(1);
        } else {
            i += 1;
        }
    }
}

fn distance_to_line(p: Point, a: Point, b: Point) -> f64 {
    let len = a.distance(&b);
    if len < f64::EPSILON {
        return p.distance(&a);
    }
    ((b.x - a.x) * (a.y - p.y) - (a.x - p.x) * (b.y - a.y)).abs() / len
}

pub(crate) fn ensure_not_empty((width, height): (u32, u32)) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(ScanError::invalid(format!(
            "image has zero size ({}x{})",
            width, height
        )));
    }
    Ok(())
}

/// Detect document corners with the default parameters and area scoring
pub fn detect_document_corners(image: &DynamicImage) -> Result<Quadrilateral> {
    CornerDetector::new(DetectorParams::default()).detect(image)
}

/// The binary (0/255) Canny edge map the detector starts from
pub fn edge_map(image: &DynamicImage, params: &DetectorParams) -> Result<GrayImage> {
    ensure_not_empty((image.width(), image.height()))?;
    Ok(canny(
        &image.to_luma8(),
        params.low_threshold,
        params.high_threshold,
    ))
}

/// Black/white image thresholded at the Otsu level
pub fn binarize(image: &DynamicImage) -> Result<GrayImage> {
    ensure_not_empty((image.width(), image.height()))?;
    let gray = image.to_luma8();
    let level = otsu_level(&gray);

    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, pixel) in gray.enumerate_pixels() {
        let v = if pixel[0] > level { 255 } else { 0 };
        out.put_pixel(x, y, Luma([v]));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn white_rect(width: u32, height: u32, rect: Rect) -> DynamicImage {
        let mut img = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
        draw_filled_rect_mut(&mut img, rect, Rgb([255, 255, 255]));
        DynamicImage::ImageRgb8(img)
    }

    fn assert_corners(q: &Quadrilateral, expected: [(f64, f64); 4], tol: f64) {
        for (p, (x, y)) in q.corners().iter().zip(expected) {
            assert!(near(*p, x, y, tol), "{:?} vs {:?}", q, expected);
        }
    }

    fn near(p: Point, x: f64, y: f64, tol: f64) -> bool {
        (p.x - x).abs() <= tol && (p.y - y).abs() <= tol
    }

    #[test]
    fn test_default_params() {
        let p = DetectorParams::default();
        assert_eq!(p.low_threshold, 50.0);
        assert_eq!(p.high_threshold, 100.0);
        assert_eq!(p.approx_epsilon_ratio, 0.02);
        assert_eq!(p.frame_margin, 2);
        assert_eq!(p.refine_radius, 8.0);
    }

    #[test]
    fn test_params_partial_json_uses_defaults() {
        let p: DetectorParams = serde_json::from_str(r#"{"low_threshold": 30.0}"#).unwrap();
        assert_eq!(p.low_threshold, 30.0);
        assert_eq!(p.high_threshold, 100.0);
    }

    #[test]
    fn test_detect_rectangle() {
        let img = white_rect(400, 300, Rect::at(50, 50).of_size(300, 200));
        let q = detect_document_corners(&img).unwrap();
        assert_corners(&q, [(50.0, 50.0), (349.0, 50.0), (349.0, 249.0), (50.0, 249.0)], 0.5);
    }

    #[test]
    fn test_detect_rectangle_other_scales() {
        let img = white_rect(640, 480, Rect::at(100, 80).of_size(420, 300));
        let q = detect_document_corners(&img).unwrap();
        assert_corners(&q, [(100.0, 80.0), (519.0, 80.0), (519.0, 379.0), (100.0, 379.0)], 0.5);

        let img = white_rect(160, 120, Rect::at(20, 15).of_size(110, 80));
        let q = detect_document_corners(&img).unwrap();
        assert_corners(&q, [(20.0, 15.0), (129.0, 15.0), (129.0, 94.0), (20.0, 94.0)], 0.5);
    }

    #[test]
    fn test_page_near_frame_uses_inner_outline() {
        // The outer side of the edge ring falls inside the frame margin
        let img = white_rect(320, 240, Rect::at(3, 3).of_size(314, 234));
        let detector = CornerDetector::new(DetectorParams::default());
        let gray = img.to_luma8();
        let candidates = detector.candidates(&gray).unwrap();
        assert!(!candidates.is_empty());
        for c in &candidates {
            assert!(c.quad.corners().iter().all(|p| p.x >= 2.0 && p.y >= 2.0));
        }

        let q = detector.detect(&img).unwrap();
        assert_corners(&q, [(3.0, 3.0), (316.0, 3.0), (316.0, 236.0), (3.0, 236.0)], 0.5);
    }

    #[test]
    fn test_unrefined_corners_stay_near_the_edge() {
        let params = DetectorParams {
            refine_radius: 0.0,
            ..DetectorParams::default()
        };
        let img = white_rect(400, 300, Rect::at(50, 50).of_size(300, 200));
        let q = CornerDetector::new(params).detect(&img).unwrap();
        assert_corners(&q, [(50.0, 50.0), (349.0, 50.0), (349.0, 249.0), (50.0, 249.0)], 8.0);
    }

    #[test]
    fn test_largest_candidate_wins() {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([0, 0, 0]));
        draw_filled_rect_mut(&mut img, Rect::at(20, 20).of_size(80, 60), Rgb([255, 255, 255]));
        draw_filled_rect_mut(&mut img, Rect::at(150, 100).of_size(200, 150), Rgb([255, 255, 255]));
        let q = detect_document_corners(&DynamicImage::ImageRgb8(img)).unwrap();
        assert!(near(q.top_left(), 150.0, 100.0, 0.5), "{:?}", q);
        assert!(near(q.bottom_right(), 349.0, 249.0, 0.5), "{:?}", q);
    }

    #[test]
    fn test_centrality_scorer_prefers_central_candidate() {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([0, 0, 0]));
        // Larger but pushed into a corner
        draw_filled_rect_mut(&mut img, Rect::at(10, 10).of_size(130, 110), Rgb([255, 255, 255]));
        // Smaller and centred
        draw_filled_rect_mut(&mut img, Rect::at(160, 110).of_size(100, 90), Rgb([255, 255, 255]));
        let img = DynamicImage::ImageRgb8(img);

        let by_area = CornerDetector::new(DetectorParams::default())
            .detect(&img)
            .unwrap();
        assert!(near(by_area.top_left(), 10.0, 10.0, 0.5), "{:?}", by_area);

        let central = CornerDetector::with_scorer(DetectorParams::default(), CentralityScorer)
            .detect(&img)
            .unwrap();
        assert!(near(central.top_left(), 160.0, 110.0, 0.5), "{:?}", central);
    }

    #[test]
    fn test_black_image_not_found() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 150));
        assert_eq!(detect_document_corners(&img), Err(ScanError::NoDocumentFound));
    }

    #[test]
    fn test_tiny_rect_filtered_by_area() {
        let img = white_rect(400, 300, Rect::at(100, 100).of_size(10, 10));
        assert_eq!(detect_document_corners(&img), Err(ScanError::NoDocumentFound));
    }

    #[test]
    fn test_empty_image_invalid() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            detect_document_corners(&img),
            Err(ScanError::InvalidInput(_))
        ));
        assert!(matches!(
            edge_map(&img, &DetectorParams::default()),
            Err(ScanError::InvalidInput(_))
        ));
        assert!(matches!(binarize(&img), Err(ScanError::InvalidInput(_))));
        assert!(matches!(
            CornerDetector::new(DetectorParams::default()).candidates(&GrayImage::new(0, 0)),
            Err(ScanError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_prune_drops_closing_duplicate_and_collinear() {
        let mut v = vec![
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.5),
            Point::new(100.0, 0.0),
            Point::new(100.0, 80.0),
            Point::new(0.0, 80.0),
            Point::new(0.0, 1.0),
        ];
        prune_closed_polygon(&mut v, 2.0);
        assert_eq!(v.len(), 4);
        assert!(v.contains(&Point::new(100.0, 80.0)));
        assert!(!v.contains(&Point::new(50.0, 0.5)));
    }

    #[test]
    fn test_edge_map_is_binary() {
        let img = white_rect(120, 90, Rect::at(30, 20).of_size(60, 50));
        let edges = edge_map(&img, &DetectorParams::default()).unwrap();
        assert_eq!(edges.dimensions(), (120, 90));
        assert!(edges.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert!(edges.pixels().any(|p| p[0] == 255));
        // Flat interior carries no edges
        assert_eq!(edges.get_pixel(60, 45)[0], 0);
    }

    #[test]
    fn test_binarize_two_levels() {
        let mut img = GrayImage::from_pixel(40, 20, Luma([30]));
        for y in 0..20 {
            for x in 20..40 {
                img.put_pixel(x, y, Luma([200]));
            }
        }
        let bin = binarize(&DynamicImage::ImageLuma8(img)).unwrap();
        assert_eq!(bin.get_pixel(5, 5)[0], 0);
        assert_eq!(bin.get_pixel(35, 5)[0], 255);
    }
}
