use clap::ValueEnum;
use image::{DynamicImage, ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};

use crate::detection::ensure_not_empty;
use crate::error::{Result, ScanError};
use crate::geometry::{Point, Quadrilateral, Transform};

/// Upper bound on output pixels, so a wild quadrilateral cannot request gigabytes
const MAX_OUTPUT_PIXELS: u64 = 1 << 28;

/// Slack on the sampling band, absorbing round-off in the inverse mapping
const BAND_TOLERANCE: f64 = 1e-6;

/// How source pixels are sampled during the warp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

/// Tunables for the perspective rectifier
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyParams {
    pub interpolation: Interpolation,
}

/// A rectified document plus the geometry that produced it
#[derive(Debug, Clone)]
pub struct Rectified {
    pub image: DynamicImage,
    pub width: u32,
    pub height: u32,
    /// Source quadrilateral → output rectangle
    pub transform: Transform,
}

impl Rectified {
    /// Quadrilateral covering the whole rectified image
    pub fn frame_quad(&self) -> Quadrilateral {
        Quadrilateral::full_frame(self.width, self.height)
    }
}

/// Output size for a quadrilateral: the longer of each pair of opposite edges
pub fn output_size(quad: &Quadrilateral) -> (f64, f64) {
    let width = quad
        .top_left()
        .distance(&quad.top_right())
        .max(quad.bottom_left().distance(&quad.bottom_right()));
    let height = quad
        .top_left()
        .distance(&quad.bottom_left())
        .max(quad.top_right().distance(&quad.bottom_right()));
    (width, height)
}

/// Rectify with bilinear sampling
pub fn rectify_perspective(image: &DynamicImage, quad: &Quadrilateral) -> Result<Rectified> {
    rectify_perspective_with(image, quad, &RectifyParams::default())
}

/// Warp the region inside `quad` onto an upright rectangle.
///
/// Corners are taken as given, in `[top-left, top-right, bottom-right,
/// bottom-left]` order, and land on `(0,0)`, `(W-1,0)`, `(W-1,H-1)`, `(0,H-1)`.
/// Luma8 and Rgba8 inputs keep their pixel format; anything else is warped
/// as Rgb8.
pub fn rectify_perspective_with(
    image: &DynamicImage,
    quad: &Quadrilateral,
    params: &RectifyParams,
) -> Result<Rectified> {
    ensure_not_empty((image.width(), image.height()))?;
    quad.validate()?;

    let (w, h) = output_size(quad);
    let (width, height) = (w.round(), h.round());
    if width < 2.0 || height < 2.0 {
        return Err(ScanError::geometry(format!(
            "quadrilateral collapses to a {}x{} output",
            width, height
        )));
    }
    if width * height > MAX_OUTPUT_PIXELS as f64 {
        return Err(ScanError::geometry(format!(
            "quadrilateral would need a {}x{} output",
            width, height
        )));
    }
    let (width, height) = (width as u32, height as u32);

    let (right, bottom) = ((width - 1) as f64, (height - 1) as f64);
    let target = Quadrilateral::new([
        Point::new(0.0, 0.0),
        Point::new(right, 0.0),
        Point::new(right, bottom),
        Point::new(0.0, bottom),
    ]);

    let transform = Transform::from_quads(quad, &target)?;
    let inverse = transform.inverse()?;
    let interpolation = params.interpolation;

    let warped = match image {
        DynamicImage::ImageLuma8(gray) => {
            DynamicImage::ImageLuma8(warp_perspective(gray, &inverse, width, height, interpolation))
        }
        DynamicImage::ImageRgba8(rgba) => {
            DynamicImage::ImageRgba8(warp_perspective(rgba, &inverse, width, height, interpolation))
        }
        other => DynamicImage::ImageRgb8(warp_perspective(
            &other.to_rgb8(),
            &inverse,
            width,
            height,
            interpolation,
        )),
    };

    Ok(Rectified {
        image: warped,
        width,
        height,
        transform,
    })
}

/// Inverse-map every output pixel into `src` and sample it there.
///
/// `inverse` maps output coordinates to source coordinates. Source positions
/// inside `[-1, w] × [-1, h]` are sampled with neighbours clamped to the edge;
/// positions outside that band stay black (all channels zero).
pub fn warp_perspective<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    inverse: &Transform,
    width: u32,
    height: u32,
    interpolation: Interpolation,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (src_width, src_height) = src.dimensions();
    let channels = P::CHANNEL_COUNT as usize;
    let mut values = vec![0u8; channels];
    let mut output = ImageBuffer::<P, Vec<u8>>::new(width, height);

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let s = inverse.apply(Point::new(out_x as f64, out_y as f64));

        if !(s.x >= -1.0 - BAND_TOLERANCE
            && s.x <= src_width as f64 + BAND_TOLERANCE
            && s.y >= -1.0 - BAND_TOLERANCE
            && s.y <= src_height as f64 + BAND_TOLERANCE)
        {
            continue;
        }

        match interpolation {
            Interpolation::Nearest => {
                let px = (s.x.round() as i64).clamp(0, src_width as i64 - 1) as u32;
                let py = (s.y.round() as i64).clamp(0, src_height as i64 - 1) as u32;
                values.copy_from_slice(src.get_pixel(px, py).channels());
            }
            Interpolation::Bilinear => bilinear_interpolate(src, s.x, s.y, &mut values),
        }

        *pixel = *P::from_slice(&values);
    }

    output
}

/// Bilinear sample at a fractional position, clamping neighbours to the image
fn bilinear_interpolate<P>(src: &ImageBuffer<P, Vec<u8>>, x: f64, y: f64, out: &mut [u8])
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = src.dimensions();
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x_frac = x - x.floor();
    let y_frac = y - y.floor();

    let get_pixel = |px: i64, py: i64| {
        let px = px.clamp(0, width as i64 - 1) as u32;
        let py = py.clamp(0, height as i64 - 1) as u32;
        src.get_pixel(px, py).channels()
    };

    let p00 = get_pixel(x0, y0);
    let p10 = get_pixel(x0 + 1, y0);
    let p01 = get_pixel(x0, y0 + 1);
    let p11 = get_pixel(x0 + 1, y0 + 1);

    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - x_frac) + p10[c] as f64 * x_frac;
        let bottom = p01[c] as f64 * (1.0 - x_frac) + p11[c] as f64 * x_frac;
        *value = (top * (1.0 - y_frac) + bottom * y_frac)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}
