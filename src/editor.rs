//! Manual corner correction as a small state machine.
//!
//! A front end feeds pointer events in; the editor moves corners around and
//! only touches the rectifier when the caller commits.

use image::DynamicImage;

use crate::error::Result;
use crate::geometry::{Point, Quadrilateral};
use crate::transform::{rectify_perspective_with, Rectified, RectifyParams};

/// Distance (in pixels) within which a press grabs a corner
pub const DEFAULT_GRAB_RADIUS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Idle,
    DraggingCorner(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Press(Point),
    Move(Point),
}

#[derive(Debug, Clone)]
pub struct CornerEditor {
    quad: Quadrilateral,
    state: EditState,
    grab_radius: f64,
}

impl CornerEditor {
    pub fn new(quad: Quadrilateral) -> Self {
        Self {
            quad,
            state: EditState::Idle,
            grab_radius: DEFAULT_GRAB_RADIUS,
        }
    }

    pub fn with_grab_radius(mut self, radius: f64) -> Self {
        self.grab_radius = radius;
        self
    }

    pub fn quad(&self) -> &Quadrilateral {
        &self.quad
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    /// Feed one pointer event; returns true if the quad or the state changed.
    ///
    /// A press while idle grabs the first corner (in array order) within the
    /// grab radius. Moves while dragging relocate that corner in place. Any
    /// press while dragging drops the corner where it is.
    pub fn handle(&mut self, event: PointerEvent) -> bool {
        match (self.state, event) {
            (EditState::Idle, PointerEvent::Press(at)) => {
                let hit = self
                    .quad
                    .corners()
                    .iter()
                    .position(|c| c.distance(&at) < self.grab_radius);
                match hit {
                    Some(index) => {
                        self.state = EditState::DraggingCorner(index);
                        true
                    }
                    None => false,
                }
            }
            (EditState::DraggingCorner(_), PointerEvent::Press(_)) => {
                self.state = EditState::Idle;
                true
            }
            (EditState::DraggingCorner(index), PointerEvent::Move(to)) => {
                self.quad.set_corner(index, to).is_ok()
            }
            (EditState::Idle, PointerEvent::Move(_)) => false,
        }
    }

    /// Rectify `image` with the edited corners, in the order they are held
    pub fn commit(&self, image: &DynamicImage, params: &RectifyParams) -> Result<Rectified> {
        rectify_perspective_with(image, &self.quad, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use image::{Rgb, RgbImage};

    fn editor() -> CornerEditor {
        CornerEditor::new(Quadrilateral::inset(200, 100, 10.0))
    }

    #[test]
    fn test_press_away_from_corners_stays_idle() {
        let mut ed = editor();
        assert!(!ed.handle(PointerEvent::Press(Point::new(100.0, 50.0))));
        assert_eq!(ed.state(), EditState::Idle);
        assert!(!ed.handle(PointerEvent::Move(Point::new(12.0, 12.0))));
        assert_eq!(*ed.quad(), Quadrilateral::inset(200, 100, 10.0));
    }

    #[test]
    fn test_drag_moves_only_grabbed_corner() {
        let mut ed = editor();
        assert!(ed.handle(PointerEvent::Press(Point::new(188.0, 14.0))));
        assert_eq!(ed.state(), EditState::DraggingCorner(1));

        ed.handle(PointerEvent::Move(Point::new(170.0, 30.0)));
        ed.handle(PointerEvent::Move(Point::new(175.0, 25.0)));
        assert_eq!(ed.quad().top_right(), Point::new(175.0, 25.0));
        assert_eq!(ed.quad().top_left(), Point::new(10.0, 10.0));

        assert!(ed.handle(PointerEvent::Press(Point::new(175.0, 25.0))));
        assert_eq!(ed.state(), EditState::Idle);
        ed.handle(PointerEvent::Move(Point::new(0.0, 0.0)));
        assert_eq!(ed.quad().top_right(), Point::new(175.0, 25.0));
    }

    #[test]
    fn test_drag_never_reorders() {
        let mut ed = editor();
        // Drag top-left past top-right; indices must not swap
        ed.handle(PointerEvent::Press(Point::new(10.0, 10.0)));
        ed.handle(PointerEvent::Move(Point::new(195.0, 5.0)));
        ed.handle(PointerEvent::Press(Point::new(195.0, 5.0)));
        assert_eq!(ed.quad()[0], Point::new(195.0, 5.0));
        assert_eq!(ed.quad()[1], Point::new(190.0, 10.0));
    }

    #[test]
    fn test_commit_rectifies() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([9, 9, 9])));
        let ed = editor();
        let out = ed.commit(&img, &RectifyParams::default()).unwrap();
        assert_eq!((out.width, out.height), (180, 80));
    }

    #[test]
    fn test_commit_degenerate_fails() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let mut ed = editor();
        ed.handle(PointerEvent::Press(Point::new(10.0, 10.0)));
        ed.handle(PointerEvent::Move(Point::new(190.0, 10.0)));
        assert!(matches!(
            ed.commit(&img, &RectifyParams::default()),
            Err(ScanError::Geometry(_))
        ));
    }
}
