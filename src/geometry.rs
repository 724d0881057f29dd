// ============================================================================
// GEOMETRY - letterbox mapping between displayed images and pixel space
// ============================================================================
//
// Two coordinate problems live here:
//   * a scene is shown "contain"-fitted inside a drop zone, so a pointer
//     position must be corrected for the letterbox bands before it means
//     anything relative to the image;
//   * the compositing model consumes a fixed-size square, so positions must be
//     carried into that square frame and back out again.
//
// Everything in this module is pure.

use serde::{Deserialize, Serialize};

/// A point in some 2-D pixel space. Which space is up to the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub const fn square(side: f64) -> Self {
        Self::new(side, side)
    }

    /// Width over height, or `None` for an empty or non-finite size.
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.is_degenerate() {
            None
        } else {
            Some(self.width / self.height)
        }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width as f64, height as f64)
    }
}

/// Axis-aligned rectangle: origin at the top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Inclusive on all four edges, matching how the drop zone is hit-tested.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Translate a point into this rectangle's local coordinate space.
    pub fn to_local(&self, p: Point) -> Point {
        Point::new(p.x - self.x, p.y - self.y)
    }
}

/// The pointer fell in a letterbox band, in the square frame's padding, or
/// the inputs were degenerate. Never shown to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("position lies outside the rendered image")]
pub struct OutOfBounds;

/// Position inside an image, as percentages of its width and height.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelativePosition {
    pub x_percent: f64,
    pub y_percent: f64,
}

impl RelativePosition {
    /// Values are clamped into `[0, 100]`.
    pub fn new(x_percent: f64, y_percent: f64) -> Self {
        Self {
            x_percent: x_percent.clamp(0.0, 100.0),
            y_percent: y_percent.clamp(0.0, 100.0),
        }
    }

    /// The corresponding pixel inside an image of the given natural size.
    pub fn to_pixel(&self, natural: Size) -> Point {
        Point::new(
            natural.width * self.x_percent / 100.0,
            natural.height * self.y_percent / 100.0,
        )
    }
}

// ============================================================================
// CONTAIN FIT
// ============================================================================

/// Where an image of `natural` size ends up when drawn "contain"-fitted into
/// a box of `container` size: aspect preserved, centered, letterboxed.
///
/// The returned rect is relative to the container's own origin. `None` when
/// either size is degenerate.
pub fn contain_fit(container: Size, natural: Size) -> Option<Rect> {
    let image_aspect = natural.aspect_ratio()?;
    let container_aspect = container.aspect_ratio()?;

    let (rendered_w, rendered_h) = if image_aspect > container_aspect {
        // Relatively wider: full width, bands above and below
        (container.width, container.width / image_aspect)
    } else {
        (container.height * image_aspect, container.height)
    };

    Some(Rect::new(
        (container.width - rendered_w) / 2.0,
        (container.height - rendered_h) / 2.0,
        rendered_w,
        rendered_h,
    ))
}

/// Map a pointer position over a letterboxed image to image-relative
/// percentages.
///
/// `container` is the drop zone's bounding rect and `pointer` is in the same
/// space (typically the viewport). Pointer-drop and touch-release both go
/// through this one function so the two input paths can never disagree.
pub fn to_relative(
    container: Rect,
    natural: Size,
    pointer: Point,
) -> Result<RelativePosition, OutOfBounds> {
    if !pointer.is_finite() || !container.x.is_finite() || !container.y.is_finite() {
        return Err(OutOfBounds);
    }
    let rendered = contain_fit(container.size(), natural).ok_or(OutOfBounds)?;

    let local = rendered.to_local(container.to_local(pointer));
    if local.x < 0.0 || local.x > rendered.width || local.y < 0.0 || local.y > rendered.height {
        return Err(OutOfBounds);
    }

    Ok(RelativePosition::new(
        100.0 * local.x / rendered.width,
        100.0 * local.y / rendered.height,
    ))
}

// ============================================================================
// SQUARE FRAME - fixed-size model input
// ============================================================================

/// Placement of an image inside the `side × side` square the model consumes.
///
/// The image is scaled so its longer edge equals `side` and centered; the
/// rest of the square is padding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SquareFrame {
    natural: Size,
    side: u32,
    scale: f64,
    content: Rect,
}

impl SquareFrame {
    pub fn new(natural: Size, side: u32) -> Option<Self> {
        if side == 0 {
            return None;
        }
        let content = contain_fit(Size::square(side as f64), natural)?;
        Some(Self {
            natural,
            side,
            scale: content.width / natural.width,
            content,
        })
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn natural(&self) -> Size {
        self.natural
    }

    /// Square pixels per original pixel.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// The region of the square covered by the image.
    pub fn content_rect(&self) -> Rect {
        self.content
    }

    /// `content_rect` snapped to whole pixels and clamped to the square:
    /// `(x, y, width, height)`, width and height at least 1.
    pub fn content_pixels(&self) -> (u32, u32, u32, u32) {
        let side = self.side;
        let x = (self.content.x.round().max(0.0) as u32).min(side - 1);
        let y = (self.content.y.round().max(0.0) as u32).min(side - 1);
        let w = (self.content.width.round() as u32).clamp(1, side - x);
        let h = (self.content.height.round() as u32).clamp(1, side - y);
        (x, y, w, h)
    }

    /// Carry an image-relative position into square pixel coordinates.
    pub fn to_square(&self, pos: RelativePosition) -> Point {
        Point::new(
            self.content.x + self.content.width * pos.x_percent / 100.0,
            self.content.y + self.content.height * pos.y_percent / 100.0,
        )
    }

    /// Invert a square-canvas coordinate back to original pixel coordinates.
    pub fn from_square(&self, p: Point) -> Result<Point, OutOfBounds> {
        if !p.is_finite() {
            return Err(OutOfBounds);
        }
        let local = self.content.to_local(p);
        if local.x < 0.0
            || local.x > self.content.width
            || local.y < 0.0
            || local.y > self.content.height
        {
            return Err(OutOfBounds);
        }
        Ok(Point::new(local.x / self.scale, local.y / self.scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn wide_image_in_wide_container_letterboxes_vertically() {
        let fit = contain_fit(Size::new(200.0, 100.0), Size::new(400.0, 100.0)).unwrap();
        assert_eq!(fit, Rect::new(0.0, 25.0, 200.0, 50.0));
    }

    #[test]
    fn tall_image_letterboxes_horizontally() {
        let fit = contain_fit(Size::new(200.0, 100.0), Size::new(100.0, 100.0)).unwrap();
        assert_eq!(fit, Rect::new(50.0, 0.0, 100.0, 100.0));
    }

    #[test]
    fn center_of_container_maps_to_center_of_image() {
        let container = Rect::new(0.0, 0.0, 200.0, 100.0);
        let pos = to_relative(container, Size::new(400.0, 100.0), Point::new(100.0, 50.0)).unwrap();
        assert!((pos.x_percent - 50.0).abs() < EPS);
        assert!((pos.y_percent - 50.0).abs() < EPS);
    }

    #[test]
    fn top_band_is_out_of_bounds() {
        let container = Rect::new(0.0, 0.0, 200.0, 100.0);
        let res = to_relative(container, Size::new(400.0, 100.0), Point::new(100.0, 10.0));
        assert_eq!(res, Err(OutOfBounds));
    }

    #[test]
    fn container_origin_is_subtracted() {
        let container = Rect::new(30.0, 40.0, 200.0, 100.0);
        let pos = to_relative(container, Size::new(400.0, 100.0), Point::new(80.0, 65.0)).unwrap();
        assert!((pos.x_percent - 25.0).abs() < EPS);
        assert!(pos.y_percent.abs() < EPS);
    }

    #[test]
    fn rendered_edges_are_inside() {
        let container = Rect::new(0.0, 0.0, 200.0, 100.0);
        let natural = Size::new(400.0, 100.0);
        let corner = to_relative(container, natural, Point::new(200.0, 75.0)).unwrap();
        assert_eq!(corner, RelativePosition::new(100.0, 100.0));
        assert!(to_relative(container, natural, Point::new(200.1, 75.0)).is_err());
    }

    #[test]
    fn degenerate_sizes_are_out_of_bounds() {
        let p = Point::new(1.0, 1.0);
        assert!(to_relative(Rect::new(0.0, 0.0, 0.0, 10.0), Size::new(10.0, 10.0), p).is_err());
        assert!(to_relative(Rect::new(0.0, 0.0, 10.0, 10.0), Size::new(10.0, 0.0), p).is_err());
        assert!(
            to_relative(Rect::new(0.0, 0.0, 10.0, 10.0), Size::new(10.0, 10.0), Point::new(f64::NAN, 1.0))
                .is_err()
        );
    }

    #[test]
    fn square_frame_pads_landscape_top_and_bottom() {
        let frame = SquareFrame::new(Size::new(2000.0, 1000.0), 1024).unwrap();
        assert_eq!(frame.content_rect(), Rect::new(0.0, 256.0, 1024.0, 512.0));
        assert_eq!(frame.content_pixels(), (0, 256, 1024, 512));
        assert!((frame.scale() - 0.512).abs() < EPS);
    }

    #[test]
    fn square_frame_maps_center_and_back() {
        let frame = SquareFrame::new(Size::new(2000.0, 1000.0), 1024).unwrap();
        let sq = frame.to_square(RelativePosition::new(50.0, 50.0));
        assert_eq!(sq, Point::new(512.0, 512.0));
        let back = frame.from_square(sq).unwrap();
        assert!((back.x - 1000.0).abs() < 1e-6);
        assert!((back.y - 500.0).abs() < 1e-6);
    }

    #[test]
    fn square_padding_is_out_of_bounds() {
        let frame = SquareFrame::new(Size::new(1000.0, 2000.0), 1024).unwrap();
        assert_eq!(frame.from_square(Point::new(100.0, 512.0)), Err(OutOfBounds));
    }

    #[test]
    fn zero_side_frame_is_rejected() {
        assert!(SquareFrame::new(Size::new(10.0, 10.0), 0).is_none());
    }
}
