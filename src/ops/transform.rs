// ============================================================================
// SQUARE FRAME TRANSFORMS - pad to the model's square input and back
// ============================================================================

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::geometry::{Point, Size, SquareFrame};

/// Fill used for the padding bands around a framed image.
pub const PAD_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Scale `image` so its longer edge is `side` and center it on a
/// `side × side` canvas. Returns the canvas and the frame needed to undo the
/// padding later. `None` for an empty image or a zero side.
pub fn pad_to_square(image: &RgbaImage, side: u32) -> Option<(RgbaImage, SquareFrame)> {
    let frame = SquareFrame::new(Size::from(image.dimensions()), side)?;
    let (x, y, w, h) = frame.content_pixels();

    let resized = if (w, h) == image.dimensions() {
        image.clone()
    } else {
        imageops::resize(image, w, h, FilterType::Lanczos3)
    };

    let mut canvas = RgbaImage::from_pixel(side, side, PAD_COLOR);
    imageops::replace(&mut canvas, &resized, x as i64, y as i64);
    Some((canvas, frame))
}

/// Cut the image region back out of a square model output and restore the
/// original pixel size.
///
/// The model may answer at a different resolution than it was given, so the
/// content rect is rescaled to the output's actual size first.
pub fn crop_from_square(output: &RgbaImage, frame: &SquareFrame) -> RgbaImage {
    let (out_w, out_h) = output.dimensions();
    let side = frame.side() as f64;
    let fx = out_w as f64 / side;
    let fy = out_h as f64 / side;

    let (x, y, w, h) = frame.content_pixels();
    let cx = ((x as f64 * fx).round() as u32).min(out_w.saturating_sub(1));
    let cy = ((y as f64 * fy).round() as u32).min(out_h.saturating_sub(1));
    let cw = ((w as f64 * fx).round() as u32).clamp(1, out_w.saturating_sub(cx).max(1));
    let ch = ((h as f64 * fy).round() as u32).clamp(1, out_h.saturating_sub(cy).max(1));

    let cropped = imageops::crop_imm(output, cx, cy, cw, ch).to_image();

    let natural = frame.natural();
    let nw = (natural.width.round() as u32).max(1);
    let nh = (natural.height.round() as u32).max(1);
    if cropped.dimensions() == (nw, nh) {
        cropped
    } else {
        imageops::resize(&cropped, nw, nh, FilterType::Lanczos3)
    }
}

/// Filled disc with a one-pixel white ring, used to mark the drop point on
/// the debug image.
pub fn draw_marker(image: &mut RgbaImage, center: Point, radius: u32, color: Rgba<u8>) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let r = radius.max(1) as f64;
    let ring = r + 1.5;
    let min_x = (center.x - ring).floor().max(0.0) as u32;
    let min_y = (center.y - ring).floor().max(0.0) as u32;
    let max_x = ((center.x + ring).ceil().max(0.0) as u32).min(w - 1);
    let max_y = ((center.y + ring).ceil().max(0.0) as u32).min(h - 1);

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = x as f64 + 0.5 - center.x;
            let dy = y as f64 + 0.5 - center.y;
            let d = (dx * dx + dy * dy).sqrt();
            if d <= r {
                image.put_pixel(x, y, color);
            } else if d <= ring {
                image.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
    }
}
