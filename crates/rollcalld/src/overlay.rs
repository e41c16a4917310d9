//! Annotates live frames with recognized faces.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use rollcall_core::{FaceBox, Recognition};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const GLYPH_SIZE: u32 = 8;
const LABEL_PADDING: u32 = 2;
const LABEL_HEIGHT: u32 = GLYPH_SIZE + 2 * LABEL_PADDING;

/// Draw a green box around each recognized face with a
/// `"{name} ({confidence:.2})"` banner along its bottom edge.
pub fn draw_recognitions(image: &mut RgbImage, recognized: &[Recognition]) {
    for rec in recognized {
        let Some(rect) = clip(image, rec.location) else {
            continue;
        };
        draw_hollow_rect_mut(image, rect, BOX_COLOR);

        let band_height = LABEL_HEIGHT.min(rect.height());
        let band_top = rect.bottom() + 1 - band_height as i32;
        let band = Rect::at(rect.left(), band_top).of_size(rect.width(), band_height);
        draw_filled_rect_mut(image, band, BOX_COLOR);

        let text = label(rec);
        draw_text(
            image,
            rect.left() + LABEL_PADDING as i32,
            band_top + LABEL_PADDING as i32,
            rect.right(),
            &text,
        );
    }
}

pub(crate) fn label(rec: &Recognition) -> String {
    format!("{} ({:.2})", rec.name, rec.confidence)
}

/// Render `text` with 8x8 bitmap glyphs, stopping at column `max_x`.
/// Characters without a glyph render as `?`.
fn draw_text(image: &mut RgbImage, x: i32, y: i32, max_x: i32, text: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    for (i, c) in text.chars().enumerate() {
        let origin = x + (i as u32 * GLYPH_SIZE) as i32;
        if origin + GLYPH_SIZE as i32 > max_x {
            break;
        }
        let Some(glyph) = BASIC_FONTS.get(c).or_else(|| BASIC_FONTS.get('?')) else {
            continue;
        };
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE as usize {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let (px, py) = (origin + col as i32, y + row as i32);
                if (0..w).contains(&px) && (0..h).contains(&py) {
                    image.put_pixel(px as u32, py as u32, TEXT_COLOR);
                }
            }
        }
    }
}

/// Intersect a face box with the image bounds.
fn clip(image: &RgbImage, face: FaceBox) -> Option<Rect> {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let left = face.left.clamp(0, w);
    let right = face.right.clamp(0, w);
    let top = face.top.clamp(0, h);
    let bottom = face.bottom.clamp(0, h);
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32))
}
