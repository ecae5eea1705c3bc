//! Box and identity overlays for annotated clips.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::geometry::BoundingBox;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const ADVANCE: i32 = 6;

/// Draw a track's box with an `ID: <id>` tag above its top-left corner.
pub fn draw_track(image: &mut RgbImage, bbox: &BoundingBox, track_id: u64) {
    let clamped = bbox.clamp_to(image.width(), image.height());
    if clamped.width() == 0 || clamped.height() == 0 {
        return;
    }
    for inset in 0..BOX_THICKNESS {
        let w = clamped.width() - 2 * inset;
        let h = clamped.height() - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(clamped.x1 + inset, clamped.y1 + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }

    let text = format!("ID: {track_id}");
    let text_w = text.chars().count() as i32 * ADVANCE;
    let x = clamped.x1;
    let y = if clamped.y1 >= GLYPH_H + 4 {
        clamped.y1 - GLYPH_H - 3
    } else {
        clamped.y1 + BOX_THICKNESS + 1
    };
    draw_filled_rect_mut(
        image,
        Rect::at(x, y - 1).of_size(text_w as u32 + 1, GLYPH_H as u32 + 2),
        LABEL_BACKGROUND,
    );
    draw_text(image, x + 1, y, &text, BOX_COLOR);
}

/// 5x7 bitmap text; unknown characters advance without drawing.
pub fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..GLYPH_W {
                    let px = x + col;
                    if (pattern >> (GLYPH_W - 1 - col)) & 1 == 1 && px >= 0 && px < width {
                        image.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
        x += ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        ':' => [0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0],
        ' ' => [0; 7],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        _ => return None,
    };
    Some(bits)
}
