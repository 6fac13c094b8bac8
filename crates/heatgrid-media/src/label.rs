//! Tiny bitmap text for track labels on annotated frames.

use heatgrid_models::BoundingBox;
use image::{Rgb, RgbImage};

const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;

/// Gap between the label baseline and the top edge of its box.
const LABEL_GAP: u32 = 2;

/// 3x5 glyph rows, most significant bit leftmost. Unknown characters are blank.
const fn glyph_bits(ch: char) -> [u8; 5] {
    match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        _ => [0; 5],
    }
}

/// Pixel size of `text` drawn at `scale`.
pub fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    let width = (chars * (GLYPH_WIDTH + 1)).saturating_sub(1) * scale;
    (width, GLYPH_HEIGHT * scale)
}

/// Draw `text` with its top-left corner at `(x, y)`, clipped to the frame.
pub fn draw_text(frame: &mut RgbImage, x: i64, y: i64, text: &str, color: Rgb<u8>, scale: u32) {
    let (width, height) = frame.dimensions();
    let scale = i64::from(scale.max(1));
    let mut cursor = x;

    for ch in text.chars() {
        if cursor >= i64::from(width) {
            break;
        }
        for (row, bits) in glyph_bits(ch.to_ascii_uppercase()).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                    continue;
                }
                let px = cursor + i64::from(col) * scale;
                let py = y + row as i64 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (tx, ty) = (px + dx, py + dy);
                        if (0..i64::from(width)).contains(&tx) && (0..i64::from(height)).contains(&ty) {
                            frame.put_pixel(tx as u32, ty as u32, color);
                        }
                    }
                }
            }
        }
        cursor += i64::from(GLYPH_WIDTH + 1) * scale;
    }
}

/// Label a track box with `ID <identity>` just above its top-left corner.
///
/// Falls back to just inside the box when there is no room above it.
pub fn draw_identity_label(
    frame: &mut RgbImage,
    bbox: &BoundingBox,
    identity: i64,
    color: Rgb<u8>,
    scale: u32,
) {
    let text = format!("ID {}", identity);
    let (_, text_height) = text_size(&text, scale.max(1));
    let left = bbox.x1.min(bbox.x2).round() as i64;
    let top = bbox.y1.min(bbox.y2).round() as i64;

    let above = top - i64::from(text_height + LABEL_GAP);
    let y = if above >= 0 { above } else { top + i64::from(LABEL_GAP) + 1 };
    draw_text(frame, left.max(0), y, &text, color, scale);
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    fn lit(frame: &RgbImage) -> Vec<(u32, u32)> {
        frame
            .enumerate_pixels()
            .filter(|(_, _, p)| **p != Rgb([0, 0, 0]))
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    #[test]
    fn test_text_size() {
        assert_eq!(text_size("ID 7", 1), (15, 5));
        assert_eq!(text_size("ID 7", 2), (30, 10));
        assert_eq!(text_size("", 2), (0, 10));
    }

    #[test]
    fn test_draw_digit() {
        let mut frame = RgbImage::new(8, 8);
        draw_text(&mut frame, 1, 1, "1", WHITE, 1);

        // Column stroke of the "1" glyph plus its base.
        assert_eq!(*frame.get_pixel(2, 1), WHITE);
        assert_eq!(*frame.get_pixel(2, 3), WHITE);
        assert_eq!(*frame.get_pixel(1, 5), WHITE);
        assert_eq!(*frame.get_pixel(3, 5), WHITE);
        assert_eq!(*frame.get_pixel(3, 1), Rgb([0, 0, 0]));
        assert_eq!(lit(&frame).len(), 8);
    }

    #[test]
    fn test_draw_clipped_at_edges() {
        let mut frame = RgbImage::new(4, 4);
        draw_text(&mut frame, -2, -2, "88", WHITE, 2);
        assert!(!lit(&frame).is_empty());
        assert!(lit(&frame).iter().all(|&(x, y)| x < 4 && y < 4));
    }

    #[test]
    fn test_label_above_box() {
        let mut frame = RgbImage::new(100, 100);
        let bbox = BoundingBox::new(20.0, 40.0, 60.0, 90.0);
        draw_identity_label(&mut frame, &bbox, 42, WHITE, 2);

        let pixels = lit(&frame);
        assert!(!pixels.is_empty());
        // 10 px of text plus the gap, ending above the box top.
        assert!(pixels.iter().all(|&(_, y)| (28..40).contains(&y)));
        assert!(pixels.iter().all(|&(x, _)| x >= 20));
    }

    #[test]
    fn test_label_inside_when_box_touches_top() {
        let mut frame = RgbImage::new(100, 100);
        let bbox = BoundingBox::new(10.0, 0.0, 60.0, 50.0);
        draw_identity_label(&mut frame, &bbox, 3, WHITE, 2);

        let pixels = lit(&frame);
        assert!(!pixels.is_empty());
        assert!(pixels.iter().all(|&(_, y)| (3..13).contains(&y)));
    }
}
