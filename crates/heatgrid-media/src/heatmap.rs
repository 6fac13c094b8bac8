//! Heat layer rendering: normalization, upscaling, blending and annotation.

use heatgrid_models::{BoundingBox, GridDims, Resolution};
use image::{Rgb, RgbImage};

use crate::colormap::ColorMap;
use crate::error::{MediaError, MediaResult};

/// Min-max normalize counts into `[0, 255]`.
///
/// A grid whose cells are all equal (including all zero) normalizes to all
/// zero rather than dividing by zero.
pub fn normalize_min_max(counts: &[u32]) -> Vec<u8> {
    let Some(&min) = counts.iter().min() else {
        return Vec::new();
    };
    let max = counts.iter().copied().max().unwrap_or(min);
    if max == min {
        return vec![0; counts.len()];
    }

    let range = (max - min) as f32;
    counts
        .iter()
        .map(|&c| (((c - min) as f32 / range) * 255.0).round() as u8)
        .collect()
}

/// Render normalized grid values as a color image at `resolution`.
///
/// Nearest-neighbor upscale: pixel `(px, py)` takes the value of cell
/// `(px / cell_size, py / cell_size)`, clamped to the last column/row so
/// resolutions that are not a cell multiple are still fully covered.
pub fn render_heat_layer(
    normalized: &[u8],
    dims: GridDims,
    resolution: Resolution,
    color_map: ColorMap,
) -> RgbImage {
    let lut = color_map.lut();
    let cols = dims.cols as usize;
    let max_col = dims.cols.saturating_sub(1);
    let max_row = dims.rows.saturating_sub(1);

    let column_of: Vec<usize> = (0..resolution.width)
        .map(|px| (px / dims.cell_size).min(max_col) as usize)
        .collect();

    RgbImage::from_fn(resolution.width, resolution.height, |px, py| {
        let row = (py / dims.cell_size).min(max_row) as usize;
        let idx = row * cols + column_of[px as usize];
        lut[normalized.get(idx).copied().unwrap_or(0) as usize]
    })
}

/// Weighted blend `frame * frame_weight + heat * heat_weight`, rounded and saturated.
pub fn blend(
    frame: &RgbImage,
    heat: &RgbImage,
    frame_weight: f32,
    heat_weight: f32,
) -> MediaResult<RgbImage> {
    if frame.dimensions() != heat.dimensions() {
        return Err(MediaError::frame_size(frame.dimensions(), heat.dimensions()));
    }

    let data: Vec<u8> = frame
        .as_raw()
        .iter()
        .zip(heat.as_raw())
        .map(|(&f, &h)| {
            (f as f32 * frame_weight + h as f32 * heat_weight)
                .round()
                .clamp(0.0, 255.0) as u8
        })
        .collect();

    RgbImage::from_raw(frame.width(), frame.height(), data)
        .ok_or_else(|| MediaError::internal("blend produced a short buffer"))
}

/// Draw a rectangle outline of `thickness` pixels, clipped to the frame.
pub fn draw_box(frame: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 || thickness == 0 {
        return;
    }

    let clip_x = |v: f32| (v.round().max(0.0) as u32).min(width - 1);
    let clip_y = |v: f32| (v.round().max(0.0) as u32).min(height - 1);
    let (x1, x2) = (clip_x(bbox.x1.min(bbox.x2)), clip_x(bbox.x1.max(bbox.x2)));
    let (y1, y2) = (clip_y(bbox.y1.min(bbox.y2)), clip_y(bbox.y1.max(bbox.y2)));

    for t in 0..thickness {
        let top = (y1 + t).min(y2);
        let bottom = y2.saturating_sub(t).max(y1);
        for x in x1..=x2 {
            frame.put_pixel(x, top, color);
            frame.put_pixel(x, bottom, color);
        }
        let left = (x1 + t).min(x2);
        let right = x2.saturating_sub(t).max(x1);
        for y in y1..=y2 {
            frame.put_pixel(left, y, color);
            frame.put_pixel(right, y, color);
        }
    }
}

/// Stable, well-spread color for a track identity.
pub fn identity_color(identity: i64) -> Rgb<u8> {
    // Golden-ratio hue stepping keeps neighbouring ids visually distinct.
    let hue = (identity.unsigned_abs() as f64 * 0.618_033_988_75).fract();
    hsv_to_rgb(hue, 0.85, 0.95)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> Rgb<u8> {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    let (r, g, b) = match sector as i64 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let to_u8 = |c: f64| (c * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_flat_grid() {
        assert_eq!(normalize_min_max(&[0, 0, 0, 0]), vec![0, 0, 0, 0]);
        assert_eq!(normalize_min_max(&[7, 7, 7]), vec![0, 0, 0]);
        assert!(normalize_min_max(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize_min_max(&[0, 1, 2, 4]), vec![0, 64, 128, 255]);
        assert_eq!(normalize_min_max(&[3, 30]), vec![0, 255]);
    }

    #[test]
    fn test_render_upscale() {
        let dims = GridDims::new(Resolution::new(40, 20), 10).unwrap();
        let mut values = vec![0u8; dims.len()];
        values[1] = 255; // cell (1, 0)

        let img = render_heat_layer(&values, dims, Resolution::new(40, 20), ColorMap::Hot);
        assert_eq!(img.dimensions(), (40, 20));
        assert_eq!(*img.get_pixel(10, 0), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(19, 9), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(20, 0), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_covers_remainder_pixels() {
        let dims = GridDims::new(Resolution::new(45, 25), 10).unwrap();
        let mut values = vec![0u8; dims.len()];
        let last = dims.len() - 1;
        values[last] = 255;

        let img = render_heat_layer(&values, dims, Resolution::new(45, 25), ColorMap::Hot);
        assert_eq!(*img.get_pixel(44, 24), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_blend_weights() {
        let frame = RgbImage::from_pixel(2, 2, Rgb([100, 200, 250]));
        let heat = RgbImage::from_pixel(2, 2, Rgb([250, 0, 250]));
        let out = blend(&frame, &heat, 0.7, 0.3).unwrap();
        assert_eq!(*out.get_pixel(1, 1), Rgb([145, 140, 250]));
    }

    #[test]
    fn test_blend_size_mismatch() {
        let frame = RgbImage::new(4, 4);
        let heat = RgbImage::new(2, 2);
        assert!(blend(&frame, &heat, 0.7, 0.3).is_err());
    }

    #[test]
    fn test_draw_box_outline() {
        let mut frame = RgbImage::new(20, 20);
        let red = Rgb([255, 0, 0]);
        draw_box(&mut frame, &BoundingBox::new(2.0, 2.0, 12.0, 12.0), red, 2);

        assert_eq!(*frame.get_pixel(2, 2), red);
        assert_eq!(*frame.get_pixel(7, 3), red);
        assert_eq!(*frame.get_pixel(12, 7), red);
        assert_eq!(*frame.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_box_clipped() {
        let mut frame = RgbImage::new(10, 10);
        draw_box(&mut frame, &BoundingBox::new(-5.0, -5.0, 50.0, 50.0), Rgb([1, 2, 3]), 2);
        assert_eq!(*frame.get_pixel(0, 0), Rgb([1, 2, 3]));
        assert_eq!(*frame.get_pixel(9, 9), Rgb([1, 2, 3]));
    }

    #[test]
    fn test_identity_color_stable() {
        assert_eq!(identity_color(7), identity_color(7));
        assert_ne!(identity_color(1), identity_color(2));
    }
}
