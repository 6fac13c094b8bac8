//! Scalar-to-color lookup for heat layers.

use image::Rgb;
use serde::{Deserialize, Serialize};

/// Color map applied to a normalized `[0, 255]` heat value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMap {
    /// Blue → cyan → yellow → red. Used for the live overlay.
    #[default]
    Jet,
    /// Black → red → yellow → white. Used for standalone heatmaps.
    Hot,
}

impl ColorMap {
    /// Map a normalized value to RGB.
    pub fn map(self, value: u8) -> Rgb<u8> {
        let t = value as f32 / 255.0;
        let (r, g, b) = match self {
            ColorMap::Jet => (
                1.5 - (4.0 * t - 3.0).abs(),
                1.5 - (4.0 * t - 2.0).abs(),
                1.5 - (4.0 * t - 1.0).abs(),
            ),
            ColorMap::Hot => (3.0 * t, 3.0 * t - 1.0, 3.0 * t - 2.0),
        };
        Rgb([channel(r), channel(g), channel(b)])
    }

    /// Full 256-entry lookup table.
    pub fn lut(self) -> [Rgb<u8>; 256] {
        let mut table = [Rgb([0, 0, 0]); 256];
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = self.map(i as u8);
        }
        table
    }
}

fn channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(ColorMap::Jet.map(0), Rgb([0, 0, 128]));
        assert_eq!(ColorMap::Jet.map(255), Rgb([128, 0, 0]));
        // Midpoint is green-dominant.
        let mid = ColorMap::Jet.map(128);
        assert!(mid[1] > mid[0] && mid[1] > mid[2]);
    }

    #[test]
    fn test_hot_endpoints() {
        assert_eq!(ColorMap::Hot.map(0), Rgb([0, 0, 0]));
        assert_eq!(ColorMap::Hot.map(255), Rgb([255, 255, 255]));
        let low = ColorMap::Hot.map(60);
        assert!(low[0] > 0);
        assert_eq!(low[2], 0);
    }

    #[test]
    fn test_lut_matches_map() {
        let lut = ColorMap::Hot.lut();
        assert_eq!(lut[200], ColorMap::Hot.map(200));
    }
}
