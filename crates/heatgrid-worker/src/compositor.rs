//! Live heat overlay.

use heatgrid_media::{blend, normalize_min_max, render_heat_layer, ColorMap};
use heatgrid_models::encoding::{OVERLAY_HEAT_WEIGHT, OVERLAY_SOURCE_WEIGHT};
use heatgrid_models::Resolution;
use image::RgbImage;

use crate::aggregator::CountGrid;
use crate::error::WorkerResult;

/// Blends the current global accumulator onto each frame.
///
/// The heat layer only changes when the accumulator does, so it is cached
/// against the accumulator total.
pub struct OverlayCompositor {
    resolution: Resolution,
    color_map: ColorMap,
    cached: Option<(u64, RgbImage)>,
}

impl OverlayCompositor {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            color_map: ColorMap::Jet,
            cached: None,
        }
    }

    /// Heat layer for the accumulator's current state.
    pub fn heat_layer(&mut self, global: &CountGrid) -> &RgbImage {
        let version = global.total();
        if self.cached.as_ref().is_some_and(|(v, _)| *v != version) {
            self.cached = None;
        }
        let (resolution, color_map) = (self.resolution, self.color_map);
        let (_, layer) = self.cached.get_or_insert_with(|| {
            let normalized = normalize_min_max(global.counts());
            (
                version,
                render_heat_layer(&normalized, global.dims(), resolution, color_map),
            )
        });
        layer
    }

    /// `0.7 * frame + 0.3 * heat` for one frame.
    pub fn compose(&mut self, frame: &RgbImage, global: &CountGrid) -> WorkerResult<RgbImage> {
        let heat = self.heat_layer(global);
        Ok(blend(frame, heat, OVERLAY_SOURCE_WEIGHT, OVERLAY_HEAT_WEIGHT)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatgrid_models::{GridCell, GridDims};
    use image::Rgb;

    fn grid() -> CountGrid {
        CountGrid::new(GridDims::new(Resolution::new(40, 20), 10).unwrap())
    }

    #[test]
    fn test_zero_accumulator_is_flat() {
        let mut compositor = OverlayCompositor::new(Resolution::new(40, 20));
        let frame = RgbImage::from_pixel(40, 20, Rgb([100, 100, 100]));
        let out = compositor.compose(&frame, &grid()).unwrap();

        let first = *out.get_pixel(0, 0);
        assert!(out.pixels().all(|p| *p == first));
        assert_eq!(out.dimensions(), (40, 20));
    }

    #[test]
    fn test_heat_layer_tracks_accumulator() {
        let mut compositor = OverlayCompositor::new(Resolution::new(40, 20));
        let mut global = grid();
        let cold = *compositor.heat_layer(&global).get_pixel(0, 0);

        global.increment(GridCell::new(0, 0));
        let layer = compositor.heat_layer(&global);
        assert_ne!(*layer.get_pixel(0, 0), cold);
        assert_eq!(*layer.get_pixel(39, 19), cold);
    }
}
