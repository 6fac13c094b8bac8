//! Post-run heatmap renderers.

use heatgrid_media::{normalize_min_max, render_heat_layer, ColorMap, FrameWriter};
use heatgrid_models::Resolution;
use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::aggregator::{CountGrid, WindowAccumulator};
use crate::error::WorkerResult;

fn render_grid(grid: &CountGrid, resolution: Resolution, color_map: ColorMap) -> RgbImage {
    let normalized = normalize_min_max(grid.counts());
    render_heat_layer(&normalized, grid.dims(), resolution, color_map)
}

/// Renders each sealed window as `window_length` identical frames.
#[derive(Debug, Clone, Copy)]
pub struct WindowedHeatmapRenderer {
    resolution: Resolution,
    window_length: u64,
    color_map: ColorMap,
}

impl WindowedHeatmapRenderer {
    pub fn new(resolution: Resolution, window_length: u64) -> Self {
        Self {
            resolution,
            window_length,
            color_map: ColorMap::Hot,
        }
    }

    /// Each window is normalized on its own. Returns frames written, always
    /// `window_length * windows.len()`.
    pub fn render<W: FrameWriter + ?Sized>(
        &self,
        windows: &[WindowAccumulator],
        writer: &mut W,
    ) -> WorkerResult<u64> {
        let mut written = 0;
        for window in windows {
            let frame = render_grid(window.grid(), self.resolution, self.color_map);
            for _ in 0..self.window_length {
                writer.write_frame(&frame)?;
                written += 1;
            }
        }
        debug!(windows = windows.len(), frames = written, "Rendered windowed heatmap");
        Ok(written)
    }
}

/// Renders the final global accumulator as a still image.
#[derive(Debug, Clone, Copy)]
pub struct GlobalHeatmapRenderer {
    resolution: Resolution,
    color_map: ColorMap,
}

impl GlobalHeatmapRenderer {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            color_map: ColorMap::Hot,
        }
    }

    pub fn render(&self, global: &CountGrid) -> RgbImage {
        render_grid(global, self.resolution, self.color_map)
    }

    /// Write the PNG through a temp file so readers never see a partial image.
    pub fn write_png(&self, global: &CountGrid, path: impl AsRef<Path>) -> WorkerResult<PathBuf> {
        let path = path.as_ref();
        let tmp = path.with_extension("png.part");
        self.render(global).save_with_format(&tmp, ImageFormat::Png)?;
        fs::rename(&tmp, path)?;
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::TemporalWindowAggregator;
    use heatgrid_media::MediaResult;
    use heatgrid_models::{GridCell, GridDims};
    use image::Rgb;

    #[derive(Default)]
    struct CollectingWriter {
        frames: Vec<RgbImage>,
    }

    impl FrameWriter for CollectingWriter {
        fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
            self.frames.push(frame.clone());
            Ok(())
        }

        fn frames_written(&self) -> u64 {
            self.frames.len() as u64
        }
    }

    fn dims() -> GridDims {
        GridDims::new(Resolution::new(40, 20), 10).unwrap()
    }

    #[test]
    fn test_windowed_frame_count() {
        let mut agg = TemporalWindowAggregator::new(dims(), 5).unwrap();
        for frame_no in 1..=17 {
            let cells = if frame_no % 5 == 0 {
                vec![GridCell::new(1, 1)]
            } else {
                vec![]
            };
            agg.observe(frame_no, &cells).unwrap();
        }
        let (_, windows) = agg.finish();
        assert_eq!(windows.len(), 3);

        let mut writer = CollectingWriter::default();
        let written = WindowedHeatmapRenderer::new(Resolution::new(40, 20), 5)
            .render(&windows, &mut writer)
            .unwrap();
        assert_eq!(written, 15);
        assert_eq!(writer.frames_written(), 15);
        assert_eq!(*writer.frames[0].get_pixel(15, 15), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_no_windows_no_frames() {
        let mut writer = CollectingWriter::default();
        let written = WindowedHeatmapRenderer::new(Resolution::new(40, 20), 10)
            .render(&[], &mut writer)
            .unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn test_global_png() {
        let dir = tempfile::tempdir().unwrap();
        let mut global = CountGrid::new(dims());
        global.increment(GridCell::new(3, 0));

        let path = GlobalHeatmapRenderer::new(Resolution::new(40, 20))
            .write_png(&global, dir.path().join("global_heatmap_1.png"))
            .unwrap();
        assert!(!dir.path().join("global_heatmap_1.png.part").exists());

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (40, 20));
        assert_eq!(*img.get_pixel(35, 5), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_all_zero_global_is_black() {
        let img = GlobalHeatmapRenderer::new(Resolution::new(40, 20)).render(&CountGrid::new(dims()));
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
