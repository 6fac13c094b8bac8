//! Global and windowed count accumulation.
//!
//! Sampling is sparse: only trigger frames (`frame_no % window_length == 0`
//! with at least one detection) touch either accumulator. Frames in between
//! still advance the window clock, so a window is sealed as soon as a frame
//! with a higher window index is observed.

use heatgrid_models::{GridCell, GridDims};
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Row-major grid of counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountGrid {
    dims: GridDims,
    counts: Vec<u32>,
    total: u64,
}

impl CountGrid {
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            counts: vec![0; dims.len()],
            total: 0,
        }
    }

    /// Increment a cell and return its new value. The cell must be in range.
    pub fn increment(&mut self, cell: GridCell) -> u32 {
        let idx = self.dims.index(cell);
        let slot = &mut self.counts[idx];
        *slot = slot.saturating_add(1);
        self.total += 1;
        *slot
    }

    pub fn get(&self, cell: GridCell) -> u32 {
        if !self.dims.contains(cell) {
            return 0;
        }
        self.counts[self.dims.index(cell)]
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Sum of all increments so far. Strictly grows with every increment.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_zero(&self) -> bool {
        self.total == 0
    }

    /// Non-zero cells in row-major order.
    pub fn nonzero(&self) -> impl Iterator<Item = (GridCell, u32)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(|(i, &c)| (self.dims.cell_at(i), c))
    }
}

/// Counts of one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowAccumulator {
    index: u64,
    start_frame: u64,
    grid: CountGrid,
}

impl WindowAccumulator {
    fn new(index: u64, start_frame: u64, dims: GridDims) -> Self {
        Self {
            index,
            start_frame,
            grid: CountGrid::new(dims),
        }
    }

    /// `floor(frame_no / window_length)` of the frames it covers.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Frame number of the event that opened the window.
    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn grid(&self) -> &CountGrid {
        &self.grid
    }
}

/// One trigger increment: the cell and the window value right after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSample {
    pub window_start_frame: u64,
    pub cell: GridCell,
    pub window_count: u32,
}

/// Owns the global accumulator and the window sequence.
#[derive(Debug)]
pub struct TemporalWindowAggregator {
    window_length: u64,
    global: CountGrid,
    open: Option<WindowAccumulator>,
    archived: Vec<WindowAccumulator>,
    last_frame: Option<u64>,
}

impl TemporalWindowAggregator {
    pub fn new(dims: GridDims, window_length: u64) -> WorkerResult<Self> {
        if window_length == 0 {
            return Err(WorkerError::config_error("window length must be positive"));
        }
        Ok(Self {
            window_length,
            global: CountGrid::new(dims),
            open: None,
            archived: Vec::new(),
            last_frame: None,
        })
    }

    pub fn window_length(&self) -> u64 {
        self.window_length
    }

    pub fn window_index(&self, frame_no: u64) -> u64 {
        frame_no / self.window_length
    }

    pub fn is_trigger_frame(&self, frame_no: u64) -> bool {
        frame_no % self.window_length == 0
    }

    /// Observe one frame and its mapped detection cells.
    ///
    /// Seals the open window if `frame_no` belongs to a later one, then, on
    /// a trigger frame, increments the window and global grids once per
    /// cell. Returns the samples produced (empty on non-trigger frames).
    pub fn observe(&mut self, frame_no: u64, cells: &[GridCell]) -> WorkerResult<Vec<TriggerSample>> {
        if let Some(previous) = self.last_frame {
            if frame_no <= previous {
                return Err(WorkerError::FrameOrder {
                    previous,
                    current: frame_no,
                });
            }
        }
        self.last_frame = Some(frame_no);

        let index = self.window_index(frame_no);
        if self.open.as_ref().is_some_and(|w| index > w.index) {
            self.seal_open();
        }

        if cells.is_empty() || !self.is_trigger_frame(frame_no) {
            return Ok(Vec::new());
        }

        let dims = self.global.dims();
        let window = self
            .open
            .get_or_insert_with(|| WindowAccumulator::new(index, frame_no, dims));

        let mut samples = Vec::with_capacity(cells.len());
        for &cell in cells {
            let window_count = window.grid.increment(cell);
            self.global.increment(cell);
            samples.push(TriggerSample {
                window_start_frame: window.start_frame,
                cell,
                window_count,
            });
        }
        Ok(samples)
    }

    /// Live global accumulator.
    pub fn global(&self) -> &CountGrid {
        &self.global
    }

    /// Windows sealed so far, ascending by index.
    pub fn archived(&self) -> &[WindowAccumulator] {
        &self.archived
    }

    /// Seal the open window and hand over the final state.
    pub fn finish(mut self) -> (CountGrid, Vec<WindowAccumulator>) {
        self.seal_open();
        (self.global, self.archived)
    }

    fn seal_open(&mut self) {
        if let Some(window) = self.open.take() {
            debug!(
                index = window.index,
                start_frame = window.start_frame,
                total = window.grid.total(),
                "Sealed window"
            );
            self.archived.push(window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatgrid_models::Resolution;

    fn aggregator(window_length: u64) -> TemporalWindowAggregator {
        let dims = GridDims::new(Resolution::new(1280, 720), 20).unwrap();
        TemporalWindowAggregator::new(dims, window_length).unwrap()
    }

    #[test]
    fn test_non_trigger_frames_ignored() {
        let mut agg = aggregator(10);
        let cell = GridCell::new(5, 5);
        for frame_no in 1..10 {
            assert!(agg.observe(frame_no, &[cell]).unwrap().is_empty());
        }
        assert!(agg.global().is_zero());

        let samples = agg.observe(10, &[cell, cell]).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].window_count, 1);
        assert_eq!(samples[1].window_count, 2);
        assert_eq!(samples[1].window_start_frame, 10);
        assert_eq!(agg.global().get(cell), 2);
    }

    #[test]
    fn test_window_sealed_on_next_index() {
        let mut agg = aggregator(10);
        let cell = GridCell::new(1, 1);
        agg.observe(10, &[cell]).unwrap();
        agg.observe(15, &[]).unwrap();
        assert!(agg.archived().is_empty());

        agg.observe(20, &[]).unwrap();
        assert_eq!(agg.archived().len(), 1);
        assert_eq!(agg.archived()[0].start_frame(), 10);
        assert_eq!(agg.archived()[0].index(), 1);
    }

    #[test]
    fn test_frames_must_increase() {
        let mut agg = aggregator(10);
        agg.observe(3, &[]).unwrap();
        assert!(matches!(
            agg.observe(3, &[]),
            Err(WorkerError::FrameOrder { previous: 3, current: 3 })
        ));
        assert!(agg.observe(2, &[]).is_err());
    }

    #[test]
    fn test_finish_seals_open_window() {
        let mut agg = aggregator(10);
        agg.observe(10, &[GridCell::new(0, 0)]).unwrap();
        agg.observe(20, &[GridCell::new(0, 0)]).unwrap();
        let (global, windows) = agg.finish();

        assert_eq!(windows.len(), 2);
        assert!(windows[0].index() < windows[1].index());
        assert_eq!(global.get(GridCell::new(0, 0)), 2);
        assert_eq!(global.nonzero().count(), 1);
    }

    #[test]
    fn test_empty_trigger_creates_no_window() {
        let mut agg = aggregator(5);
        for frame_no in 1..=20 {
            agg.observe(frame_no, &[]).unwrap();
        }
        let (global, windows) = agg.finish();
        assert!(windows.is_empty());
        assert!(global.is_zero());
    }

    #[test]
    fn test_zero_window_length_rejected() {
        let dims = GridDims::new(Resolution::new(100, 100), 10).unwrap();
        assert!(TemporalWindowAggregator::new(dims, 0).is_err());
    }
}
