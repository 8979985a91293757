//! Multimeters: read-only recorders of module outputs

use crate::{error::*, grid::Grid};

/// What a multimeter samples
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "mode", rename_all = "snake_case")
)]
pub enum MultimeterMode {
    /// One pixel, appended every step
    Temporal {
        /// Column
        x: usize,
        /// Row
        y: usize,
    },
    /// Every pixel, appended every step
    TemporalAll,
    /// One row, captured once
    SpatialRow {
        /// Row index
        row: usize,
        /// Capture time (ms)
        time_ms: f64,
    },
    /// One column, captured once
    SpatialColumn {
        /// Column index
        column: usize,
        /// Capture time (ms)
        time_ms: f64,
    },
}

impl MultimeterMode {
    /// True for modes sampled every step
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Temporal { .. } | Self::TemporalAll)
    }

    /// Check coordinates against a grid of `columns` x `rows`
    pub fn validate(&self, columns: usize, rows: usize) -> Result<()> {
        let out_of_range = match *self {
            Self::Temporal { x, y } => x >= columns || y >= rows,
            Self::TemporalAll => false,
            Self::SpatialRow { row, time_ms } => row >= rows || !(time_ms >= 0.0),
            Self::SpatialColumn { column, time_ms } => column >= columns || !(time_ms >= 0.0),
        };
        if out_of_range {
            return Err(RuntimeError::invalid_config(format!(
                "multimeter coordinates {:?} outside a {}x{} grid",
                self, columns, rows
            )));
        }
        Ok(())
    }
}

/// Samples collected during one trial
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// One value per step
    Trace(Vec<f64>),
    /// One trace per pixel, row-major
    Population(Vec<Vec<f64>>),
    /// A row or column; empty until captured
    Snapshot(Vec<f64>),
}

impl Record {
    fn empty(mode: &MultimeterMode, pixels: usize) -> Self {
        match mode {
            MultimeterMode::Temporal { .. } => Record::Trace(Vec::new()),
            MultimeterMode::TemporalAll => Record::Population(vec![Vec::new(); pixels]),
            MultimeterMode::SpatialRow { .. } | MultimeterMode::SpatialColumn { .. } => {
                Record::Snapshot(Vec::new())
            }
        }
    }

    /// Number of samples (per pixel for populations)
    pub fn len(&self) -> usize {
        match self {
            Record::Trace(v) | Record::Snapshot(v) => v.len(),
            Record::Population(p) => p.first().map_or(0, Vec::len),
        }
    }

    /// True when nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Recording binding on a module or input channel
#[derive(Debug, Clone)]
pub struct Multimeter {
    label: String,
    target: String,
    mode: MultimeterMode,
    start_time_ms: f64,
    records: Vec<Record>,
}

impl Multimeter {
    /// Create a multimeter on `target`
    pub fn new(label: impl Into<String>, target: impl Into<String>, mode: MultimeterMode) -> Self {
        Self {
            label: label.into(),
            target: target.into(),
            mode,
            start_time_ms: 0.0,
            records: Vec::new(),
        }
    }

    /// Ignore temporal samples before `start_time_ms`
    pub fn with_start_time(mut self, start_time_ms: f64) -> Self {
        self.start_time_ms = start_time_ms;
        self
    }

    /// Label, also the result file name
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Name of the sampled module or channel
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Sampling mode
    pub fn mode(&self) -> &MultimeterMode {
        &self.mode
    }

    /// Start time of temporal recording (ms)
    pub fn start_time_ms(&self) -> f64 {
        self.start_time_ms
    }

    /// One record per trial started
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Record of trial `trial`
    pub fn record(&self, trial: usize) -> Option<&Record> {
        self.records.get(trial)
    }

    /// Trace of trial `trial` (temporal single-pixel mode)
    pub fn trace(&self, trial: usize) -> Option<&[f64]> {
        match self.records.get(trial)? {
            Record::Trace(v) => Some(v),
            _ => None,
        }
    }

    /// Sample-wise mean of the single-pixel traces over every trial
    pub fn trial_average(&self) -> Option<Vec<f64>> {
        let traces: Vec<&Vec<f64>> = self
            .records
            .iter()
            .filter_map(|r| match r {
                Record::Trace(v) => Some(v),
                _ => None,
            })
            .collect();
        let len = traces.iter().map(|t| t.len()).min()?;
        let n = traces.len() as f64;
        Some(
            (0..len)
                .map(|i| traces.iter().map(|t| t[i]).sum::<f64>() / n)
                .collect(),
        )
    }

    /// Open an empty record for a new trial
    pub fn begin_trial(&mut self, pixels: usize) {
        self.records.push(Record::empty(&self.mode, pixels));
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Sample `grid` after step `step` completed at `time_ms`
    pub fn observe(&mut self, step: usize, time_ms: f64, dt_ms: f64, grid: &Grid) {
        let Some(record) = self.records.last_mut() else {
            return;
        };
        let recording = time_ms + dt_ms * 1e-6 >= self.start_time_ms;

        match (&self.mode, record) {
            (MultimeterMode::Temporal { x, y }, Record::Trace(trace)) => {
                if recording {
                    if let Some(v) = grid.get(*x, *y) {
                        trace.push(v);
                    }
                }
            }
            (MultimeterMode::TemporalAll, Record::Population(traces)) => {
                if recording {
                    for (trace, v) in traces.iter_mut().zip(grid.as_slice()) {
                        trace.push(*v);
                    }
                }
            }
            (MultimeterMode::SpatialRow { row, time_ms: at }, Record::Snapshot(snap)) => {
                if snap.is_empty() && step == capture_step(*at, dt_ms) {
                    *snap = grid.row(*row).unwrap_or_default();
                }
            }
            (MultimeterMode::SpatialColumn { column, time_ms: at }, Record::Snapshot(snap)) => {
                if snap.is_empty() && step == capture_step(*at, dt_ms) {
                    *snap = grid.column(*column).unwrap_or_default();
                }
            }
            _ => {}
        }
    }
}

fn capture_step(time_ms: f64, dt_ms: f64) -> usize {
    (time_ms / dt_ms).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(offset: f64) -> Grid {
        Grid::from_vec(3, 2, (0..6).map(|i| i as f64 + offset).collect()).unwrap()
    }

    #[test]
    fn test_temporal_respects_start_time() {
        let mut m = Multimeter::new("bip", "bipolar", MultimeterMode::Temporal { x: 1, y: 1 })
            .with_start_time(2.0);
        m.begin_trial(6);
        for step in 0..5 {
            m.observe(step, step as f64, 1.0, &ramp(step as f64 * 10.0));
        }
        assert_eq!(m.trace(0), Some(&[24.0, 34.0, 44.0][..]));
    }

    #[test]
    fn test_population_records_every_pixel() {
        let mut m = Multimeter::new("pop", "gc", MultimeterMode::TemporalAll);
        m.begin_trial(6);
        m.observe(0, 0.0, 1.0, &ramp(0.0));
        m.observe(1, 1.0, 1.0, &ramp(1.0));
        match m.record(0) {
            Some(Record::Population(traces)) => {
                assert_eq!(traces.len(), 6);
                assert_eq!(traces[5], vec![5.0, 6.0]);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_spatial_captures_once() {
        let mut row = Multimeter::new("row", "gc", MultimeterMode::SpatialRow { row: 1, time_ms: 2.0 });
        let mut col = Multimeter::new("col", "gc", MultimeterMode::SpatialColumn { column: 2, time_ms: 0.5 });
        row.begin_trial(6);
        col.begin_trial(6);
        for step in 0..4 {
            let t = step as f64 * 0.5;
            row.observe(step, t, 0.5, &ramp(step as f64));
            col.observe(step, t, 0.5, &ramp(step as f64));
        }
        assert_eq!(row.record(0), Some(&Record::Snapshot(Vec::new())));
        assert_eq!(col.record(0), Some(&Record::Snapshot(vec![3.0, 6.0])));
    }

    #[test]
    fn test_spatial_capture_at_scaled_step() {
        let mut row = Multimeter::new("row", "gc", MultimeterMode::SpatialRow { row: 0, time_ms: 2.0 });
        row.begin_trial(6);
        for step in 0..8 {
            row.observe(step, step as f64 * 0.5, 0.5, &ramp(step as f64));
        }
        assert_eq!(row.record(0), Some(&Record::Snapshot(vec![4.0, 5.0, 6.0])));
    }

    #[test]
    fn test_trial_average() {
        let mut m = Multimeter::new("avg", "gc", MultimeterMode::Temporal { x: 0, y: 0 });
        for trial in 0..2 {
            m.begin_trial(6);
            m.observe(0, 0.0, 1.0, &ramp(trial as f64 * 2.0));
            m.observe(1, 1.0, 1.0, &ramp(trial as f64 * 2.0 + 1.0));
        }
        assert_eq!(m.records().len(), 2);
        assert_eq!(m.trial_average(), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_mode_validation() {
        assert!(MultimeterMode::Temporal { x: 3, y: 0 }.validate(3, 2).is_err());
        assert!(MultimeterMode::SpatialColumn { column: 2, time_ms: 1.0 }.validate(3, 2).is_ok());
        assert!(MultimeterMode::SpatialRow { row: 0, time_ms: -1.0 }.validate(3, 2).is_err());
    }
}
