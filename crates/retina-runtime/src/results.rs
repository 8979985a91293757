//! Plain-text result files written from multimeter records
//!
//! Every file is a single column of floating-point values, one per line.

use crate::{
    error::*,
    multimeter::{Multimeter, MultimeterMode, Record},
};
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Name of the file holding the trial-averaged default trace
pub const AGGREGATE_FILE: &str = "output";

/// Outcome of a [`ResultWriter::write_all`] call
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    /// Files written successfully
    pub written: Vec<PathBuf>,
    /// Files that could not be written, with the reason
    pub failures: Vec<(PathBuf, String)>,
}

impl WriteReport {
    /// True when every file was written
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, path: PathBuf, outcome: io::Result<()>) {
        match outcome {
            Ok(()) => self.written.push(path),
            Err(e) => {
                log::warn!("Failed to write {}: {}", path.display(), e);
                self.failures.push((path, e.to_string()));
            }
        }
    }
}

/// Writes multimeter records under a results directory
#[derive(Debug, Clone)]
pub struct ResultWriter {
    dir: PathBuf,
}

impl ResultWriter {
    /// Write into `dir`, created on demand
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Results directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every record of every multimeter, plus the aggregate file for
    /// the multimeter labelled `default_label`.
    ///
    /// Failures are collected and logged; they never abort the remaining writes.
    pub fn write_all(&self, multimeters: &[Multimeter], default_label: Option<&str>) -> WriteReport {
        let mut report = WriteReport::default();

        if let Err(e) = fs::create_dir_all(&self.dir) {
            report.record(self.dir.clone(), Err(e));
            return report;
        }

        for meter in multimeters {
            for (trial, record) in meter.records().iter().enumerate() {
                let stem = trial_stem(meter.label(), trial);
                match record {
                    Record::Trace(values) | Record::Snapshot(values) => {
                        let path = self.dir.join(&stem);
                        let outcome = write_column(&path, values);
                        report.record(path, outcome);
                    }
                    Record::Population(traces) => {
                        for (pixel, values) in traces.iter().enumerate() {
                            let path = self.dir.join(population_file(&stem, pixel));
                            let outcome = write_column(&path, values);
                            report.record(path, outcome);
                        }
                    }
                }
            }
        }

        if let Some(label) = default_label {
            let path = self.dir.join(AGGREGATE_FILE);
            let outcome = multimeters
                .iter()
                .find(|m| m.label() == label)
                .and_then(Multimeter::trial_average)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no temporal multimeter labelled '{}'", label),
                    )
                })
                .and_then(|avg| write_column(&path, &avg));
            report.record(path, outcome);
        }

        log::info!(
            "Wrote {} result file(s) to {} ({} failed)",
            report.written.len(),
            self.dir.display(),
            report.failures.len()
        );
        report
    }
}

/// First trial keeps the bare label; later trials are suffixed
fn trial_stem(label: &str, trial: usize) -> String {
    if trial == 0 {
        label.to_string()
    } else {
        format!("{}_trial{}", label, trial)
    }
}

fn population_file(stem: &str, pixel: usize) -> String {
    format!("{}{}", stem, pixel)
}

/// File names [`ResultWriter::write_all`] derives for a multimeter run over
/// `trials` trials on a grid of `pixels` pixels
pub fn file_names(label: &str, mode: &MultimeterMode, trials: usize, pixels: usize) -> Vec<String> {
    let mut names = Vec::new();
    for trial in 0..trials {
        let stem = trial_stem(label, trial);
        match mode {
            MultimeterMode::TemporalAll => {
                names.extend((0..pixels).map(|pixel| population_file(&stem, pixel)))
            }
            _ => names.push(stem),
        }
    }
    names
}

/// Reject labels that cannot name a plain file inside the results directory
pub fn check_label(label: &str) -> Result<()> {
    let reason = if label.is_empty() {
        "is empty"
    } else if label.contains(['/', '\\']) || label == "." || label == ".." {
        "must not contain a path"
    } else if label == AGGREGATE_FILE {
        "is reserved for the trial-averaged default trace"
    } else {
        return Ok(());
    };
    Err(RuntimeError::invalid_config(format!(
        "multimeter label '{}' {}",
        label, reason
    )))
}

/// Write `values` one per line
pub fn write_column(path: &Path, values: &[f64]) -> io::Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for v in values {
        writeln!(out, "{}", v)?;
    }
    out.flush()
}

/// Read a column file written by [`write_column`]
pub fn read_column(path: impl AsRef<Path>) -> Result<Vec<f64>> {
    let reader = BufReader::new(fs::File::open(path.as_ref())?);
    let mut values = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v = line.parse::<f64>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}:{}: {}", path.as_ref().display(), n + 1, e),
            )
        })?;
        values.push(v);
    }
    Ok(values)
}
