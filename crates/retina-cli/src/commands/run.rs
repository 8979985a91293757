//! Run an experiment end to end

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, warn};

use retina_runtime::{ResultWriter, SimulationReport, WriteReport};

use crate::config::{apply_overrides, load_script};
use crate::error::{CliError, CliResult};

/// Run an experiment and write its results
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Experiment description (TOML)
    pub script: PathBuf,

    /// Directory receiving one column file per multimeter
    #[arg(short = 'o', long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Override the number of trials
    #[arg(long)]
    pub trials: Option<usize>,

    /// Random seed for reproducibility
    #[arg(long)]
    pub seed: Option<u64>,

    /// Sample per-step timings
    #[arg(long)]
    pub perf: bool,

    /// Write the JSON summary here instead of stdout
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// No progress bar and no summary on stdout
    #[arg(short, long)]
    pub quiet: bool,
}

impl RunCommand {
    pub fn execute(self) -> CliResult<()> {
        let mut script = load_script(&self.script)?;
        apply_overrides(&mut script, self.trials, self.seed, self.perf)?;

        let mut sim = script.build()?;
        let trials = sim.params().num_trials;
        info!(
            "Running {} trial(s) of {}ms from {}",
            trials,
            sim.params().duration_ms,
            self.script.display()
        );

        let progress = if self.quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(trials as u64);
            bar.set_style(
                ProgressStyle::with_template("{spinner} trial {pos}/{len} [{elapsed_precise}] {bar:30}")
                    .map_err(|e| CliError::Other(anyhow::anyhow!(e)))?,
            );
            bar
        };
        for _ in 0..trials {
            sim.run_trial()?;
            progress.inc(1);
        }
        progress.finish_and_clear();

        let report = sim.report();
        info!(
            "Simulation completed: {} trial(s), {} steps each",
            report.trials, report.steps_per_trial
        );

        let writer = ResultWriter::new(&self.results_dir);
        let written = sim.write_results(&writer, script.default_multimeter.as_deref());
        if !written.is_complete() {
            warn!(
                "{} result file(s) could not be written",
                written.failures.len()
            );
        }

        let graph = sim.graph();
        let json = serde_json::json!({
            "script": self.script.display().to_string(),
            "trials": report.trials,
            "steps_per_trial": report.steps_per_trial,
            "dt_ms": sim.params().dt_ms,
            "duration_ms": sim.params().duration_ms,
            "seed": sim.params().effective_seed(),
            "evaluation_order": graph.evaluation_order(),
            "feedback_edges": graph.feedback_edges(),
            "output": output_summary(&report),
            "results": results_summary(&self.results_dir, &written),
            "perf": report.perf.as_ref().map(|p| serde_json::json!({
                "avg_step_ns": p.avg_step_ns,
                "max_step_ns": p.max_step_ns,
                "steps": p.steps,
            })),
        });
        let text = serde_json::to_string_pretty(&json)?;

        match &self.summary {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, text)?;
                info!("Wrote summary to {}", path.display());
            }
            None if !self.quiet => println!("{}", text),
            None => {}
        }
        Ok(())
    }
}

fn output_summary(report: &SimulationReport) -> serde_json::Value {
    let cells = report.final_output.len();
    let mean = if cells == 0 {
        0.0
    } else {
        report.final_output.iter().sum::<f64>() / cells as f64
    };
    let max = report
        .final_output
        .iter()
        .copied()
        .reduce(f64::max);
    serde_json::json!({
        "cells": cells,
        "mean_rate": mean,
        "max_rate": max,
    })
}

fn results_summary(dir: &std::path::Path, written: &WriteReport) -> serde_json::Value {
    let failures: Vec<_> = written
        .failures
        .iter()
        .map(|(path, reason)| {
            serde_json::json!({
                "path": path.display().to_string(),
                "reason": reason,
            })
        })
        .collect();
    serde_json::json!({
        "dir": dir.display().to_string(),
        "written": written.written.len(),
        "failures": failures,
    })
}
