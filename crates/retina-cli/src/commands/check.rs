//! Build an experiment without simulating it

use clap::Args;
use std::path::PathBuf;
use tracing::info;

use retina_runtime::Module;

use crate::config::load_script;
use crate::error::CliResult;

/// Build an experiment and report its evaluation order
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// Experiment description (TOML)
    pub script: PathBuf,
}

impl CheckCommand {
    pub fn execute(self) -> CliResult<()> {
        let script = load_script(&self.script)?;
        let sim = script.build()?;
        let graph = sim.graph();
        info!("Built {} module(s) from {}", graph.len(), self.script.display());

        println!("Modules:");
        for name in graph.module_names() {
            if let Some(module) = graph.module(name) {
                println!("- {} ({})", name, module.type_tag());
            }
        }
        println!("Evaluation order: {}", graph.evaluation_order().join(" -> "));
        let feedback = graph.feedback_edges();
        if feedback.is_empty() {
            println!("Feedback edges: none");
        } else {
            println!("Feedback edges:");
            for (src, dst) in feedback {
                println!("- {} -> {}", src, dst);
            }
        }
        println!(
            "Steps per trial: {} x {} trial(s)",
            sim.params().num_steps(),
            sim.params().num_trials
        );
        Ok(())
    }
}
