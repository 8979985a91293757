//! Retina runtime engine
//!
//! This crate provides the computational-graph engine of a biophysically
//! inspired retina model: per-pixel modules (temporal filters, static
//! nonlinearities, spatial Gaussian filters, conductance-based compartments,
//! short-term plasticity) wired by signed Current/Conductance connections and
//! evaluated once per time step over a 2D grid, with deterministic feedback
//! handling, seeded visual inputs and multimeter recording.

#![deny(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod error;
pub mod graph;
pub mod grid;
pub mod input;
pub mod modules;
pub mod multimeter;
pub mod output;
pub mod results;
pub mod simulation;

#[cfg(feature = "serde")]
pub mod config;

// Re-export essential types
pub use error::{Result, RuntimeError};
pub use graph::{Connection, FeedbackPolicy, Graph, GraphBuilder, PortKind, Sign};
pub use grid::{Grid, GridShape};
pub use input::{ChannelSet, InputChannel, InputFrame, InputProvider, InputSource};
pub use modules::{Module, ModuleKind, ModuleParams, ParamValue, PortInputs, PortSpec, MODULE_TYPES};
pub use multimeter::{Multimeter, MultimeterMode, Record};
pub use output::OutputPort;
pub use results::{read_column, ResultWriter, WriteReport};
pub use simulation::{
    run_fixed_step, EngineState, PerfReport, RetinaSimulation, SimulationParams, SimulationReport,
};

#[cfg(feature = "serde")]
pub use config::RetinaScript;

/// Default simulation time step (ms)
pub const DEFAULT_TIMESTEP_MS: f64 = 1.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_integration() {
        // Test that all components can be imported and basic objects created
        let sim_params = SimulationParams::default();
        assert!(sim_params.validate().is_ok());
        assert_eq!(sim_params.dt_ms, DEFAULT_TIMESTEP_MS);

        let shape = sim_params.shape().unwrap();
        let graph = GraphBuilder::new(shape)
            .create("GaussFilter", "hc", ModuleParams::new().with("sigma", 0.5))
            .connect(Connection::new("hc", PortKind::Current).plus("rods"))
            .build()
            .unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(MODULE_TYPES.len(), 8);
    }
}
