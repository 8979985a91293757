//! retina CLI crate
//!
//! Commands (see [commands]):
//! - run: load a TOML experiment, simulate every trial, write multimeter
//!   results and the aggregate `output` file, print or save a JSON summary.
//! - check: build the retina without simulating and print the evaluation
//!   order and the edges resolved as feedback.
//!
//! The binary (src/main.rs) wires up logging and argument parsing, calling
//! [`RetinaCli::execute`]. The library surface exists for integration tests.

pub mod commands;
pub mod config;
pub mod error;

pub use commands::RetinaCli;
