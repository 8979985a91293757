//! Error types for the retina runtime

use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while building or running a retina
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Invalid retina configuration
    #[error("Invalid retina configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// Module type tag not present in the module library
    #[error("Unknown module type '{type_tag}'")]
    UnknownModuleType {
        /// Type tag that could not be resolved
        type_tag: String,
    },

    /// Reference to a module that was never created
    #[error("Module '{name}' not found")]
    ModuleNotFound {
        /// Name that was not found
        name: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Connection into a port the target does not declare
    #[error("Port mismatch on '{module}': {reason}")]
    PortMismatch {
        /// Target module
        module: String,
        /// Reason for the mismatch
        reason: String,
    },

    /// Graph topology error
    #[error("Network topology error: {reason}")]
    NetworkTopology {
        /// Reason for topology error
        reason: String,
    },

    /// Grid shape disagreement
    #[error("Dimension mismatch: expected {expected_columns}x{expected_rows}, found {found_columns}x{found_rows}")]
    DimensionMismatch {
        /// Expected number of columns
        expected_columns: usize,
        /// Expected number of rows
        expected_rows: usize,
        /// Found number of columns
        found_columns: usize,
        /// Found number of rows
        found_rows: usize,
    },

    /// Non-finite value produced by a module update
    #[error("Numerical error in '{module}' at {time_ms}ms: pixel {pixel} is {value}")]
    NumericalError {
        /// Module that produced the value
        module: String,
        /// Simulation time of the step (ms)
        time_ms: f64,
        /// Flat pixel index
        pixel: usize,
        /// Offending value
        value: f64,
    },

    /// External input could not be provided
    #[error("Missing input at {time_ms}ms: {reason}")]
    MissingInput {
        /// Simulation time (ms)
        time_ms: f64,
        /// Reason for the missing input
        reason: String,
    },

    /// Simulation step failed
    #[error("Simulation step failed at {time_ms}ms: {reason}")]
    SimulationStep {
        /// Time when step failed
        time_ms: f64,
        /// Reason for failure
        reason: String,
    },

    /// I/O error while persisting or reading results
    #[error("I/O error: {source}")]
    Io {
        #[from]
        /// Source I/O error
        source: std::io::Error,
    },
}

impl RuntimeError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a module-not-found error
    pub fn module_not_found(name: impl Into<String>) -> Self {
        Self::ModuleNotFound { name: name.into() }
    }

    /// Create a port mismatch error
    pub fn port_mismatch(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortMismatch {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Create a network topology error
    pub fn network_topology(reason: impl Into<String>) -> Self {
        Self::NetworkTopology {
            reason: reason.into(),
        }
    }

    /// Create a dimension mismatch error from `(columns, rows)` pairs
    pub fn dimension_mismatch(expected: (usize, usize), found: (usize, usize)) -> Self {
        Self::DimensionMismatch {
            expected_columns: expected.0,
            expected_rows: expected.1,
            found_columns: found.0,
            found_rows: found.1,
        }
    }

    /// Create a missing input error
    pub fn missing_input(time_ms: f64, reason: impl Into<String>) -> Self {
        Self::MissingInput {
            time_ms,
            reason: reason.into(),
        }
    }

    /// Create a simulation step error
    pub fn simulation_step(time_ms: f64, reason: impl Into<String>) -> Self {
        Self::SimulationStep {
            time_ms,
            reason: reason.into(),
        }
    }

    /// True for errors raised while building the graph
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. }
                | Self::UnknownModuleType { .. }
                | Self::ModuleNotFound { .. }
                | Self::InvalidParameter { .. }
                | Self::PortMismatch { .. }
                | Self::NetworkTopology { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RuntimeError::invalid_config("missing modules");
        assert!(matches!(err, RuntimeError::InvalidConfiguration { .. }));

        let err = RuntimeError::invalid_parameter("tau", "0.0", "> 0.0");
        assert!(matches!(err, RuntimeError::InvalidParameter { .. }));
        assert!(err.is_build_error());
    }

    #[test]
    fn test_error_display() {
        let err = RuntimeError::module_not_found("tmp_bipolar");
        assert!(format!("{}", err).contains("Module 'tmp_bipolar' not found"));

        let err = RuntimeError::dimension_mismatch((4, 3), (2, 2));
        assert_eq!(
            format!("{}", err),
            "Dimension mismatch: expected 4x3, found 2x2"
        );
    }

    #[test]
    fn test_numerical_error_is_runtime() {
        let err = RuntimeError::NumericalError {
            module: "SNL".into(),
            time_ms: 12.0,
            pixel: 3,
            value: f64::NAN,
        };
        assert!(!err.is_build_error());
        assert!(format!("{}", err).contains("'SNL' at 12ms"));
    }
}
