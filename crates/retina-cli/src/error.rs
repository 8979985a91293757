//! Error handling for the retina CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Failures of a `retina` invocation
#[derive(Error, Debug)]
pub enum CliError {
    /// Building or running the retina failed
    #[error("Simulation error: {0}")]
    Runtime(#[from] retina_runtime::RuntimeError),

    /// Experiment description could not be loaded
    #[error("Script error: {0}")]
    Script(String),

    /// Experiment description is not valid TOML for a retina script
    #[error("Malformed script: {0}")]
    Malformed(#[from] toml::de::Error),

    /// Run summary could not be encoded
    #[error("Summary encoding failed: {0}")]
    Summary(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Command-line flags that contradict the script
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a script loading error
    pub fn script(msg: impl Into<String>) -> Self {
        Self::Script(msg.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }
}
