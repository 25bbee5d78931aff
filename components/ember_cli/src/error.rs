//! Error types for the CLI

use core_types::VmError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// The VM reported a fatal error
    #[error("{0}")]
    Vm(#[from] VmError),

    /// File I/O error
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for `VmConfig`
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
