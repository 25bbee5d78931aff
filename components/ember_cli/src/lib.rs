//! Ember VM command line library
//!
//! Provides the [`Runtime`] used by the `ember` binary: load a persisted
//! bytecode image, run it, drive frame ticks and report collection
//! statistics.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod runtime;

pub use cli::{Cli, Command, RunArgs};
pub use error::{CliError, CliResult};
pub use runtime::{disassemble_file, load_config, Runtime, TICK_HANDLER};
