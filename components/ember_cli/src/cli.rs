//! Command line arguments

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Default tick step: one frame at 60 Hz
pub const DEFAULT_TICK_STEP: f64 = 1.0 / 60.0;

/// Ember bytecode VM
#[derive(Parser, Debug)]
#[command(name = "ember", version, about = "Run and inspect Ember bytecode images")]
pub struct Cli {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// What to do
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute an image's top-level code
    Run(RunArgs),

    /// Print a listing of an image
    Disasm {
        /// Path to the persisted image
        image: PathBuf,
    },
}

/// Arguments of `ember run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the persisted image
    pub image: PathBuf,

    /// Number of frame ticks to deliver after the top level returns
    #[arg(long, default_value_t = 0)]
    pub ticks: u32,

    /// Seconds between consecutive ticks
    #[arg(long, default_value_t = DEFAULT_TICK_STEP)]
    pub tick_step: f64,

    /// Run a cycle collection before exiting and print its statistics
    #[arg(long)]
    pub collect: bool,

    /// JSON file with VM limits
    #[arg(long)]
    pub config: Option<PathBuf>,
}
