//! Ember VM command line
//!
//! Entry point for the `ember` binary. Parses CLI arguments, installs
//! logging and delegates to the Runtime for execution.

use clap::Parser as ClapParser;
use ember_cli::{disassemble_file, load_config, Cli, CliResult, Command, RunArgs, Runtime};
use interpreter::VmConfig;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Command::Run(args) => run(args),
        Command::Disasm { image } => disassemble_file(&image).map(|listing| print!("{}", listing)),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: RunArgs) -> CliResult<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => VmConfig::default(),
    };
    let mut runtime = Runtime::new(config);

    let result = runtime.execute_file(&args.image)?;
    if runtime.attach_tick_handler() {
        runtime.run_ticks(args.ticks, args.tick_step)?;
    }

    for line in runtime.take_trace_output() {
        println!("{}", line);
    }
    // Print result if not undefined
    if !result.is_undefined() {
        println!("{}", result);
    }

    if args.collect {
        let stats = runtime.collect()?;
        println!(
            "collected: live {} -> {}, marked {}, dereferenced {}",
            stats.live_before, stats.live_after, stats.marked, stats.dereferenced
        );
    }
    Ok(())
}
