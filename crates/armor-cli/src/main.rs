//! Protects a compiled Python module against decompilation.

mod telemetry;

use anyhow::{Context, Result};
use armor_cli::{write_output, Container};
use armor_core::ArmorConfig;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::{panic, thread};
use tracing::info;

/// The pipeline clones and drops whole code objects, whose constants may nest
/// as deep as the marshal reader allows.
const PIPELINE_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "pyc-armor", version, about = "Insert decoy bytecode into a compiled Python module")]
struct Cli {
    /// Compiled module to protect
    path: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init_telemetry() {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(3);
    }

    match run_on_large_stack(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<armor_core::Error>()
                .map_or(1, armor_core::Error::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run_on_large_stack(cli: Cli) -> Result<()> {
    let handle = thread::Builder::new()
        .name("pyc-armor-main".into())
        .stack_size(PIPELINE_STACK_SIZE)
        .spawn(move || run(&cli))
        .context("failed to spawn the pipeline thread")?;
    handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload))
}

fn run(cli: &Cli) -> Result<()> {
    let config = ArmorConfig::default();

    let container = Container::open(&cli.path)?;
    println!("Python version: {}", container.header.version);
    println!("Creation time: {}", container.header.creation_time());
    println!("{}", container.code);

    let protected = container
        .protect(&config.recipe)
        .with_context(|| format!("failed to protect {}", cli.path.display()))?;
    info!(
        before = protected.original_instructions,
        after = protected.instructions,
        "protected code object"
    );

    let output = write_output(&cli.path, &config, &protected)?;
    println!(
        "Protected {} instructions ({} after insertion), written to {}",
        protected.original_instructions,
        protected.instructions,
        output.display()
    );
    Ok(())
}
