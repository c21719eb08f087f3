// ABOUTME: Entry point for the meshvm CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use meshvm::config::{self, Config};
use meshvm::error::Result;
use meshvm::output::{Output, OutputMode};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let output = Output::new(mode);

    match cli.command {
        Commands::Init {
            resource_group,
            force,
        } => {
            let cwd = env::current_dir()?;
            config::init_config(&cwd, resource_group.as_deref(), force)?;
            output.success(&format!("Created {}", config::CONFIG_FILENAME));
            Ok(())
        }
        Commands::Validate { requests } => {
            let config = load_config(cli.config.as_deref())?;
            commands::validate(&config, &requests, &output)
        }
        Commands::Deploy { requests } => {
            let config = load_config(cli.config.as_deref())?;
            commands::deploy(config, &requests, output).await
        }
        Commands::Status { name, mesh_files } => {
            commands::status(name.as_deref(), mesh_files, &output)
        }
        Commands::Cleanup { name } => {
            let config = load_config(cli.config.as_deref())?;
            commands::cleanup(config, &name, output).await
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover_or_default(&env::current_dir()?),
    }
}
