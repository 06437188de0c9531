//! Kolosal Grid - Main Entry Point

use clap::Parser;
use kolosal_grid::cli::{cmd_plan, cmd_run, cmd_techniques, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_grid=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { settings, data, output, parallelism, categorize } => {
            cmd_run(&settings, &data, output.as_deref(), parallelism, categorize)?;
        }
        Commands::Plan { settings } => {
            cmd_plan(&settings)?;
        }
        Commands::Techniques => {
            cmd_techniques()?;
        }
    }

    Ok(())
}
