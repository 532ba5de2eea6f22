//! Parcel CLI - Main entry point

use clap::Parser;
use parcel_cli::commands::{self, Outcome};
use parcel_cli::{Cli, Commands, Settings};
use parcel_common::logging::init_logging;
use std::process;
use tracing::error;

/// Exit status for a failed export or a dataset that could not be processed
const EXIT_FAILURE: i32 = 2;

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Keep the guard alive so file logs are flushed on exit
    let _guard = match parcel_cli::log_config(cli.verbose)
        .and_then(|config| init_logging(&config).map_err(Into::into))
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: {}", e);
            None
        },
    };

    match execute_command(cli.command).await {
        Ok(Outcome::Success) => {},
        Ok(Outcome::Failure) => process::exit(EXIT_FAILURE),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            process::exit(EXIT_FAILURE);
        },
    }
}

/// Execute the CLI command
async fn execute_command(command: Commands) -> parcel_cli::Result<Outcome> {
    let settings = Settings::from_env()?;

    match command {
        Commands::Init { git, paths } => commands::init::run(paths, git).await,

        Commands::Export { parcel_id, paths } => {
            commands::export::run(&settings, paths, parcel_id).await
        },

        Commands::Ingest {
            parcel_id,
            dataset,
            path,
        } => commands::ingest::run(&settings, dataset, path, parcel_id).await,

        Commands::Process { paths } => commands::process::run(&settings, paths).await,

        Commands::Clean { paths } => commands::clean::run(&settings, paths).await,

        Commands::Report {
            format,
            offsets,
            paths,
        } => commands::report::run(&settings, paths, format, offsets).await,

        Commands::ReprocessMetrics { parcel_ids, paths } => {
            commands::reprocess::run(&settings, paths, parcel_ids).await
        },

        Commands::List { format, dataset } => commands::list::run(dataset, format).await,

        Commands::Delete { dataset, parcel_id } => {
            commands::delete::run(&settings, dataset, parcel_id).await
        },
    }
}
