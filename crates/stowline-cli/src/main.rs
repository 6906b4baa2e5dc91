//! Stowline CLI
//!
//! Operator tooling for the offline sync engine: inspect the outbox, drain it,
//! detect and resolve conflicts, and manage profiles.

mod cli;
mod commands;
mod config_profiles;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::common::AppContext;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::{run_conflicts, run_detect};
use crate::commands::context::run_context;
use crate::commands::media::run_media;
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "stowline=info"
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let app = AppContext::resolve(cli.db_path, cli.config, cli.profile.as_deref())?;

    match cli.command {
        Commands::Status { json } => run_status(&app, json).await,
        Commands::Queue { command } => run_queue(command, &app).await,
        Commands::Sync { account, json } => run_sync(&app, account.as_deref(), json).await,
        Commands::Detect {
            account,
            project,
            json,
        } => run_detect(&app, account, project, json).await,
        Commands::Conflicts { command } => run_conflicts(command, &app).await,
        Commands::Media { command } => run_media(command, &app).await,
        Commands::Cache { command } => run_cache(command, &app).await,
        Commands::Context { command } => run_context(command, &app).await,
        Commands::Config { command } => run_config(command, cli.profile.as_deref(), &app),
        Commands::Watch {
            interval_secs,
            account,
        } => run_watch(&app, interval_secs, account.as_deref()).await,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
    }
}
