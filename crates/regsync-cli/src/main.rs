//! regsync - reconcile device identifier feeds into a soft-delete registry
//!
//! One `regsync sync <feed>` is one batch run: decode, reconcile, report,
//! notify.

mod cli;
mod commands;
mod config_profiles;
mod error;
mod feed;


use std::io;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::common::Settings;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::list::run_list;
use crate::commands::runs::run_runs;
use crate::commands::show::run_show;
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, SyncArgs};
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "regsync_core=info,regsync_cli=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Sync {
            feed,
            actor,
            source,
            report,
            format,
            no_notify,
        } => {
            let settings = Settings::resolve(cli.db_path, profile)?;
            let args = SyncArgs {
                feed,
                actor,
                source,
                report,
                format: format.into(),
                notify: !no_notify,
            };
            run_sync(&args, &settings).await?;
        }
        Commands::Status { json } => {
            let settings = Settings::resolve(cli.db_path, profile)?;
            run_status(json, &settings).await?;
        }
        Commands::List {
            state,
            limit,
            offset,
            json,
        } => {
            let settings = Settings::resolve(cli.db_path, profile)?;
            run_list(state.into(), limit, offset, json, &settings).await?;
        }
        Commands::Show { identifier, json } => {
            let settings = Settings::resolve(cli.db_path, profile)?;
            run_show(&identifier, json, &settings).await?;
        }
        Commands::Runs { limit, json } => {
            let settings = Settings::resolve(cli.db_path, profile)?;
            run_runs(limit, json, &settings).await?;
        }
        Commands::Config { command } => run_config(command, profile, cli.db_path)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
