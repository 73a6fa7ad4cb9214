//! Précis CLI - sync settings, history and library across devices
//!
//! Signs in through the browser, runs sync cycles on demand and keeps a
//! background schedule in `precis daemon`.

mod auth;
mod cli;
mod commands;
mod error;
mod prompt;
mod scheduler;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::account::{run_login, run_logout, run_status};
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::daemon::run_daemon;
use crate::commands::sync::{run_auto_sync, run_prefs, run_resolve, run_sync};
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

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "precis=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Some(Commands::Login) => run_login(&db_path).await?,
        Some(Commands::Logout { revoke }) => run_logout(revoke, &db_path).await?,
        Some(Commands::Sync) => run_sync(&db_path).await?,
        Some(Commands::AutoSync { state }) => run_auto_sync(state, &db_path).await?,
        Some(Commands::Prefs {
            settings,
            history,
            library,
        }) => run_prefs(settings, history, library, &db_path).await?,
        Some(Commands::Resolve { choice }) => run_resolve(choice, &db_path).await?,
        Some(Commands::Status { json }) => run_status(json, &db_path).await?,
        Some(Commands::Daemon) => run_daemon(&db_path).await?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
