//! Stash CLI - offline-first notes organized in tabs
//!
//! Every edit lands in the local database first; `stash sync` and
//! `stash watch` reconcile with the backend.

mod cli;
mod commands;
mod config;
mod credentials;
mod error;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::messages::{run_add, run_delete, run_edit, run_list, run_move};
use crate::commands::sync::{run_status, run_sync, run_watch};
use crate::commands::tabs::run_tab;
use crate::config::resolve_db_path;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "stash=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Some(Commands::Add { content, tab }) => {
            run_add(&content, tab.as_deref(), &db_path).await?;
        }
        Some(Commands::List { tab, limit, json }) => {
            run_list(tab.as_deref(), limit, json, &db_path).await?;
        }
        Some(Commands::Edit { id, content }) => run_edit(&id, &content, &db_path).await?,
        Some(Commands::Move { id, tab, position }) => {
            run_move(&id, tab.as_deref(), position, &db_path).await?;
        }
        Some(Commands::Delete { id }) => run_delete(&id, &db_path).await?,
        Some(Commands::Tab { command }) => run_tab(command, &db_path).await?,
        Some(Commands::Sync) => run_sync(&db_path).await?,
        Some(Commands::Status { json }) => run_status(json, &db_path).await?,
        Some(Commands::Watch) => run_watch(&db_path).await?,
        Some(Commands::Auth { command }) => run_auth(command, &db_path).await?,
        Some(Commands::Config { command }) => run_config(command)?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            // Quick capture mode: stash "my thought"
            if cli.note.is_empty() {
                Cli::command().print_help()?;
                println!();
            } else {
                run_add(&cli.note, None, &db_path).await?;
            }
        }
    }

    Ok(())
}
