//! kinen CLI - offline-first anniversary tracking
//!
//! Every edit lands in the local store and the sync queue first; `kinen sync`
//! replays the queue against the remote authority.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::common::{resolve_config_path, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{run_conflicts, run_resolve};
use crate::commands::delete::run_delete;
use crate::commands::list::run_list;
use crate::commands::set::run_set;
use crate::commands::show::run_show;
use crate::commands::sync::{run_failed, run_queue, run_retry, run_status, run_sync};
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

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kinen=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config_path = resolve_config_path(cli.config);

    match cli.command {
        Some(Commands::Add {
            name,
            entity_type,
            date,
            fields,
        }) => run_add(&name, &entity_type, date.as_deref(), &fields, &db_path).await?,
        Some(Commands::List { entity_type, json }) => {
            run_list(entity_type.as_deref(), json, &db_path).await?;
        }
        Some(Commands::Show { id, json }) => run_show(&id, json, &db_path).await?,
        Some(Commands::Set { id, assignments }) => run_set(&id, &assignments, &db_path).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &db_path).await?,
        Some(Commands::Sync { json }) => run_sync(json, &db_path, &config_path).await?,
        Some(Commands::Status { json }) => run_status(json, &db_path, &config_path).await?,
        Some(Commands::Queue { json }) => run_queue(json, &db_path, &config_path).await?,
        Some(Commands::Failed { json }) => run_failed(json, &db_path, &config_path).await?,
        Some(Commands::Retry) => run_retry(false, &db_path, &config_path).await?,
        Some(Commands::Conflicts { all, limit, json }) => {
            run_conflicts(all, limit, json, &db_path).await?;
        }
        Some(Commands::Resolve { id, choice }) => run_resolve(&id, choice, &db_path).await?,
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
