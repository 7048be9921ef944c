// SPDX-License-Identifier: MIT OR Apache-2.0

//! cdiscover - find the files in a repository that matter for a question
//!
//! Chunks and embeds source files into a local, incrementally refreshed
//! index, then ranks files by cosine similarity to a query.

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize tracing with CDISCOVER_LOG env var (e.g., CDISCOVER_LOG=debug cdiscover index)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CDISCOVER_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    match cli.command {
        Commands::Discover {
            query,
            add,
            limit,
            refresh,
            path,
        } => {
            commands::run_discover(&query, add, limit, refresh, path.as_deref(), format)?;
        }
        Commands::Index {
            path,
            force,
            exclude_paths,
        } => {
            commands::run_index(path.as_deref(), force, exclude_paths, format)?;
        }
        Commands::Watch { path, debounce } => {
            commands::run_watch(path.as_deref(), debounce)?;
        }
        Commands::Status { path } => {
            commands::run_status(path.as_deref(), format)?;
        }
        Commands::Clear { path } => {
            commands::run_clear(path.as_deref())?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "cdiscover", &mut std::io::stdout());
        }
    }

    Ok(())
}
