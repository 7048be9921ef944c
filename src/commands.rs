// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand implementations wiring config, store, provider and engine.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::OutputFormat;
use context_discovery::config::Config;
use context_discovery::embedding::chunker::EmbeddingChunker;
use context_discovery::embedding::pool::EmbedPool;
use context_discovery::embedding::provider::{create_provider, EmbeddingProvider};
use context_discovery::embedding::storage::IndexStore;
use context_discovery::errors::{IndexError, QueryError};
use context_discovery::indexer::manager::{IndexManager, RefreshOptions, RefreshReport};
use context_discovery::indexer::scanner::ScanOptions;
use context_discovery::indexer::watch::Watcher;
use context_discovery::output::{
    colorize_context, colorize_lines, colorize_path, colorize_score, excerpt_lines, use_colors,
};
use context_discovery::query::engine::{QueryEngine, SearchResult};
use context_discovery::utils::resolve_root;

/// Excerpt lines shown per result in text output
const EXCERPT_LINES: usize = 3;

/// A repository with its config and opened store.
struct Workspace {
    root: PathBuf,
    config: Config,
    store: Arc<IndexStore>,
}

impl Workspace {
    fn open(path: Option<&str>) -> Result<Self> {
        let root = resolve_root(path)?;
        let config = Config::load_for_dir(&root);
        let cache_dir = config.index().cache_dir();
        let store = IndexStore::open(&cache_dir, &root)
            .with_context(|| format!("Failed to open index cache at {}", cache_dir.display()))?;
        tracing::debug!(root = %root.display(), repo_id = store.repo_id(), "opened workspace");
        Ok(Self {
            root,
            config,
            store: Arc::new(store),
        })
    }

    fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        create_provider(self.config.embeddings()).context("Failed to initialise the embedding provider")
    }

    fn manager(&self, provider: Arc<dyn EmbeddingProvider>) -> Result<IndexManager> {
        let embeddings = self.config.embeddings();
        let pool = EmbedPool::new(embeddings.workers(), Duration::from_millis(embeddings.timeout_ms()))?;

        Ok(IndexManager::new(
            Arc::clone(&self.store),
            provider,
            EmbeddingChunker::new(self.config.chunk_config()),
            ScanOptions::from_config(self.config.index()),
            pool,
        ))
    }
}

fn refresh_options(force: bool) -> RefreshOptions {
    RefreshOptions {
        force,
        progress: std::io::stderr().is_terminal(),
        ..RefreshOptions::default()
    }
}

#[derive(Serialize)]
struct DiscoverOutput<'a> {
    query: &'a str,
    generation: u64,
    results: &'a [SearchResult],
}

/// `cdiscover discover`
pub fn run_discover(
    query: &str,
    add: bool,
    limit: Option<usize>,
    refresh: bool,
    path: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    if query.trim().is_empty() {
        return Err(QueryError::EmptyQuery.into());
    }
    let ws = Workspace::open(path)?;
    let limit = limit.unwrap_or_else(|| ws.config.search().limit());
    if limit == 0 {
        return Err(QueryError::InvalidLimit.into());
    }
    let provider = ws.provider()?;

    let missing = !ws.store.index_path().exists()
        || ws.store.needs_rebuild()
        || built_with_other_model(&ws, &provider);
    if refresh || missing {
        let manager = ws.manager(Arc::clone(&provider))?;
        match manager.refresh(&refresh_options(false)) {
            Ok(report) => tracing::debug!(generation = report.generation, "refreshed before search"),
            Err(IndexError::LockContention(_)) if !missing => {
                eprintln!(
                    "{} Another refresh is running; searching the last committed index",
                    "!".yellow()
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    let engine = QueryEngine::new(Arc::clone(&ws.store), provider).with_aggregation(ws.config.search().aggregation());
    let start = Instant::now();
    let results = engine.search(query, limit)?;
    let elapsed = start.elapsed();

    if add {
        print_ranking(&results, elapsed, true);
        for result in &results {
            println!("{}", result.path);
        }
        return Ok(());
    }

    match format {
        OutputFormat::Json => {
            let output = DiscoverOutput {
                query,
                generation: ws.store.snapshot().generation,
                results: &results,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => print_ranking(&results, elapsed, false),
    }
    Ok(())
}

/// True when the committed index holds vectors from a different model.
fn built_with_other_model(ws: &Workspace, provider: &Arc<dyn EmbeddingProvider>) -> bool {
    let snapshot = ws.store.snapshot();
    !snapshot.is_empty() && (snapshot.model_id != provider.model_id() || snapshot.dimension != provider.dimension())
}

fn print_ranking(results: &[SearchResult], elapsed: Duration, to_stderr: bool) {
    let on_terminal = if to_stderr {
        std::io::stderr().is_terminal()
    } else {
        std::io::stdout().is_terminal()
    };
    let use_color = use_colors() && on_terminal;
    let mut out = String::new();

    if results.is_empty() {
        out.push_str("No relevant files found.\n");
    }
    for (rank, result) in results.iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. {}  {}  {}\n",
            rank + 1,
            colorize_path(&result.path, use_color),
            colorize_score(result.score, use_color),
            colorize_lines(result.start_line, result.end_line, use_color),
        ));
        for line in excerpt_lines(&result.excerpt, EXCERPT_LINES) {
            out.push_str(&format!("      {}\n", colorize_context(&line, use_color)));
        }
    }
    if !results.is_empty() {
        out.push_str(&format!("\n{} file(s) in {:.1}ms\n", results.len(), elapsed.as_secs_f64() * 1000.0));
    }

    if to_stderr {
        eprint!("{}", out);
    } else {
        print!("{}", out);
    }
}

/// `cdiscover index`
pub fn run_index(path: Option<&str>, force: bool, exclude_paths: Vec<String>, format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path)?;
    let provider = ws.provider()?;
    let manager = ws.manager(provider)?;

    // Given patterns replace the stored ones and stick for later refreshes.
    let mut options = refresh_options(force);
    if !exclude_paths.is_empty() {
        options.excludes = Some(exclude_paths);
    }
    let start = Instant::now();
    let report = manager.refresh(&options)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&ws, &report, start.elapsed()),
    }
    Ok(())
}

fn print_report(ws: &Workspace, report: &RefreshReport, elapsed: Duration) {
    println!(
        "{} Indexed {} in {:.1}s (generation {})",
        "✓".green(),
        ws.root.display(),
        elapsed.as_secs_f64(),
        report.generation
    );
    println!(
        "  files: +{} added, ~{} modified, -{} removed, {} unchanged, {} skipped",
        report.added, report.modified, report.removed, report.unchanged, report.skipped
    );
    println!(
        "  chunks: {} indexed, {} embedded, {} reused from cache",
        report.chunks, report.embedded, report.reused
    );
    if report.failed > 0 {
        println!("  {} {} chunk(s) could not be embedded", "!".yellow(), report.failed);
    }
}

/// `cdiscover watch`
pub fn run_watch(path: Option<&str>, debounce: u64) -> Result<()> {
    let ws = Workspace::open(path)?;
    let provider = ws.provider()?;
    let manager = ws.manager(provider)?;

    let start = Instant::now();
    let report = manager.refresh(&refresh_options(false))?;
    print_report(&ws, &report, start.elapsed());

    Watcher::with_debounce(&manager, debounce).watch()
}

#[derive(Serialize)]
struct StatusOutput {
    repo_root: String,
    repo_id: String,
    index_path: String,
    indexed: bool,
    needs_rebuild: bool,
    generation: u64,
    model: String,
    dimension: usize,
    excludes: Vec<String>,
    files: usize,
    chunks: usize,
    embeddings: usize,
}

/// `cdiscover status`
pub fn run_status(path: Option<&str>, format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path)?;
    let snapshot = ws.store.snapshot();
    let status = StatusOutput {
        repo_root: ws.store.repo_root().display().to_string(),
        repo_id: ws.store.repo_id().to_string(),
        index_path: ws.store.index_path().display().to_string(),
        indexed: ws.store.index_path().exists(),
        needs_rebuild: ws.store.needs_rebuild(),
        generation: snapshot.generation,
        model: snapshot.model_id.clone(),
        dimension: snapshot.dimension,
        excludes: snapshot.excludes.clone(),
        files: snapshot.files.len(),
        chunks: snapshot.chunks.len(),
        embeddings: snapshot.embeddings.len(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            println!("Repository: {}", status.repo_root);
            println!("Repo id:    {}", status.repo_id);
            println!("Index:      {}", status.index_path);
            if !status.indexed {
                println!("Status:     not indexed (run `cdiscover index`)");
            } else if status.needs_rebuild {
                println!("Status:     {}", "corrupt; the next refresh rebuilds it".yellow());
            } else {
                println!("Generation: {}", status.generation);
                println!("Model:      {} ({} dims)", status.model, status.dimension);
                if !status.excludes.is_empty() {
                    println!("Excludes:   {}", status.excludes.join(", "));
                }
                println!(
                    "Contents:   {} files, {} chunks, {} embeddings",
                    status.files, status.chunks, status.embeddings
                );
            }
        }
    }
    Ok(())
}

/// `cdiscover clear`
pub fn run_clear(path: Option<&str>) -> Result<()> {
    let ws = Workspace::open(path)?;
    let _lock = ws.store.try_lock()?;
    ws.store.clear()?;
    println!("{} Cleared index for {}", "✓".green(), ws.root.display());
    Ok(())
}
