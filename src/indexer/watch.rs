// SPDX-License-Identifier: MIT OR Apache-2.0

//! File watcher for incremental index updates with debouncing

use anyhow::Result;
use colored::Colorize;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::config::CONFIG_FILE;
use crate::errors::IndexError;
use crate::indexer::manager::{IndexManager, RefreshOptions};
use crate::indexer::scanner::IGNORE_FILE;

/// Hidden files whose edits change what gets indexed.
const WATCHED_DOTFILES: &[&str] = &[".gitignore", IGNORE_FILE, CONFIG_FILE];

/// Default debounce interval in seconds
pub const DEFAULT_DEBOUNCE_SECS: u64 = 2;

/// Minimum time between refreshes
const MIN_REFRESH_INTERVAL_SECS: u64 = 5;

/// File system watcher with debouncing
pub struct Watcher<'a> {
    manager: &'a IndexManager,
    debounce_duration: Duration,
    min_refresh_interval: Duration,
}

impl<'a> Watcher<'a> {
    pub fn new(manager: &'a IndexManager) -> Self {
        Self::with_debounce(manager, DEFAULT_DEBOUNCE_SECS)
    }

    pub fn with_debounce(manager: &'a IndexManager, debounce_secs: u64) -> Self {
        Self {
            manager,
            debounce_duration: Duration::from_secs(debounce_secs),
            min_refresh_interval: Duration::from_secs(MIN_REFRESH_INTERVAL_SECS.max(debounce_secs)),
        }
    }

    /// Blocks, refreshing the index after each burst of changes.
    pub fn watch(&self) -> Result<()> {
        let root = self.manager.store().repo_root().to_path_buf();
        let cache_dir = self.manager.store().dir().to_path_buf();
        let (tx, rx) = channel();

        let config = NotifyConfig::default().with_poll_interval(Duration::from_secs(2));
        let mut watcher = RecommendedWatcher::new(tx, config)?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        eprintln!("{} Watching {} for changes...", "👁".cyan(), root.display());
        eprintln!(
            "  Debounce: {}s, Min interval: {}s",
            self.debounce_duration.as_secs(),
            self.min_refresh_interval.as_secs()
        );
        eprintln!("Press Ctrl+C to stop\n");

        let mut pending_paths: HashSet<PathBuf> = HashSet::new();
        let mut last_event_time: Option<Instant> = None;
        let mut last_refresh_time: Option<Instant> = None;

        loop {
            let timeout = if pending_paths.is_empty() {
                Duration::from_secs(60)
            } else {
                self.debounce_duration
            };

            match rx.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    if is_relevant(&event) {
                        for path in event.paths.iter().filter(|p| is_watched(&root, &cache_dir, p)) {
                            if path.file_name().is_some_and(|name| name == CONFIG_FILE) {
                                eprintln!(
                                    "{} {} changed; restart watch to apply new settings",
                                    "!".yellow(),
                                    CONFIG_FILE
                                );
                            }
                            pending_paths.insert(path.clone());
                        }
                        if !pending_paths.is_empty() {
                            last_event_time = Some(Instant::now());
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "watch error");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if pending_paths.is_empty() {
                continue;
            }
            let settled = last_event_time.is_some_and(|t| t.elapsed() >= self.debounce_duration);
            let allowed = last_refresh_time.is_none_or(|t| t.elapsed() >= self.min_refresh_interval);
            if !(settled && allowed) {
                continue;
            }

            eprintln!("{} {} path(s) changed, refreshing...", "🔄".yellow(), pending_paths.len());
            // Events arriving during the refresh start a new batch.
            pending_paths.clear();
            last_event_time = None;

            let start = Instant::now();
            match self.manager.refresh(&RefreshOptions::default()) {
                Ok(report) => eprintln!(
                    "{} Refreshed in {:.1}s (+{} ~{} -{}, {} embedded)",
                    "✓".green(),
                    start.elapsed().as_secs_f64(),
                    report.added,
                    report.modified,
                    report.removed,
                    report.embedded
                ),
                Err(IndexError::LockContention(_)) => {
                    eprintln!("{} Another refresh is running; will retry on the next change", "…".yellow());
                }
                Err(e) => eprintln!("{} Refresh failed: {}", "✗".red(), e),
            }
            last_refresh_time = Some(Instant::now());
        }

        Ok(())
    }
}

fn is_relevant(event: &Event) -> bool {
    use notify::EventKind::*;
    matches!(event.kind, Create(_) | Modify(_) | Remove(_))
}

/// Drops events from hidden paths and the index cache. Ignore files and
/// the config file still count.
fn is_watched(root: &Path, cache_dir: &Path, path: &Path) -> bool {
    if path.starts_with(cache_dir) {
        return false;
    }
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    let names: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    let Some((last, dirs)) = names.split_last() else {
        return false;
    };
    if dirs.iter().any(|name| name.starts_with('.')) {
        return false;
    }
    !last.starts_with('.') || WATCHED_DOTFILES.iter().any(|name| *name == &**last)
}
