// SPDX-License-Identifier: MIT OR Apache-2.0

//! Utility functions for locating repositories

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directory that marks a repository root
pub const REPO_MARKER: &str = ".git";

/// Walks up from `start` to the nearest directory containing `.git`.
/// Falls back to `start` itself when there is none.
pub fn find_repo_root(start: impl AsRef<Path>) -> PathBuf {
    let mut current = start.as_ref().to_path_buf();

    // Canonicalize to handle relative paths
    if let Ok(canonical) = current.canonicalize() {
        current = canonical;
    }

    let original = current.clone();

    loop {
        if current.join(REPO_MARKER).exists() {
            return current;
        }
        if !current.pop() {
            break;
        }
    }

    original
}

/// Resolves an optional CLI path to a repository root.
pub fn resolve_root(path: Option<&str>) -> Result<PathBuf> {
    let start = match path {
        Some(p) => PathBuf::from(p),
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };
    if !start.exists() {
        anyhow::bail!("Path does not exist: {}", start.display());
    }
    Ok(find_repo_root(start))
}
