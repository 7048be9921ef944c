// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for scanning, embedding, indexing and querying.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while enumerating repository files.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A path could not be read. Callers skip the entry and continue.
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A user-supplied ignore pattern failed to compile.
    #[error("Invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Repository root does not exist: {0}")]
    MissingRoot(PathBuf),
}

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The backend could not be started. Indexing cannot proceed.
    #[error("Embedding backend unavailable: {0}")]
    Init(String),

    /// A single input could not be embedded. The chunk is skipped.
    #[error("Embedding failed: {0}")]
    Item(String),

    #[error("Embedding call timed out after {0} ms")]
    Timeout(u64),
}

/// Errors raised by the index store and the refresh state machine.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The committed index failed validation on load.
    #[error("Index at {path} is corrupt: {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// Another refresh holds the repository lock.
    #[error("A refresh is already running for this repository (lock: {0})")]
    LockContention(PathBuf),

    #[error("Refresh cancelled; previous index left in place")]
    Cancelled,

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("Index storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Index I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised before or while ranking a query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query is empty; describe what you are looking for")]
    EmptyQuery,

    #[error("Result limit must be at least 1")]
    InvalidLimit,

    #[error("Query embedding has dimension {query}, index was built with {index}")]
    DimensionMismatch { query: usize, index: usize },

    /// The index was built by another embedding model; refresh it first.
    #[error("Query model '{query}' does not match index model '{index}'; rebuild the index")]
    ModelMismatch { query: String, index: String },

    #[error(transparent)]
    Embed(#[from] EmbedError),
}
