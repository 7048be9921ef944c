// SPDX-License-Identifier: MIT OR Apache-2.0

//! context-discovery - find the files in a repository that matter for a
//! natural-language question.
//!
//! Shared modules for the `cdiscover` CLI: file scanning, chunking, embedding,
//! the persistent per-repository index, and query ranking.

pub mod config;
pub mod embedding;
pub mod errors;
pub mod indexer;
pub mod output;
pub mod parser;
pub mod query;
pub mod utils;
