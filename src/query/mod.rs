// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - semantic ranking of indexed files

pub mod engine;

pub use engine::{QueryEngine, ScoreAggregation, SearchResult};
