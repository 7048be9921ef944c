// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parser module - tree-sitter grammars used for structural chunking

pub mod boundaries;
pub mod languages;

pub use boundaries::definition_starts;
pub use languages::detect_language;
