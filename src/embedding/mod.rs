// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - chunking, vector providers, the worker pool, and the
//! persisted index.

pub mod chunker;
pub mod pool;
pub mod provider;
pub mod storage;

pub use chunker::{ChunkConfig, EmbeddingChunker, TextChunk};
pub use pool::{CancelFlag, EmbedJob, EmbedOutcome, EmbedPool};
pub use provider::{create_provider, CommandProvider, EmbeddingProvider, HashEmbedder};
pub use storage::{ChunkRecord, EmbeddingEntry, FileRecord, IndexSnapshot, IndexStore};
