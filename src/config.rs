// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for cdiscover
//!
//! Loads configuration from .discoverrc.toml in the repository root or
//! ~/.config/context-discovery/config.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::embedding::chunker::ChunkConfig;
use crate::query::engine::ScoreAggregation;

/// Name of the per-repository config file
pub const CONFIG_FILE: &str = ".discoverrc.toml";

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "CDISCOVER_CACHE_DIR";

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    /// fastembed ONNX model
    #[default]
    Builtin,
    /// Local subprocess speaking JSON
    Command,
    /// Deterministic feature hashing, no model required
    Hash,
}

/// Score aggregation name as written in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    #[default]
    Max,
    Mean,
    TopKMean,
}

/// Indexing configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Paths/patterns to exclude from indexing (gitignore syntax)
    pub exclude_paths: Vec<String>,
    /// Maximum file size in bytes to index (default: 1MB)
    pub max_file_size: Option<u64>,
    /// Whether .gitignore files are honoured (default: true)
    pub respect_gitignore: Option<bool>,
    /// Root directory holding one index per repository
    pub cache_dir: Option<PathBuf>,
}

impl IndexConfig {
    /// Get exclude paths
    pub fn exclude_paths(&self) -> &[String] {
        &self.exclude_paths
    }

    /// Get max file size (default: 1MB)
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size.unwrap_or(1024 * 1024)
    }

    pub fn respect_gitignore(&self) -> bool {
        self.respect_gitignore.unwrap_or(true)
    }

    /// Resolve the cache root: env override, then config, then the user cache dir.
    pub fn cache_dir(&self) -> PathBuf {
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
            .unwrap_or_else(std::env::temp_dir)
            .join("context-discovery")
            .join("indexes")
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target maximum chunk size in bytes
    pub max_chunk_bytes: Option<usize>,
    /// Bytes shared between consecutive windows
    pub overlap_bytes: Option<usize>,
    /// Chunks shorter than this are dropped
    pub min_chunk_bytes: Option<usize>,
}

impl ChunkingConfig {
    pub fn to_chunk_config(&self) -> ChunkConfig {
        let defaults = ChunkConfig::default();
        let max_chunk_bytes = self
            .max_chunk_bytes
            .filter(|&v| v > 0)
            .unwrap_or(defaults.max_chunk_bytes);
        let overlap_bytes = self.overlap_bytes.unwrap_or(defaults.overlap_bytes);
        let overlap_bytes = if overlap_bytes >= max_chunk_bytes {
            eprintln!(
                "Warning: chunking.overlap_bytes ({}) must be less than max_chunk_bytes ({}); using {}.",
                overlap_bytes,
                max_chunk_bytes,
                max_chunk_bytes / 4
            );
            max_chunk_bytes / 4
        } else {
            overlap_bytes
        };
        ChunkConfig {
            max_chunk_bytes,
            overlap_bytes,
            min_chunk_bytes: self.min_chunk_bytes.unwrap_or(defaults.min_chunk_bytes),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type (builtin, command, hash)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier for the embedding provider
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Texts per embedding call
    pub batch_size: Option<usize>,
    /// Characters kept per text before embedding
    pub max_chars: Option<usize>,
    /// Embedding worker threads
    pub workers: Option<usize>,
    /// Per-call timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Vector dimension for the hash provider
    pub dimension: Option<usize>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Builtin)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to "bge-small")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("bge-small")
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size.filter(|&v| v > 0)
    }

    pub fn max_chars(&self) -> Option<usize> {
        self.max_chars.filter(|&v| v > 0)
    }

    /// Get worker count (defaults to available parallelism, at most 8)
    pub fn workers(&self) -> usize {
        self.workers.filter(|&v| v > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(8)
        })
    }

    /// Get timeout in milliseconds (defaults to 30s)
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.filter(|&v| v > 0).unwrap_or(30_000)
    }

    /// Get hash provider dimension (defaults to 384)
    pub fn dimension(&self) -> usize {
        self.dimension.filter(|&v| v > 0).unwrap_or(384)
    }
}

/// Search configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of results
    pub limit: Option<usize>,
    /// How chunk scores combine into a file score
    pub aggregation: Option<AggregationKind>,
    /// Chunks averaged by top_k_mean
    pub top_k: Option<usize>,
}

impl SearchConfig {
    /// Get default limit (defaults to 5)
    pub fn limit(&self) -> usize {
        self.limit.filter(|&v| v > 0).unwrap_or(5)
    }

    pub fn aggregation(&self) -> ScoreAggregation {
        match self.aggregation.unwrap_or_default() {
            AggregationKind::Max => ScoreAggregation::Max,
            AggregationKind::Mean => ScoreAggregation::Mean,
            AggregationKind::TopKMean => {
                ScoreAggregation::TopKMean(self.top_k.filter(|&k| k > 0).unwrap_or(3))
            }
        }
    }
}

/// Configuration loaded from .discoverrc.toml or ~/.config/context-discovery/config.toml
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding configuration
    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration for a repository
    ///
    /// Precedence (highest to lowest):
    /// 1. .discoverrc.toml in the repository root
    /// 2. ~/.config/context-discovery/config.toml
    pub fn load_for_dir(root: &Path) -> Self {
        if let Some(config) = Self::load_from_path(&root.join(CONFIG_FILE)) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home
                .join(".config")
                .join("context-discovery")
                .join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Get the index configuration
    pub fn index(&self) -> &IndexConfig {
        &self.index
    }

    /// Get the embedding configuration
    pub fn embeddings(&self) -> &EmbeddingConfig {
        &self.embeddings
    }

    /// Get the search configuration
    pub fn search(&self) -> &SearchConfig {
        &self.search
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        self.chunking.to_chunk_config()
    }
}
