// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider interface and implementations.
//!
//! Every provider runs locally and is deterministic for identical input.
//! Callers depend only on [`EmbeddingProvider`]; [`create_provider`] picks the
//! implementation from configuration.

use serde_json::Value;
use std::borrow::Cow;
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{EmbeddingConfig, EmbeddingProviderType};
use crate::errors::EmbedError;

const DEFAULT_FASTEMBED_BATCH_SIZE: usize = 256;
const MAX_FASTEMBED_BATCH_SIZE: usize = 1024;
const DEFAULT_FASTEMBED_MAX_CHARS: usize = 2000;
const DEFAULT_COMMAND_BATCH_SIZE: usize = 64;
const DEFAULT_HASH_BATCH_SIZE: usize = 128;
const PROBE_TEXT: &str = "dimension probe";

pub type EmbedResult<T> = std::result::Result<T, EmbedError>;

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Returns the length of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Returns the batch size used by the provider.
    fn batch_size(&self) -> usize;

    /// Generates embeddings for the given texts, one vector per text.
    fn embed_texts(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    fn embed_one(&self, text: &str) -> EmbedResult<Vec<f32>> {
        let mut result = self.embed_texts(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| EmbedError::Item("No embedding returned".to_string()))
    }
}

/// Builds the configured provider, failing with [`EmbedError::Init`] if the
/// backend cannot be started.
pub fn create_provider(config: &EmbeddingConfig) -> EmbedResult<Arc<dyn EmbeddingProvider>> {
    match config.provider() {
        EmbeddingProviderType::Hash => Ok(Arc::new(HashEmbedder::new(config.dimension()))),
        EmbeddingProviderType::Command => {
            let mut provider =
                CommandProvider::connect(config.command().to_string(), config.model().to_string())?;
            if let Some(batch_size) = config.batch_size() {
                provider.batch_size = batch_size;
            }
            Ok(Arc::new(provider))
        }
        EmbeddingProviderType::Builtin => builtin_provider(config),
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
fn builtin_provider(config: &EmbeddingConfig) -> EmbedResult<Arc<dyn EmbeddingProvider>> {
    let mut provider_config = EmbeddingProviderConfig::from_env(config.model())?;
    if let Some(batch_size) = config.batch_size() {
        provider_config.batch_size = batch_size.min(MAX_FASTEMBED_BATCH_SIZE);
    }
    if let Some(max_chars) = config.max_chars() {
        provider_config.max_chars = max_chars;
    }
    Ok(Arc::new(FastEmbedder::new(provider_config)?))
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
fn builtin_provider(_config: &EmbeddingConfig) -> EmbedResult<Arc<dyn EmbeddingProvider>> {
    Err(EmbedError::Init(
        "the builtin fastembed provider is not available on this platform; \
         set embeddings.provider to \"command\" or \"hash\""
            .to_string(),
    ))
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
pub use fastembed_provider::{EmbeddingProviderConfig, FastEmbedder};

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
mod fastembed_provider {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Configuration for the fastembed provider.
    #[derive(Debug, Clone)]
    pub struct EmbeddingProviderConfig {
        pub model: EmbeddingModel,
        pub batch_size: usize,
        pub max_chars: usize,
        pub normalize: bool,
    }

    impl EmbeddingProviderConfig {
        /// Resolves the model name, letting FASTEMBED_* variables override it.
        pub fn from_env(model_name: &str) -> EmbedResult<Self> {
            let raw = env::var("FASTEMBED_MODEL").unwrap_or_else(|_| model_name.to_string());
            let model = parse_model(&raw)?;

            let mut batch_size =
                parse_usize_env("FASTEMBED_BATCH_SIZE", DEFAULT_FASTEMBED_BATCH_SIZE)?;
            if batch_size == 0 {
                batch_size = DEFAULT_FASTEMBED_BATCH_SIZE;
            }
            if batch_size > MAX_FASTEMBED_BATCH_SIZE {
                tracing::warn!(
                    "FASTEMBED_BATCH_SIZE={} exceeds max {}; clamping",
                    batch_size,
                    MAX_FASTEMBED_BATCH_SIZE
                );
                batch_size = MAX_FASTEMBED_BATCH_SIZE;
            }

            let mut max_chars = parse_usize_env("FASTEMBED_MAX_CHARS", DEFAULT_FASTEMBED_MAX_CHARS)?;
            if max_chars == 0 {
                max_chars = DEFAULT_FASTEMBED_MAX_CHARS;
            }

            Ok(Self {
                model,
                batch_size,
                max_chars,
                normalize: true,
            })
        }
    }

    impl Default for EmbeddingProviderConfig {
        fn default() -> Self {
            Self {
                model: EmbeddingModel::BGESmallENV15,
                batch_size: DEFAULT_FASTEMBED_BATCH_SIZE,
                max_chars: DEFAULT_FASTEMBED_MAX_CHARS,
                normalize: true,
            }
        }
    }

    fn parse_model(raw: &str) -> EmbedResult<EmbeddingModel> {
        let value = raw.trim();
        if value.is_empty() {
            return Ok(EmbeddingModel::BGESmallENV15);
        }
        match value.to_lowercase().as_str() {
            "bge-small" | "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => {
                Ok(EmbeddingModel::BGESmallENV15)
            }
            "minilm"
            | "all-minilm-l6-v2"
            | "allminilm-l6-v2"
            | "sentence-transformers/all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
            other => Err(EmbedError::Init(format!(
                "Unsupported embedding model '{}'. Supported values: bge-small, minilm",
                other
            ))),
        }
    }

    /// FastEmbed provider backed by a local ONNX model.
    pub struct FastEmbedder {
        embedder: Mutex<TextEmbedding>,
        config: EmbeddingProviderConfig,
        model_id: String,
        dimension: usize,
    }

    impl FastEmbedder {
        pub fn new(config: EmbeddingProviderConfig) -> EmbedResult<Self> {
            let model = config.model.clone();
            let model_id = model.to_string();
            let init = InitOptions::new(model);
            let embedder = TextEmbedding::try_new(init).map_err(|e| {
                EmbedError::Init(format!("Failed to initialize fastembed model: {}", e))
            })?;

            let mut provider = Self {
                embedder: Mutex::new(embedder),
                config,
                model_id,
                dimension: 0,
            };
            provider.dimension = provider
                .embed_one(PROBE_TEXT)
                .map_err(|e| EmbedError::Init(format!("Model probe failed: {}", e)))?
                .len();
            Ok(provider)
        }
    }

    impl EmbeddingProvider for FastEmbedder {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn batch_size(&self) -> usize {
            self.config.batch_size
        }

        fn embed_texts(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let prepared = truncate_texts(texts, self.config.max_chars);
            let mut embedder = self
                .embedder
                .lock()
                .map_err(|_| EmbedError::Item("fastembed model lock poisoned".to_string()))?;
            let mut embeddings = embedder
                .embed(&prepared, Some(self.config.batch_size))
                .map_err(|e| EmbedError::Item(e.to_string()))?;
            drop(embedder);

            if self.config.normalize {
                for embedding in embeddings.iter_mut() {
                    l2_normalize(embedding);
                }
            }

            Ok(embeddings)
        }
    }
}

/// Command provider that shells out to a local process.
///
/// The process receives `{"model": ..., "texts": [...]}` on stdin and answers
/// with a JSON array of vectors, or an object holding one under
/// `embeddings`, `vectors` or `data`.
pub struct CommandProvider {
    command: String,
    model: String,
    batch_size: usize,
    dimension: usize,
}

impl CommandProvider {
    /// Starts the command once to check it works and learn its dimension.
    pub fn connect(command: String, model: String) -> EmbedResult<Self> {
        let mut provider = Self {
            command,
            model,
            batch_size: DEFAULT_COMMAND_BATCH_SIZE,
            dimension: 0,
        };
        let probe = provider
            .run_command(&[PROBE_TEXT.to_string()])
            .map_err(|e| EmbedError::Init(e.to_string()))?;
        provider.dimension = probe
            .first()
            .map(Vec::len)
            .filter(|&d| d > 0)
            .ok_or_else(|| EmbedError::Init("Embedding command returned no vector".to_string()))?;
        Ok(provider)
    }

    fn run_command(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EmbedError::Init(format!(
                    "Failed to spawn embedding command '{}': {}",
                    self.command, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload_str = payload.to_string();
            stdin.write_all(payload_str.as_bytes()).map_err(|e| {
                EmbedError::Item(format!("Failed to write embeddings payload to stdin: {}", e))
            })?;
        }

        let output = child.wait_with_output().map_err(|e| {
            EmbedError::Item(format!("Failed to read embeddings command output: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EmbedError::Item(format!(
                "Embedding command failed (status {}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_vectors(stdout.trim(), texts.len())
    }
}

impl EmbeddingProvider for CommandProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run_command(texts)
    }
}

fn parse_vectors(raw: &str, expected: usize) -> EmbedResult<Vec<Vec<f32>>> {
    let item_err = |msg: &str| EmbedError::Item(msg.to_string());

    let parsed: Value = serde_json::from_str(raw)
        .map_err(|_| item_err("Failed to parse embeddings command output as JSON"))?;

    let embeddings_value = match parsed {
        Value::Array(arr) => Value::Array(arr),
        Value::Object(ref obj) => obj
            .get("embeddings")
            .or_else(|| obj.get("vectors"))
            .or_else(|| obj.get("data"))
            .cloned()
            .ok_or_else(|| item_err("Embeddings command output missing 'embeddings' field"))?,
        _ => return Err(item_err("Embeddings command output must be JSON array or object")),
    };

    let vectors = embeddings_value
        .as_array()
        .ok_or_else(|| item_err("Embeddings output must be a JSON array"))?
        .iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| item_err("Embedding row must be an array"))?
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .map(|v| v as f32)
                        .ok_or_else(|| item_err("Embedding value must be a number"))
                })
                .collect::<EmbedResult<Vec<f32>>>()
        })
        .collect::<EmbedResult<Vec<Vec<f32>>>>()?;

    if vectors.len() != expected {
        return Err(EmbedError::Item(format!(
            "Embedding command returned {} vectors for {} texts",
            vectors.len(),
            expected
        )));
    }

    Ok(vectors)
}

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z]+[a-z0-9]*|[a-z0-9]+").expect("valid word regex"));

/// Deterministic feature-hashing provider.
///
/// Words (split on case changes, digits stay attached) and their padded
/// character trigrams are hashed into a signed, L2-normalized vector. It needs
/// no model files, which makes it the provider for offline use and tests.
pub struct HashEmbedder {
    model: String,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            model: format!("hash-{}", dimension),
            dimension: dimension.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for word in WORD_RE.find_iter(text) {
            let word = word.as_str().to_lowercase();
            self.add_feature(&mut vector, word.as_bytes(), 1.0);

            let padded: Vec<char> = format!("^{}$", word).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut vector, gram.as_bytes(), 0.5);
            }
        }

        l2_normalize(&mut vector);
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        let value = u64::from_le_bytes(word);

        let slot = (value % self.dimension as u64) as usize;
        let sign = if value >> 63 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        DEFAULT_HASH_BATCH_SIZE
    }

    fn embed_texts(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn truncate_texts(texts: &[String], max_chars: usize) -> Vec<Cow<'_, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

#[allow(dead_code)]
fn parse_usize_env(name: &str, default: usize) -> EmbedResult<usize> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(default)
            } else {
                value
                    .parse::<usize>()
                    .map_err(|_| EmbedError::Init(format!("Invalid {} value: {}", name, value)))
            }
        }
        Err(_) => Ok(default),
    }
}
