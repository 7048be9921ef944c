// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental refresh of a repository index.
//!
//! A refresh scans the tree, diffs it against the committed snapshot, embeds
//! only chunk texts the index has never seen, and commits the result
//! atomically. At most one refresh per repository runs at a time; the lock is
//! a file, so this holds across processes too.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::embedding::chunker::EmbeddingChunker;
use crate::embedding::pool::{CancelFlag, EmbedJob, EmbedPool};
use crate::embedding::provider::EmbeddingProvider;
use crate::embedding::storage::{ChunkRecord, EmbeddingEntry, FileRecord, IndexSnapshot, IndexStore};
use crate::errors::{IndexError, ScanError};
use crate::indexer::scanner::{FileScanner, ScanOptions, ScannedFile};

/// Phase of the refresh state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Scanning,
    Diffing,
    Embedding,
    Committing,
    /// The last refresh failed; the committed index is unchanged
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    /// Re-chunk every file even if it looks unchanged
    pub force: bool,
    pub cancel: CancelFlag,
    /// Draw an embedding progress bar on stderr
    pub progress: bool,
    /// Exclude patterns that replace the ones stored with the index.
    /// `None` keeps the stored patterns.
    pub excludes: Option<Vec<String>>,
}

/// What a refresh did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Chunks in the committed index
    pub chunks: usize,
    /// Texts sent to the embedding provider
    pub embedded: usize,
    /// New chunks served from the embedding cache
    pub reused: usize,
    /// Files skipped as binary or unreadable
    pub skipped: usize,
    /// Chunks left out because their embedding failed
    pub failed: usize,
    pub generation: u64,
}

enum ChangeKind {
    Added,
    Modified,
}

struct ChangedFile {
    record: FileRecord,
    text: String,
    kind: ChangeKind,
}

/// Keeps one repository's index in sync with its file tree.
pub struct IndexManager {
    store: Arc<IndexStore>,
    provider: Arc<dyn EmbeddingProvider>,
    chunker: EmbeddingChunker,
    scan_options: ScanOptions,
    pool: EmbedPool,
    state: Mutex<RefreshState>,
}

impl IndexManager {
    pub fn new(
        store: Arc<IndexStore>,
        provider: Arc<dyn EmbeddingProvider>,
        chunker: EmbeddingChunker,
        scan_options: ScanOptions,
        pool: EmbedPool,
    ) -> Self {
        Self {
            store,
            provider,
            chunker,
            scan_options,
            pool,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn state(&self) -> RefreshState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RefreshState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Brings the committed index up to date with the working tree.
    ///
    /// Fails with [`IndexError::LockContention`] if another refresh of the
    /// same repository is running. On any failure the committed index is left
    /// as it was.
    pub fn refresh(&self, options: &RefreshOptions) -> Result<RefreshReport, IndexError> {
        let _lock = self.store.try_lock()?;
        let started = Instant::now();

        match self.run(options) {
            Ok(report) => {
                self.set_state(RefreshState::Idle);
                tracing::info!(
                    added = report.added,
                    modified = report.modified,
                    removed = report.removed,
                    unchanged = report.unchanged,
                    embedded = report.embedded,
                    reused = report.reused,
                    generation = report.generation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "refresh complete"
                );
                Ok(report)
            }
            Err(err) => {
                self.set_state(RefreshState::Error);
                tracing::warn!(error = %err, "refresh failed; committed index unchanged");
                Err(err)
            }
        }
    }

    fn run(&self, options: &RefreshOptions) -> Result<RefreshReport, IndexError> {
        let cancel = &options.cancel;
        let mut report = RefreshReport::default();

        self.set_state(RefreshState::Scanning);
        check_cancelled(cancel)?;
        let previous = self.store.snapshot();
        let excludes = options
            .excludes
            .clone()
            .unwrap_or_else(|| previous.excludes.clone());
        let mut scan_options = self.scan_options.clone();
        scan_options.exclude_patterns.extend(excludes.iter().cloned());
        let scanner = FileScanner::new(self.store.repo_root(), scan_options)?;
        let scanned = scanner.scan();
        tracing::debug!(files = scanned.len(), excludes = excludes.len(), "scan complete");

        self.set_state(RefreshState::Diffing);
        check_cancelled(cancel)?;
        let chunking = self.chunker.config().fingerprint();
        let model_changed = !previous.is_empty()
            && (previous.model_id != self.provider.model_id()
                || previous.dimension != self.provider.dimension());
        if model_changed {
            tracing::info!(
                from = %previous.model_id,
                to = %self.provider.model_id(),
                "embedding model changed; rebuilding index"
            );
        }
        let chunking_changed = !previous.is_empty() && previous.chunking != chunking;
        if chunking_changed {
            tracing::info!(from = %previous.chunking, to = %chunking, "chunking settings changed; re-chunking index");
        }
        let rebuild = options.force || self.store.needs_rebuild() || model_changed || chunking_changed;

        let mut kept: Vec<FileRecord> = Vec::new();
        let mut changed: Vec<ChangedFile> = Vec::new();
        for file in &scanned {
            let prior = previous.files.get(&file.path);
            if let Some(record) = prior {
                if !rebuild && record.size == file.size && record.mtime_ns == file.mtime_ns {
                    kept.push(record.clone());
                    continue;
                }
            }
            let (record, text) = match read_text_file(file) {
                Ok(Some(contents)) => contents,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "skipping file");
                    report.skipped += 1;
                    continue;
                }
            };
            match prior {
                Some(old) if !rebuild && old.content_hash == record.content_hash => {
                    // Touched but identical.
                    kept.push(record);
                }
                Some(_) => changed.push(ChangedFile {
                    record,
                    text,
                    kind: ChangeKind::Modified,
                }),
                None => changed.push(ChangedFile {
                    record,
                    text,
                    kind: ChangeKind::Added,
                }),
            }
        }

        let present: BTreeSet<&str> = kept
            .iter()
            .map(|r| r.path.as_str())
            .chain(changed.iter().map(|c| c.record.path.as_str()))
            .collect();
        report.removed = previous
            .files
            .keys()
            .filter(|path| !present.contains(path.as_str()))
            .count();
        report.unchanged = kept.len();
        for file in &changed {
            match file.kind {
                ChangeKind::Added => report.added += 1,
                ChangeKind::Modified => report.modified += 1,
            }
        }

        self.set_state(RefreshState::Embedding);
        check_cancelled(cancel)?;
        let chunked: Vec<Vec<ChunkRecord>> = changed
            .par_iter()
            .map(|file| {
                self.chunker
                    .chunk_file(&file.record.path, &file.text)
                    .into_iter()
                    .map(|chunk| {
                        let content_hash = hash_bytes(chunk.text.as_bytes());
                        ChunkRecord {
                            id: chunk_id(&file.record.path, chunk.start_byte, chunk.end_byte, &content_hash),
                            path: file.record.path.clone(),
                            start_byte: chunk.start_byte,
                            end_byte: chunk.end_byte,
                            start_line: chunk.start_line,
                            end_line: chunk.end_line,
                            content_hash,
                        }
                    })
                    .collect()
            })
            .collect();

        // Texts the cache cannot serve, keyed by content hash.
        let mut pending: BTreeMap<String, String> = BTreeMap::new();
        for (file, chunks) in changed.iter().zip(&chunked) {
            for chunk in chunks {
                let cached = !model_changed && previous.lookup(&chunk.content_hash).is_some();
                if cached || pending.contains_key(&chunk.content_hash) {
                    report.reused += 1;
                } else {
                    let text = file.text[chunk.start_byte..chunk.end_byte].to_string();
                    pending.insert(chunk.content_hash.clone(), text);
                }
            }
        }

        let jobs: Vec<EmbedJob> = pending
            .iter()
            .map(|(hash, text)| EmbedJob {
                content_hash: hash.clone(),
                text: text.clone(),
            })
            .collect();
        let progress = progress_bar(jobs.len(), options.progress);
        let outcome = self.pool.embed_all(&self.provider, jobs, cancel, Some(&progress))?;
        progress.finish_and_clear();
        report.embedded = outcome.vectors.len();

        self.set_state(RefreshState::Committing);
        check_cancelled(cancel)?;
        let mut next = IndexSnapshot::new(self.provider.model_id(), self.provider.dimension());
        next.chunking = chunking;
        next.excludes = excludes;

        let mut previous_chunks: HashMap<&str, Vec<&ChunkRecord>> = HashMap::new();
        for chunk in &previous.chunks {
            previous_chunks.entry(chunk.path.as_str()).or_default().push(chunk);
        }
        for record in kept {
            for chunk in previous_chunks.get(record.path.as_str()).into_iter().flatten() {
                if let Some(entry) = previous.lookup(&chunk.content_hash) {
                    next.embeddings
                        .entry(chunk.content_hash.clone())
                        .or_insert_with(|| entry.clone());
                    next.chunks.push((*chunk).clone());
                }
            }
            next.files.insert(record.path.clone(), record);
        }

        for (mut file, chunks) in changed.into_iter().zip(chunked) {
            let mut complete = true;
            for chunk in chunks {
                let entry = if let Some(vector) = outcome.vectors.get(&chunk.content_hash) {
                    Some(EmbeddingEntry {
                        content_hash: chunk.content_hash.clone(),
                        text: file.text[chunk.start_byte..chunk.end_byte].to_string(),
                        vector: vector.clone(),
                    })
                } else if model_changed {
                    None
                } else {
                    previous.lookup(&chunk.content_hash).cloned()
                };
                match entry {
                    Some(entry) => {
                        next.embeddings.entry(chunk.content_hash.clone()).or_insert(entry);
                        next.chunks.push(chunk);
                    }
                    None => {
                        report.failed += 1;
                        complete = false;
                    }
                }
            }
            if !complete {
                // Matches no size, mtime or hash, so the next refresh retries the file.
                file.record.content_hash.clear();
                file.record.mtime_ns = INCOMPLETE_MTIME;
            }
            next.files.insert(file.record.path.clone(), file.record);
        }
        report.chunks = next.chunks.len();

        check_cancelled(cancel)?;
        let committed = self.store.commit(next)?;
        report.generation = committed.generation;
        Ok(report)
    }
}

/// Modification time recorded for a file whose chunks were not all embedded.
const INCOMPLETE_MTIME: i64 = -1;

fn check_cancelled(cancel: &CancelFlag) -> Result<(), IndexError> {
    if cancel.is_cancelled() {
        Err(IndexError::Cancelled)
    } else {
        Ok(())
    }
}

/// Reads a scanned file as UTF-8 text, or `None` if it is binary.
fn read_text_file(file: &ScannedFile) -> Result<Option<(FileRecord, String)>, ScanError> {
    let bytes = fs::read(&file.abs_path).map_err(|source| ScanError::Unreadable {
        path: file.abs_path.clone(),
        source,
    })?;
    if bytes.contains(&0) {
        tracing::debug!(path = %file.path, "skipping binary file");
        return Ok(None);
    }
    let content_hash = hash_bytes(&bytes);
    let size = bytes.len() as u64;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => {
            tracing::debug!(path = %file.path, "skipping non-UTF-8 file");
            return Ok(None);
        }
    };
    let record = FileRecord {
        path: file.path.clone(),
        content_hash,
        size,
        mtime_ns: file.mtime_ns,
    };
    Ok(Some((record, text)))
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible || len == 0 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{bar:40.cyan/blue}] {pos}/{len} chunks | Embedding") {
        pb.set_style(style.progress_chars("##."));
    }
    pb
}

/// 32-hex-char blake3 digest.
pub(crate) fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex()[..32].to_string()
}

fn chunk_id(path: &str, start_byte: usize, end_byte: usize, content_hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(&[0]);
    hasher.update(&(start_byte as u64).to_le_bytes());
    hasher.update(&(end_byte as u64).to_le_bytes());
    hasher.update(content_hash.as_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}
