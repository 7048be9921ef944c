// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded worker pool for embedding computation.
//!
//! Texts are embedded in provider-sized batches on a fixed rayon pool and
//! merged by content hash, so completion order does not matter. A batch that
//! fails is retried one text at a time; texts that still fail, return a bad
//! vector, or exceed the timeout are skipped and counted.

use indicatif::ProgressBar;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::embedding::provider::EmbeddingProvider;
use crate::errors::{EmbedError, IndexError};

/// How often the collector wakes up to check for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cooperative cancellation shared between a caller and a running refresh.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One text to embed, keyed by its content hash.
#[derive(Debug, Clone)]
pub struct EmbedJob {
    pub content_hash: String,
    pub text: String,
}

/// Merged result of an [`EmbedPool::embed_all`] call.
#[derive(Debug, Default)]
pub struct EmbedOutcome {
    pub vectors: HashMap<String, Vec<f32>>,
    /// Texts skipped because the provider failed on them
    pub failed: usize,
    /// Texts skipped because the call took too long
    pub timed_out: usize,
}

struct BatchResult {
    index: usize,
    vectors: Vec<(String, Vec<f32>)>,
    failed: usize,
    timed_out: usize,
}

/// Fixed-size pool that runs embedding batches in parallel.
pub struct EmbedPool {
    pool: ThreadPool,
    workers: usize,
    timeout: Duration,
}

impl EmbedPool {
    pub fn new(workers: usize, timeout: Duration) -> Result<Self, EmbedError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("embed-worker-{}", i))
            .build()
            .map_err(|e| EmbedError::Init(format!("Failed to start embedding workers: {}", e)))?;
        Ok(Self {
            pool,
            workers,
            timeout,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Embeds every job, returning the vectors that succeeded.
    ///
    /// Returns [`IndexError::Cancelled`] as soon as `cancel` is set; results
    /// still in flight are discarded.
    pub fn embed_all(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        jobs: Vec<EmbedJob>,
        cancel: &CancelFlag,
        progress: Option<&ProgressBar>,
    ) -> Result<EmbedOutcome, IndexError> {
        let mut outcome = EmbedOutcome::default();
        if jobs.is_empty() {
            return Ok(outcome);
        }

        let batch_size = provider.batch_size().max(1);
        let mut batches: Vec<Vec<EmbedJob>> = Vec::new();
        let mut iter = jobs.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(iter.by_ref().take(batch_size).collect());
        }
        let mut outstanding: HashMap<usize, usize> =
            batches.iter().enumerate().map(|(i, b)| (i, b.len())).collect();

        let (tx, rx) = mpsc::channel::<BatchResult>();
        for (index, batch) in batches.into_iter().enumerate() {
            let tx = tx.clone();
            let provider = Arc::clone(provider);
            let cancel = cancel.clone();
            let timeout = self.timeout;
            self.pool.spawn(move || {
                if cancel.is_cancelled() {
                    return;
                }
                let result = run_batch(provider.as_ref(), index, batch, timeout);
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let mut last_progress = Instant::now();
        while !outstanding.is_empty() {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => {
                    last_progress = Instant::now();
                    if let Some(count) = outstanding.remove(&result.index) {
                        if let Some(pb) = progress {
                            pb.inc(count as u64);
                        }
                    }
                    outcome.failed += result.failed;
                    outcome.timed_out += result.timed_out;
                    outcome.vectors.extend(result.vectors);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if last_progress.elapsed() >= self.timeout {
                        let stalled: usize = outstanding.values().sum();
                        tracing::warn!(
                            texts = stalled,
                            timeout_ms = self.timeout.as_millis() as u64,
                            "embedding workers stalled; skipping remaining texts"
                        );
                        outcome.timed_out += stalled;
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let lost: usize = outstanding.values().sum();
                    if cancel.is_cancelled() {
                        return Err(IndexError::Cancelled);
                    }
                    tracing::warn!(texts = lost, "embedding workers exited early");
                    outcome.failed += lost;
                    break;
                }
            }
        }

        Ok(outcome)
    }
}

fn run_batch(provider: &dyn EmbeddingProvider, index: usize, batch: Vec<EmbedJob>, timeout: Duration) -> BatchResult {
    let mut result = BatchResult {
        index,
        vectors: Vec::with_capacity(batch.len()),
        failed: 0,
        timed_out: 0,
    };
    let dimension = provider.dimension();
    let texts: Vec<String> = batch.iter().map(|job| job.text.clone()).collect();

    match within(timeout, || provider.embed_texts(&texts)) {
        Ok(vectors) if vectors.len() == batch.len() => {
            for (job, vector) in batch.into_iter().zip(vectors) {
                if is_valid_vector(&vector, dimension) {
                    result.vectors.push((job.content_hash, vector));
                } else {
                    tracing::warn!(hash = %job.content_hash, "embedding has wrong shape; skipping chunk");
                    result.failed += 1;
                }
            }
        }
        Err(err @ EmbedError::Timeout(_)) => {
            tracing::warn!(texts = batch.len(), error = %err, "embedding batch skipped");
            result.timed_out = batch.len();
        }
        Ok(_) | Err(_) if batch.len() > 1 => {
            tracing::debug!(texts = batch.len(), "embedding batch failed; retrying texts individually");
            for job in batch {
                match within(timeout, || provider.embed_one(&job.text)) {
                    Ok(vector) if is_valid_vector(&vector, dimension) => {
                        result.vectors.push((job.content_hash, vector));
                    }
                    Ok(_) => {
                        tracing::warn!(hash = %job.content_hash, "embedding has wrong shape; skipping chunk");
                        result.failed += 1;
                    }
                    Err(err @ EmbedError::Timeout(_)) => {
                        tracing::warn!(hash = %job.content_hash, error = %err, "skipping chunk");
                        result.timed_out += 1;
                    }
                    Err(err) => {
                        tracing::warn!(hash = %job.content_hash, error = %err, "embedding failed; skipping chunk");
                        result.failed += 1;
                    }
                }
            }
        }
        Ok(_) => {
            tracing::warn!("embedding provider returned no vector; skipping chunk");
            result.failed = batch.len();
        }
        Err(err) => {
            tracing::warn!(error = %err, "embedding failed; skipping chunk");
            result.failed = batch.len();
        }
    }

    result
}

/// Runs one provider call, turning a late answer into [`EmbedError::Timeout`].
fn within<T>(timeout: Duration, call: impl FnOnce() -> Result<T, EmbedError>) -> Result<T, EmbedError> {
    let started = Instant::now();
    let value = call()?;
    if started.elapsed() > timeout {
        return Err(EmbedError::Timeout(timeout.as_millis() as u64));
    }
    Ok(value)
}

fn is_valid_vector(vector: &[f32], dimension: usize) -> bool {
    vector.len() == dimension && vector.iter().all(|v| v.is_finite())
}
