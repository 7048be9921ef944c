// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed, per-repository index store.
//!
//! Each repository gets its own directory under the cache root, named by a
//! hash of its canonical path. The committed index lives in `index.sqlite`.
//! A commit writes a complete new database next to it and renames it into
//! place, so readers of the file (and of the in-memory snapshot) only ever see
//! a fully written index.

use rusqlite::{params, Connection, OpenFlags};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::errors::{IndexError, ScanError};

/// Version tag written to every committed index.
pub const FORMAT_VERSION: u32 = 1;

/// Committed index file name inside a repository directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// Lock file serializing refreshes of one repository.
pub const LOCK_FILE: &str = "refresh.lock";

const STAGING_FILE: &str = "index.sqlite.tmp";

/// A file the index was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the repository root, `/`-separated
    pub path: String,
    /// blake3 of the file bytes
    pub content_hash: String,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub mtime_ns: i64,
}

/// A chunk of an indexed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// hash(path, byte range, content hash)
    pub id: String,
    pub path: String,
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: u32,
    pub end_line: u32,
    /// blake3 of the chunk text; key into the embeddings map
    pub content_hash: String,
}

/// A cached embedding, shared by every chunk with the same text.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingEntry {
    pub content_hash: String,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Immutable view of a committed index.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    /// Bumped on every commit that changes content
    pub generation: u64,
    pub model_id: String,
    pub dimension: usize,
    /// Chunker settings the chunks were cut with, see `ChunkConfig::fingerprint`
    pub chunking: String,
    /// Exclude patterns given on the command line, applied to every refresh
    pub excludes: Vec<String>,
    pub files: BTreeMap<String, FileRecord>,
    /// Sorted by (path, start_byte, end_byte)
    pub chunks: Vec<ChunkRecord>,
    pub embeddings: BTreeMap<String, EmbeddingEntry>,
}

impl IndexSnapshot {
    /// Creates an empty snapshot for the given model.
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
            ..Default::default()
        }
    }

    /// Looks up a cached embedding by content hash.
    pub fn lookup(&self, content_hash: &str) -> Option<&EmbeddingEntry> {
        self.embeddings.get(content_hash)
    }

    pub fn chunks_for_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a ChunkRecord> + 'a {
        self.chunks.iter().filter(move |chunk| chunk.path == path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.chunks.is_empty()
    }

    /// Sorts chunks and drops embeddings no chunk refers to.
    pub fn normalize(&mut self) {
        self.chunks.sort_by(|a, b| {
            (a.path.as_str(), a.start_byte, a.end_byte).cmp(&(b.path.as_str(), b.start_byte, b.end_byte))
        });
        self.chunks.dedup_by(|a, b| a.id == b.id);

        let referenced: BTreeSet<&str> = self.chunks.iter().map(|c| c.content_hash.as_str()).collect();
        self.embeddings.retain(|hash, _| referenced.contains(hash.as_str()));
    }

    /// Digest over everything except the generation counter.
    pub fn checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&FORMAT_VERSION.to_le_bytes());
        hash_str(&mut hasher, &self.model_id);
        hasher.update(&(self.dimension as u64).to_le_bytes());
        hash_str(&mut hasher, &self.chunking);
        hasher.update(&(self.excludes.len() as u64).to_le_bytes());
        for pattern in &self.excludes {
            hash_str(&mut hasher, pattern);
        }

        for file in self.files.values() {
            hash_str(&mut hasher, &file.path);
            hash_str(&mut hasher, &file.content_hash);
            hasher.update(&file.size.to_le_bytes());
            hasher.update(&file.mtime_ns.to_le_bytes());
        }
        for chunk in &self.chunks {
            hash_str(&mut hasher, &chunk.id);
            hash_str(&mut hasher, &chunk.path);
            hasher.update(&(chunk.start_byte as u64).to_le_bytes());
            hasher.update(&(chunk.end_byte as u64).to_le_bytes());
            hasher.update(&chunk.start_line.to_le_bytes());
            hasher.update(&chunk.end_line.to_le_bytes());
            hash_str(&mut hasher, &chunk.content_hash);
        }
        for entry in self.embeddings.values() {
            hash_str(&mut hasher, &entry.content_hash);
            hash_str(&mut hasher, &entry.text);
            hasher.update(&embedding_to_blob(&entry.vector));
        }

        hasher.finalize().to_hex().to_string()
    }

    /// Checks that every chunk has a file record and an embedding.
    pub fn validate(&self) -> Result<(), String> {
        for chunk in &self.chunks {
            if !self.files.contains_key(&chunk.path) {
                return Err(format!("chunk {} belongs to unknown file {}", chunk.id, chunk.path));
            }
            match self.embeddings.get(&chunk.content_hash) {
                None => {
                    return Err(format!("chunk {} has no embedding {}", chunk.id, chunk.content_hash))
                }
                Some(entry) if entry.vector.len() != self.dimension => {
                    return Err(format!(
                        "embedding {} has dimension {}, expected {}",
                        entry.content_hash,
                        entry.vector.len(),
                        self.dimension
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn hash_str(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Stable identifier for a repository: a hash of its canonical root path.
pub fn repo_id(canonical_root: &Path) -> String {
    let hash = blake3::hash(canonical_root.to_string_lossy().as_bytes());
    hash.to_hex()[..32].to_string()
}

/// Holds the refresh lock for a repository until dropped.
#[derive(Debug)]
pub struct RefreshLock {
    _file: File,
    path: PathBuf,
}

impl RefreshLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Persistent index for one repository.
pub struct IndexStore {
    repo_root: PathBuf,
    repo_id: String,
    dir: PathBuf,
    current: RwLock<Arc<IndexSnapshot>>,
    needs_rebuild: AtomicBool,
}

impl IndexStore {
    /// Opens the store for `repo_root` under `cache_root`, loading the
    /// committed index if there is one.
    ///
    /// A corrupt index is not an error here: the store starts empty and
    /// [`needs_rebuild`](Self::needs_rebuild) reports true.
    pub fn open(cache_root: impl AsRef<Path>, repo_root: impl AsRef<Path>) -> Result<Self, IndexError> {
        let repo_root = repo_root.as_ref();
        let canonical = repo_root
            .canonicalize()
            .map_err(|_| ScanError::MissingRoot(repo_root.to_path_buf()))?;
        let repo_id = repo_id(&canonical);
        let dir = cache_root.as_ref().join(&repo_id);
        fs::create_dir_all(&dir)?;

        let store = Self {
            repo_root: canonical,
            repo_id,
            dir,
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
            needs_rebuild: AtomicBool::new(false),
        };

        match store.load() {
            Ok(snapshot) => {
                tracing::debug!(
                    repo = %store.repo_root.display(),
                    generation = snapshot.generation,
                    files = snapshot.files.len(),
                    "loaded committed index"
                );
                store.swap(snapshot);
            }
            Err(IndexError::Corruption { path, reason }) => {
                tracing::warn!(path = %path.display(), %reason, "discarding corrupt index; a full rebuild is required");
                store.needs_rebuild.store(true, Ordering::SeqCst);
            }
            Err(err) => return Err(err),
        }

        Ok(store)
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    /// Directory holding this repository's index.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// True when the committed index was unreadable and must be rebuilt.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::SeqCst)
    }

    /// Current committed snapshot. Cheap; never blocks on a refresh.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    fn swap(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&snapshot);
        snapshot
    }

    /// Takes the refresh lock without blocking.
    pub fn try_lock(&self) -> Result<RefreshLock, IndexError> {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        match file.try_lock() {
            Ok(()) => Ok(RefreshLock { _file: file, path }),
            Err(TryLockError::WouldBlock) => Err(IndexError::LockContention(path)),
            Err(TryLockError::Error(err)) => Err(IndexError::Io(err)),
        }
    }

    /// Reads the committed index from disk.
    pub fn load(&self) -> Result<IndexSnapshot, IndexError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(IndexSnapshot::default());
        }
        read_index(&path).map_err(|reason| IndexError::Corruption { path, reason })
    }

    /// Atomically replaces the committed index.
    ///
    /// Either the new index is fully written and visible afterwards, or the
    /// previous one is left untouched on disk and in memory.
    pub fn commit(&self, mut snapshot: IndexSnapshot) -> Result<Arc<IndexSnapshot>, IndexError> {
        snapshot.normalize();
        snapshot
            .validate()
            .map_err(|reason| IndexError::Corruption {
                path: self.dir.join(STAGING_FILE),
                reason,
            })?;

        let current = self.snapshot();
        let checksum = snapshot.checksum();
        if !self.needs_rebuild() && self.index_path().exists() && checksum == current.checksum() {
            tracing::debug!(generation = current.generation, "index content unchanged; keeping committed file");
            return Ok(current);
        }
        snapshot.generation = current.generation + 1;

        let staging = self.dir.join(STAGING_FILE);
        if let Err(err) = self.write_staged(&staging, &snapshot, &checksum) {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        if let Err(err) = fs::rename(&staging, self.index_path()) {
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        self.needs_rebuild.store(false, Ordering::SeqCst);
        tracing::info!(
            generation = snapshot.generation,
            files = snapshot.files.len(),
            chunks = snapshot.chunks.len(),
            embeddings = snapshot.embeddings.len(),
            "committed index"
        );
        Ok(self.swap(snapshot))
    }

    fn write_staged(&self, staging: &Path, snapshot: &IndexSnapshot, checksum: &str) -> Result<(), IndexError> {
        if staging.exists() {
            fs::remove_file(staging)?;
        }

        let mut conn = Connection::open(staging)?;
        conn.execute_batch(SCHEMA)?;

        let tx = conn.transaction()?;
        {
            let mut meta = tx.prepare("INSERT INTO meta (key, value) VALUES (?1, ?2)")?;
            meta.execute(params!["format_version", FORMAT_VERSION.to_string()])?;
            meta.execute(params!["model_id", snapshot.model_id])?;
            meta.execute(params!["dimension", snapshot.dimension.to_string()])?;
            meta.execute(params!["chunking", snapshot.chunking])?;
            let excludes = serde_json::to_string(&snapshot.excludes)
                .map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
            meta.execute(params!["excludes", excludes])?;
            meta.execute(params!["generation", snapshot.generation.to_string()])?;
            meta.execute(params!["checksum", checksum])?;
            meta.execute(params!["repo_root", self.repo_root.to_string_lossy().to_string()])?;

            let mut files = tx.prepare(
                "INSERT INTO files (path, content_hash, size, mtime_ns) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for file in snapshot.files.values() {
                files.execute(params![file.path, file.content_hash, file.size as i64, file.mtime_ns])?;
            }

            let mut chunks = tx.prepare(
                r#"
                INSERT INTO chunks (chunk_id, path, start_byte, end_byte, start_line, end_line, content_hash)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for chunk in &snapshot.chunks {
                chunks.execute(params![
                    chunk.id,
                    chunk.path,
                    chunk.start_byte as i64,
                    chunk.end_byte as i64,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.content_hash
                ])?;
            }

            let mut embeddings = tx.prepare(
                "INSERT INTO embeddings (content_hash, text, embedding) VALUES (?1, ?2, ?3)",
            )?;
            for entry in snapshot.embeddings.values() {
                embeddings.execute(params![
                    entry.content_hash,
                    entry.text,
                    embedding_to_blob(&entry.vector)
                ])?;
            }
        }
        tx.commit()?;
        conn.close().map_err(|(_, e)| e)?;

        File::open(staging)?.sync_all()?;
        Ok(())
    }

    /// Deletes the committed index for this repository.
    pub fn clear(&self) -> Result<(), IndexError> {
        let path = self.index_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        self.swap(IndexSnapshot::default());
        self.needs_rebuild.store(false, Ordering::SeqCst);
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE files (
    path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime_ns INTEGER NOT NULL
);

CREATE TABLE chunks (
    chunk_id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    start_byte INTEGER NOT NULL,
    end_byte INTEGER NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    content_hash TEXT NOT NULL
);

CREATE INDEX idx_chunks_path ON chunks(path, start_byte);

CREATE TABLE embeddings (
    content_hash TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL
);
"#;

fn read_index(path: &Path) -> Result<IndexSnapshot, String> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| format!("cannot open database: {}", e))?;
    read_tables(&conn).map_err(|e| format!("cannot read tables: {}", e))?
}

fn read_tables(conn: &Connection) -> rusqlite::Result<Result<IndexSnapshot, String>> {
    let mut meta = BTreeMap::new();
    {
        let mut stmt = conn.prepare("SELECT key, value FROM meta")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (key, value) = row?;
            meta.insert(key, value);
        }
    }

    let version = meta.get("format_version").cloned().unwrap_or_default();
    if version != FORMAT_VERSION.to_string() {
        return Ok(Err(format!(
            "format version '{}' does not match {}",
            version, FORMAT_VERSION
        )));
    }
    let dimension: usize = match meta.get("dimension").and_then(|d| d.parse().ok()) {
        Some(d) => d,
        None => return Ok(Err("missing dimension".to_string())),
    };

    let mut snapshot = IndexSnapshot {
        generation: meta.get("generation").and_then(|g| g.parse().ok()).unwrap_or(0),
        model_id: meta.get("model_id").cloned().unwrap_or_default(),
        dimension,
        chunking: meta.get("chunking").cloned().unwrap_or_default(),
        ..Default::default()
    };
    if let Some(raw) = meta.get("excludes") {
        match serde_json::from_str(raw) {
            Ok(excludes) => snapshot.excludes = excludes,
            Err(e) => return Ok(Err(format!("unreadable exclude list: {}", e))),
        }
    }

    {
        let mut stmt = conn.prepare("SELECT path, content_hash, size, mtime_ns FROM files ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            Ok(FileRecord {
                path: row.get(0)?,
                content_hash: row.get(1)?,
                size: row.get::<_, i64>(2)? as u64,
                mtime_ns: row.get(3)?,
            })
        })?;
        for row in rows {
            let record = row?;
            snapshot.files.insert(record.path.clone(), record);
        }
    }

    {
        let mut stmt = conn.prepare(
            r#"
            SELECT chunk_id, path, start_byte, end_byte, start_line, end_line, content_hash
            FROM chunks
            ORDER BY path, start_byte, end_byte
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ChunkRecord {
                id: row.get(0)?,
                path: row.get(1)?,
                start_byte: row.get::<_, i64>(2)? as usize,
                end_byte: row.get::<_, i64>(3)? as usize,
                start_line: row.get(4)?,
                end_line: row.get(5)?,
                content_hash: row.get(6)?,
            })
        })?;
        snapshot.chunks = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    }

    {
        let mut stmt = conn.prepare("SELECT content_hash, text, embedding FROM embeddings")?;
        let rows = stmt.query_map([], |row| {
            let blob: Vec<u8> = row.get(2)?;
            Ok(EmbeddingEntry {
                content_hash: row.get(0)?,
                text: row.get(1)?,
                vector: blob_to_embedding(&blob),
            })
        })?;
        for row in rows {
            let entry = row?;
            snapshot.embeddings.insert(entry.content_hash.clone(), entry);
        }
    }

    if let Err(reason) = snapshot.validate() {
        return Ok(Err(reason));
    }
    let stored = meta.get("checksum").cloned().unwrap_or_default();
    if stored != snapshot.checksum() {
        return Ok(Err("checksum mismatch".to_string()));
    }

    Ok(Ok(snapshot))
}

/// Converts an embedding vector to a compact blob.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Converts a blob back to an embedding vector.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_snapshot() -> IndexSnapshot {
        let mut snapshot = IndexSnapshot::new("test-model", 3);
        snapshot.files.insert(
            "src/a.rs".to_string(),
            FileRecord {
                path: "src/a.rs".to_string(),
                content_hash: "fa".to_string(),
                size: 10,
                mtime_ns: 1_000,
            },
        );
        snapshot.chunks.push(ChunkRecord {
            id: "c1".to_string(),
            path: "src/a.rs".to_string(),
            start_byte: 0,
            end_byte: 10,
            start_line: 1,
            end_line: 1,
            content_hash: "h1".to_string(),
        });
        snapshot.embeddings.insert(
            "h1".to_string(),
            EmbeddingEntry {
                content_hash: "h1".to_string(),
                text: "fn a() {}\n".to_string(),
                vector: vec![1.0, 0.0, 0.0],
            },
        );
        snapshot
    }

    #[test]
    fn test_open_empty_store() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let store = IndexStore::open(cache.path(), repo.path()).unwrap();
        assert!(store.snapshot().is_empty());
        assert!(!store.needs_rebuild());
        assert!(store.dir().starts_with(cache.path()));
        assert_eq!(store.repo_id().len(), 32);
    }

    #[test]
    fn test_commit_and_reload() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let store = IndexStore::open(cache.path(), repo.path()).unwrap();

        let mut sample = sample_snapshot();
        sample.chunking = "1500/200/30".to_string();
        sample.excludes = vec!["secret/".to_string(), "*.gen.rs".to_string()];
        let committed = store.commit(sample).unwrap();
        assert_eq!(committed.generation, 1);
        assert!(store.index_path().exists());

        let reopened = IndexStore::open(cache.path(), repo.path()).unwrap();
        let snapshot = reopened.snapshot();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(snapshot.lookup("h1").unwrap().vector, vec![1.0, 0.0, 0.0]);
        assert_eq!(snapshot.checksum(), committed.checksum());
        assert_eq!(snapshot.chunking, "1500/200/30");
        assert_eq!(snapshot.excludes, vec!["secret/".to_string(), "*.gen.rs".to_string()]);
    }

    #[test]
    fn test_settings_change_creates_new_generation() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let store = IndexStore::open(cache.path(), repo.path()).unwrap();
        store.commit(sample_snapshot()).unwrap();

        let mut excluded = sample_snapshot();
        excluded.excludes = vec!["vendor/".to_string()];
        assert_eq!(store.commit(excluded).unwrap().generation, 2);

        let mut rechunked = sample_snapshot();
        rechunked.excludes = vec!["vendor/".to_string()];
        rechunked.chunking = "800/100/30".to_string();
        assert_eq!(store.commit(rechunked).unwrap().generation, 3);
    }

    #[test]
    fn test_unchanged_commit_keeps_generation() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let store = IndexStore::open(cache.path(), repo.path()).unwrap();

        store.commit(sample_snapshot()).unwrap();
        let again = store.commit(sample_snapshot()).unwrap();
        assert_eq!(again.generation, 1);
    }

    #[test]
    fn test_snapshot_survives_commit() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let store = IndexStore::open(cache.path(), repo.path()).unwrap();
        store.commit(sample_snapshot()).unwrap();

        let held = store.snapshot();
        store.commit(IndexSnapshot::new("test-model", 3)).unwrap();

        assert_eq!(held.files.len(), 1);
        assert!(store.snapshot().files.is_empty());
    }

    #[test]
    fn test_inconsistent_snapshot_is_rejected() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let store = IndexStore::open(cache.path(), repo.path()).unwrap();
        store.commit(sample_snapshot()).unwrap();
        let before = std::fs::read(store.index_path()).unwrap();

        let mut broken = sample_snapshot();
        broken.files.clear();
        assert!(matches!(store.commit(broken), Err(IndexError::Corruption { .. })));

        assert_eq!(std::fs::read(store.index_path()).unwrap(), before);
        assert_eq!(store.snapshot().files.len(), 1);
        assert!(!store.dir().join(STAGING_FILE).exists());
    }

    #[test]
    fn test_unreferenced_embeddings_are_collected() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let store = IndexStore::open(cache.path(), repo.path()).unwrap();

        let mut snapshot = sample_snapshot();
        snapshot.embeddings.insert(
            "orphan".to_string(),
            EmbeddingEntry {
                content_hash: "orphan".to_string(),
                text: "unused".to_string(),
                vector: vec![0.0, 1.0, 0.0],
            },
        );
        let committed = store.commit(snapshot).unwrap();
        assert!(committed.lookup("orphan").is_none());
        assert!(committed.lookup("h1").is_some());
    }

    #[test]
    fn test_corrupt_index_requests_rebuild() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        {
            let store = IndexStore::open(cache.path(), repo.path()).unwrap();
            store.commit(sample_snapshot()).unwrap();
            let conn = Connection::open(store.index_path()).unwrap();
            conn.execute("UPDATE embeddings SET text = 'tampered'", []).unwrap();
        }

        let store = IndexStore::open(cache.path(), repo.path()).unwrap();
        assert!(store.needs_rebuild());
        assert!(store.snapshot().is_empty());
        assert!(matches!(store.load(), Err(IndexError::Corruption { .. })));
    }

    #[test]
    fn test_garbage_file_is_corruption() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let store = IndexStore::open(cache.path(), repo.path()).unwrap();
        std::fs::write(store.index_path(), b"definitely not sqlite").unwrap();
        assert!(matches!(store.load(), Err(IndexError::Corruption { .. })));
    }

    #[test]
    fn test_repositories_do_not_share_storage() {
        let cache = tempdir().unwrap();
        let repo_a = tempdir().unwrap();
        let repo_b = tempdir().unwrap();
        let a = IndexStore::open(cache.path(), repo_a.path()).unwrap();
        let b = IndexStore::open(cache.path(), repo_b.path()).unwrap();
        assert_ne!(a.repo_id(), b.repo_id());
        assert_ne!(a.index_path(), b.index_path());

        a.commit(sample_snapshot()).unwrap();
        assert!(b.snapshot().is_empty());
        assert!(!b.index_path().exists());
    }

    #[test]
    fn test_lock_is_exclusive() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let first = IndexStore::open(cache.path(), repo.path()).unwrap();
        let second = IndexStore::open(cache.path(), repo.path()).unwrap();

        let guard = first.try_lock().unwrap();
        assert!(matches!(second.try_lock(), Err(IndexError::LockContention(_))));
        drop(guard);
        assert!(second.try_lock().is_ok());
    }

    #[test]
    fn test_clear() {
        let cache = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let store = IndexStore::open(cache.path(), repo.path()).unwrap();
        store.commit(sample_snapshot()).unwrap();
        store.clear().unwrap();
        assert!(!store.index_path().exists());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_blob_roundtrip_preserves_values() {
        let vector = vec![0.5f32, -1.25, 3.0];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&vector)), vector);
    }
}
