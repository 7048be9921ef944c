// SPDX-License-Identifier: MIT OR Apache-2.0

//! File scanner using the ignore crate (same as ripgrep)

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::{DirEntry, WalkBuilder, WalkState};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::config::IndexConfig;
use crate::errors::ScanError;

/// Repository-level ignore file, gitignore syntax.
pub const IGNORE_FILE: &str = ".discoverignore";

/// Default size ceiling for indexed files.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Extensions that are never worth reading as text.
const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd", "svgz",
    // archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "zst", "7z", "rar", "jar", "war",
    // executables and objects
    "exe", "dll", "so", "dylib", "a", "lib", "o", "obj", "bin", "wasm", "class",
    // compiled bytecode
    "pyc", "pyo", "beam", "rlib",
    // fonts
    "ttf", "otf", "woff", "woff2", "eot",
    // media
    "mp3", "mp4", "wav", "flac", "ogg", "avi", "mov", "mkv", "webm",
    // documents and data
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    "sqlite", "sqlite3", "db", "parquet", "arrow", "npy", "npz", "pkl", "onnx",
];

/// What the scanner includes.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_file_size: u64,
    pub respect_gitignore: bool,
    /// Extra gitignore-style patterns, relative to the root
    pub exclude_patterns: Vec<String>,
    /// Directory that is never descended into (the index cache)
    pub skip_dir: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            respect_gitignore: true,
            exclude_patterns: Vec::new(),
            skip_dir: None,
        }
    }
}

impl ScanOptions {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            max_file_size: config.max_file_size(),
            respect_gitignore: config.respect_gitignore(),
            exclude_patterns: config.exclude_paths().to_vec(),
            skip_dir: Some(config.cache_dir()),
        }
    }
}

/// A file eligible for indexing. Metadata only; content is read later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the root, `/`-separated
    pub path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    pub mtime_ns: i64,
}

/// File scanner that respects .gitignore
pub struct FileScanner {
    root: PathBuf,
    options: ScanOptions,
    excludes: Arc<Gitignore>,
}

impl FileScanner {
    /// Builds a scanner, compiling the extra patterns up front.
    pub fn new(root: impl AsRef<Path>, options: ScanOptions) -> Result<Self, ScanError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ScanError::MissingRoot(root.to_path_buf()));
        }
        let root = root
            .canonicalize()
            .map_err(|_| ScanError::MissingRoot(root.to_path_buf()))?;
        let excludes = compile_patterns(&root, &options.exclude_patterns)?;
        Ok(Self {
            root,
            options,
            excludes: Arc::new(excludes),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the root and returns eligible files sorted by path.
    pub fn scan(&self) -> Vec<ScannedFile> {
        let (tx, rx) = mpsc::channel();

        let excludes = Arc::clone(&self.excludes);
        let skip_dir = self
            .options
            .skip_dir
            .as_ref()
            .map(|dir| dir.canonicalize().unwrap_or_else(|_| dir.clone()));
        let respect_gitignore = self.options.respect_gitignore;

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(respect_gitignore)
            .git_exclude(respect_gitignore)
            .git_global(false)
            .require_git(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                if let Some(skip) = &skip_dir {
                    if entry.path().starts_with(skip) {
                        return false;
                    }
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                !excludes.matched(entry.path(), is_dir).is_ignore()
            })
            .build_parallel();

        let root = self.root.clone();
        let max_file_size = self.options.max_file_size;

        walker.run(|| {
            let tx = tx.clone();
            let root = root.clone();

            Box::new(move |entry| {
                match entry {
                    Ok(entry) => {
                        if let Some(file) = inspect(&root, &entry, max_file_size) {
                            let _ = tx.send(file);
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "skipping unreadable entry");
                    }
                }
                WalkState::Continue
            })
        });

        drop(tx);
        let mut files: Vec<ScannedFile> = rx.into_iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

fn inspect(root: &Path, entry: &DirEntry, max_file_size: u64) -> Option<ScannedFile> {
    if !entry.file_type().is_some_and(|t| t.is_file()) {
        return None;
    }
    let path = entry.path();
    if is_binary_extension(path) {
        return None;
    }
    let metadata = match entry.metadata() {
        Ok(metadata) => metadata,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "skipping file without metadata");
            return None;
        }
    };
    if metadata.len() > max_file_size {
        tracing::debug!(path = %path.display(), size = metadata.len(), "skipping oversized file");
        return None;
    }
    let mtime_ns = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);

    Some(ScannedFile {
        path: relative_path(root, path)?,
        abs_path: path.to_path_buf(),
        size: metadata.len(),
        mtime_ns,
    })
}

fn compile_patterns(root: &Path, patterns: &[String]) -> Result<Gitignore, ScanError> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        let line = pattern.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        builder
            .add_line(None, line)
            .map_err(|e| ScanError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
    }
    builder.build().map_err(|e| ScanError::InvalidPattern {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}

fn is_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            BINARY_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Root-relative, `/`-separated form of `path`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn paths(files: &[ScannedFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn skips_hidden_and_binary() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        write(dir.path(), ".secret/env.txt", "token\n");
        write(dir.path(), ".hidden.py", "x = 1\n");
        write(dir.path(), "logo.png", "not really a png");

        let scanner = FileScanner::new(dir.path(), ScanOptions::default()).unwrap();
        let files = scanner.scan();
        assert_eq!(paths(&files), vec!["src/main.rs"]);
        assert!(files[0].size > 0);
        assert!(files[0].mtime_ns > 0);
    }

    #[test]
    fn skips_oversized_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "big.txt", &"a".repeat(2 * 1024 * 1024));
        write(dir.path(), "small.txt", "hello world\n");

        let scanner = FileScanner::new(dir.path(), ScanOptions::default()).unwrap();
        assert_eq!(paths(&scanner.scan()), vec!["small.txt"]);
    }

    #[test]
    fn honours_gitignore_and_ignore_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".gitignore", "target/\n");
        write(dir.path(), IGNORE_FILE, "# generated\n*.gen.rs\n");
        write(dir.path(), "target/out.rs", "fn a() {}\n");
        write(dir.path(), "src/api.gen.rs", "fn b() {}\n");
        write(dir.path(), "src/lib.rs", "fn c() {}\n");

        let scanner = FileScanner::new(dir.path(), ScanOptions::default()).unwrap();
        assert_eq!(paths(&scanner.scan()), vec!["src/lib.rs"]);

        let options = ScanOptions {
            respect_gitignore: false,
            ..ScanOptions::default()
        };
        let scanner = FileScanner::new(dir.path(), options).unwrap();
        assert_eq!(paths(&scanner.scan()), vec!["src/lib.rs", "target/out.rs"]);
    }

    #[test]
    fn extra_patterns_support_negation_and_scoping() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "logs/a.log", "a\n");
        write(dir.path(), "keep.log", "k\n");
        write(dir.path(), "drop.log", "d\n");
        write(dir.path(), "build/x.rs", "x\n");
        write(dir.path(), "src/build/y.rs", "y\n");

        let options = ScanOptions {
            exclude_patterns: vec![
                "*.log".to_string(),
                "!keep.log".to_string(),
                "/build/".to_string(),
            ],
            ..ScanOptions::default()
        };
        let scanner = FileScanner::new(dir.path(), options).unwrap();
        assert_eq!(paths(&scanner.scan()), vec!["keep.log", "src/build/y.rs"]);
    }

    #[test]
    fn skips_cache_dir_inside_root() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "cache/abc/index.txt", "cached\n");
        write(dir.path(), "app.py", "print('hi')\n");

        let options = ScanOptions {
            skip_dir: Some(dir.path().join("cache")),
            ..ScanOptions::default()
        };
        let scanner = FileScanner::new(dir.path(), options).unwrap();
        assert_eq!(paths(&scanner.scan()), vec!["app.py"]);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let dir = TempDir::new().unwrap();
        let options = ScanOptions {
            exclude_patterns: vec!["src/[".to_string()],
            ..ScanOptions::default()
        };
        let err = FileScanner::new(dir.path(), options).err().unwrap();
        assert!(matches!(err, ScanError::InvalidPattern { .. }));
    }

    #[test]
    fn missing_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = FileScanner::new(dir.path().join("nope"), ScanOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::MissingRoot(_)));
    }

    #[test]
    fn relative_path_uses_forward_slashes() {
        let root = Path::new("/repo");
        assert_eq!(
            relative_path(root, &root.join("a").join("b.rs")).as_deref(),
            Some("a/b.rs")
        );
        assert_eq!(relative_path(root, root), None);
    }
}
