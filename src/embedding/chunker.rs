// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text chunker for embedding generation.
//!
//! Files are cut at top-level definition boundaries when a tree-sitter
//! grammar is available for their language. Everything else, and any
//! structural unit that exceeds the size budget, is split with line-aligned
//! sliding windows that overlap by a configurable number of bytes.
//!
//! Chunking only depends on the file content and its extension, so identical
//! content always produces identical chunk boundaries.

use anyhow::{bail, Result};

use crate::parser::{definition_starts, detect_language};

/// Default maximum chunk size in bytes.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 1500;

/// Default overlap between consecutive windows in bytes.
pub const DEFAULT_OVERLAP_BYTES: usize = 200;

/// Minimum chunk size in characters (chunks smaller than this are skipped).
pub const MIN_CHUNK_SIZE: usize = 30;

/// Configuration for the text chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Target maximum bytes per chunk.
    pub max_chunk_bytes: usize,
    /// Bytes at the end of a window that the next window may repeat.
    pub overlap_bytes: usize,
    /// Minimum trimmed chunk size in bytes.
    pub min_chunk_bytes: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            overlap_bytes: DEFAULT_OVERLAP_BYTES,
            min_chunk_bytes: MIN_CHUNK_SIZE,
        }
    }
}

impl ChunkConfig {
    /// Creates a new ChunkConfig with the specified parameters.
    pub fn new(max_chunk_bytes: usize, overlap_bytes: usize) -> Result<Self> {
        if max_chunk_bytes == 0 {
            bail!("max_chunk_bytes must be greater than 0");
        }
        if overlap_bytes >= max_chunk_bytes {
            bail!(
                "overlap_bytes ({}) must be less than max_chunk_bytes ({})",
                overlap_bytes,
                max_chunk_bytes
            );
        }
        Ok(Self {
            max_chunk_bytes,
            overlap_bytes,
            ..Default::default()
        })
    }

    /// Sets the minimum chunk size.
    pub fn with_min_chunk_bytes(mut self, size: usize) -> Self {
        self.min_chunk_bytes = size;
        self
    }

    /// Compact form stored with an index; chunks cut with a different
    /// fingerprint are recut on the next refresh.
    pub fn fingerprint(&self) -> String {
        format!("{}/{}/{}", self.max_chunk_bytes, self.overlap_bytes, self.min_chunk_bytes)
    }
}

/// A chunk of file text and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Byte offset of the first byte.
    pub start_byte: usize,
    /// Byte offset one past the last byte.
    pub end_byte: usize,
    /// Starting line number (1-indexed).
    pub start_line: u32,
    /// Ending line number (1-indexed, inclusive).
    pub end_line: u32,
    /// The chunk text content.
    pub text: String,
}

/// Splits file text into chunks for embedding generation.
pub struct EmbeddingChunker {
    config: ChunkConfig,
}

impl EmbeddingChunker {
    /// Creates a new chunker with the given configuration.
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Creates a chunker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Splits a file into chunks, structurally when its language is known.
    pub fn chunk_file(&self, path: &str, content: &str) -> Vec<TextChunk> {
        if content.is_empty() {
            return Vec::new();
        }

        let spans = match detect_language(path).and_then(|lang| definition_starts(content, lang)) {
            Some(starts) if !starts.is_empty() => self.structural_spans(content, &starts),
            _ => self.window_spans(content, 0, content.len()),
        };

        self.build_chunks(content, spans)
    }

    /// Splits text with sliding windows only, ignoring structure.
    pub fn chunk_text(&self, content: &str) -> Vec<TextChunk> {
        if content.is_empty() {
            return Vec::new();
        }
        let spans = self.window_spans(content, 0, content.len());
        self.build_chunks(content, spans)
    }

    /// Cuts at definition starts, then merges neighbours greedily up to the budget.
    fn structural_spans(&self, content: &str, starts: &[usize]) -> Vec<(usize, usize)> {
        let max = self.config.max_chunk_bytes;

        let mut cuts = Vec::with_capacity(starts.len() + 2);
        cuts.push(0);
        cuts.extend(starts.iter().copied().filter(|&s| s < content.len()));
        cuts.push(content.len());

        let mut spans = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        for pair in cuts.windows(2) {
            let (seg_start, seg_end) = (pair[0], pair[1]);
            if seg_start >= seg_end {
                continue;
            }
            current = match current {
                Some((start, _)) if seg_end - start <= max => Some((start, seg_end)),
                Some(done) => {
                    self.flush_segment(content, done, &mut spans);
                    Some((seg_start, seg_end))
                }
                None => Some((seg_start, seg_end)),
            };
        }

        if let Some(done) = current {
            self.flush_segment(content, done, &mut spans);
        }

        spans
    }

    fn flush_segment(&self, content: &str, (start, end): (usize, usize), spans: &mut Vec<(usize, usize)>) {
        if end - start > self.config.max_chunk_bytes {
            spans.extend(self.window_spans(content, start, end));
        } else {
            spans.push((start, end));
        }
    }

    /// Line-aligned sliding windows over `content[start..end]`.
    ///
    /// The next window begins at the first line that starts within the last
    /// `overlap_bytes` of the previous one, unless that would leave the next
    /// window unable to grow past the previous end, in which case it starts
    /// right after it. Lines longer than the budget are hard-split.
    fn window_spans(&self, content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let max = self.config.max_chunk_bytes;
        let overlap = self.config.overlap_bytes;
        let lines = line_ranges(content, start, end);

        let mut spans = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let (line_start, line_end) = lines[i];

            if line_end - line_start > max {
                hard_split(content, line_start, line_end, max, &mut spans);
                i += 1;
                continue;
            }

            let mut j = i;
            while j < lines.len() && lines[j].1 - line_start <= max {
                j += 1;
            }
            let window_end = lines[j - 1].1;
            spans.push((line_start, window_end));

            if j >= lines.len() {
                break;
            }

            let overlap_from = window_end.saturating_sub(overlap);
            let mut next = (i + 1..j)
                .find(|&k| lines[k].0 >= overlap_from)
                .unwrap_or(j);
            if lines[j].1 - lines[next].0 > max {
                next = j;
            }
            i = next;
        }

        spans
    }

    fn build_chunks(&self, content: &str, spans: Vec<(usize, usize)>) -> Vec<TextChunk> {
        let newlines: Vec<usize> = content
            .bytes()
            .enumerate()
            .filter(|&(_, b)| b == b'\n')
            .map(|(idx, _)| idx)
            .collect();
        let line_of = |offset: usize| newlines.partition_point(|&nl| nl < offset) as u32 + 1;

        spans
            .into_iter()
            .filter(|&(start, end)| content[start..end].trim().len() >= self.config.min_chunk_bytes)
            .map(|(start, end)| {
                let text = &content[start..end];
                let last = start + text.trim_end_matches('\n').len().max(1) - 1;
                TextChunk {
                    start_byte: start,
                    end_byte: end,
                    start_line: line_of(start),
                    end_line: line_of(last),
                    text: text.to_string(),
                }
            })
            .collect()
    }
}

/// Byte ranges of lines in `content[start..end]`, each including its newline.
fn line_ranges(content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut lines = Vec::new();
    let mut line_start = start;
    for (idx, byte) in content.as_bytes()[start..end].iter().enumerate() {
        if *byte == b'\n' {
            let line_end = start + idx + 1;
            lines.push((line_start, line_end));
            line_start = line_end;
        }
    }
    if line_start < end {
        lines.push((line_start, end));
    }
    lines
}

fn hard_split(content: &str, start: usize, end: usize, max: usize, spans: &mut Vec<(usize, usize)>) {
    let mut pos = start;
    while pos < end {
        let mut cut = (pos + max).min(end);
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut <= pos {
            // Budget smaller than one character: take the whole character.
            cut = pos + content[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
        }
        spans.push((pos, cut));
        pos = cut;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(count: usize) -> String {
        (1..=count).map(|i| format!("line number {:03}\n", i)).collect()
    }

    #[test]
    fn test_default_config() {
        let config = ChunkConfig::default();
        assert_eq!(config.max_chunk_bytes, 1500);
        assert_eq!(config.overlap_bytes, 200);
        assert_eq!(config.fingerprint(), "1500/200/30");
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkConfig::new(1000, 100).is_ok());
        assert!(ChunkConfig::new(100, 100).is_err());
        assert!(ChunkConfig::new(100, 300).is_err());
        assert!(ChunkConfig::new(0, 0).is_err());
    }

    #[test]
    fn test_empty_content() {
        let chunker = EmbeddingChunker::with_defaults();
        assert!(chunker.chunk_file("a.py", "").is_empty());
        assert!(chunker.chunk_text("").is_empty());
    }

    #[test]
    fn small_file_is_one_chunk() {
        let chunker = EmbeddingChunker::new(ChunkConfig::default().with_min_chunk_bytes(1));
        let chunks = chunker.chunk_file("notes.txt", "hello world\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_byte, 0);
        assert_eq!(chunks[0].end_byte, 12);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
    }

    #[test]
    fn windows_overlap_and_cover_everything() {
        // Each line is 16 bytes.
        let content = numbered_lines(20);
        let chunker = EmbeddingChunker::new(ChunkConfig::new(64, 16).unwrap().with_min_chunk_bytes(1));
        let chunks = chunker.chunk_text(&content);

        // 4 lines per window, one line of overlap.
        let starts: Vec<u32> = chunks.iter().map(|c| c.start_line).collect();
        assert_eq!(starts, vec![1, 4, 7, 10, 13, 16, 19]);
        assert_eq!(chunks[0].end_line, 4);
        assert_eq!(chunks.last().unwrap().end_line, 20);
        assert_eq!(chunks.last().unwrap().end_byte, content.len());

        for pair in chunks.windows(2) {
            assert!(pair[1].start_byte < pair[0].end_byte, "windows must overlap");
            assert!(pair[1].end_byte > pair[0].end_byte, "windows must advance");
        }
    }

    #[test]
    fn chunk_text_matches_byte_range() {
        let content = numbered_lines(50);
        let chunker = EmbeddingChunker::new(ChunkConfig::new(200, 40).unwrap().with_min_chunk_bytes(1));
        for chunk in chunker.chunk_text(&content) {
            assert_eq!(chunk.text, &content[chunk.start_byte..chunk.end_byte]);
            assert!(chunk.text.len() <= 200);
        }
    }

    #[test]
    fn long_line_is_hard_split_on_char_boundaries() {
        let content = "é".repeat(100); // 200 bytes, no newline
        let chunker = EmbeddingChunker::new(ChunkConfig::new(33, 0).unwrap().with_min_chunk_bytes(1));
        let chunks = chunker.chunk_text(&content);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.len() <= 33));
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn python_is_split_at_definitions() {
        let content = "\
import hashlib

def login(username, password):
    digest = hashlib.sha256(password.encode()).hexdigest()
    return check_credentials(username, digest)

def logout(session):
    session.invalidate()
    return True
";
        let chunker = EmbeddingChunker::new(ChunkConfig::new(90, 10).unwrap().with_min_chunk_bytes(1));
        let chunks = chunker.chunk_file("auth.py", content);

        assert!(chunks.iter().any(|c| c.text.starts_with("def login")));
        assert!(chunks.iter().any(|c| c.text.starts_with("def logout")));
        let logout = chunks.iter().find(|c| c.text.starts_with("def logout")).unwrap();
        assert_eq!(logout.start_line, 7);
    }

    #[test]
    fn small_definitions_are_merged() {
        let content = "def a():\n    return 1\n\ndef b():\n    return 2\n";
        let chunker = EmbeddingChunker::new(ChunkConfig::default().with_min_chunk_bytes(1));
        let chunks = chunker.chunk_file("small.py", content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, content);
    }

    #[test]
    fn chunking_is_deterministic() {
        let content = format!("class A:\n    pass\n\n{}", numbered_lines(200));
        let chunker = EmbeddingChunker::new(ChunkConfig::new(300, 60).unwrap());
        let first = chunker.chunk_file("mod.py", &content);
        let second = chunker.chunk_file("mod.py", &content);
        assert_eq!(first, second);
    }

    #[test]
    fn small_chunks_are_dropped() {
        let chunker = EmbeddingChunker::new(ChunkConfig::default().with_min_chunk_bytes(10));
        assert!(chunker.chunk_text("ab\n\n  \n").is_empty());
    }
}
