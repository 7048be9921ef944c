// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output and color utilities for consistent terminal formatting
//!
//! Provides shared color functions respecting NO_COLOR environment variable.

use colored::Colorize;

/// Check if colors should be used (respects NO_COLOR env var)
pub fn use_colors() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Colorize file path (cyan)
pub fn colorize_path(text: &str, use_color: bool) -> String {
    if use_color {
        text.cyan().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize a line range (yellow)
pub fn colorize_lines(start: u32, end: u32, use_color: bool) -> String {
    let range = if start == end {
        format!("L{}", start)
    } else {
        format!("L{}-{}", start, end)
    };
    if use_color {
        range.yellow().to_string()
    } else {
        range
    }
}

/// Colorize a similarity score (green when strong, dimmed when weak)
pub fn colorize_score(score: f32, use_color: bool) -> String {
    let text = format!("{:.3}", score);
    if !use_color {
        text
    } else if score >= 0.5 {
        text.green().to_string()
    } else {
        text.dimmed().to_string()
    }
}

/// Colorize excerpt lines (dimmed)
pub fn colorize_context(text: &str, use_color: bool) -> String {
    if use_color {
        text.dimmed().to_string()
    } else {
        text.to_string()
    }
}

/// First `max_lines` lines of `text`, with a marker when cut.
pub fn excerpt_lines(text: &str, max_lines: usize) -> Vec<String> {
    let mut lines: Vec<String> = text.lines().take(max_lines).map(str::to_string).collect();
    if text.lines().count() > max_lines {
        lines.push("…".to_string());
    }
    lines
}
