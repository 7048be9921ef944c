// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structural chunk boundaries from tree-sitter top-level definitions

use tree_sitter::Parser;

use crate::parser::languages::{definition_kinds, LANGUAGES};

/// Byte offsets where top-level definitions begin, snapped to line starts.
///
/// Returns `None` if the language has no grammar or the source fails to parse.
/// The result is sorted, deduplicated and never contains offset 0.
pub fn definition_starts(source: &str, language: &str) -> Option<Vec<usize>> {
    let lang = LANGUAGES.get(language)?;
    let kinds = definition_kinds(language);
    if kinds.is_empty() {
        return None;
    }

    let mut parser = Parser::new();
    parser.set_language(lang).ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();

    let mut starts = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if !kinds.contains(&child.kind()) {
            continue;
        }
        let start = line_start(source, child.start_byte());
        if start > 0 {
            starts.push(start);
        }
    }

    starts.sort_unstable();
    starts.dedup();
    Some(starts)
}

fn line_start(source: &str, offset: usize) -> usize {
    source[..offset].rfind('\n').map(|idx| idx + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_functions_and_classes() {
        let source = "import os\n\ndef login(user):\n    return True\n\nclass Session:\n    pass\n";
        let starts = definition_starts(source, "python").unwrap();
        assert_eq!(starts.len(), 2);
        assert!(source[starts[0]..].starts_with("def login"));
        assert!(source[starts[1]..].starts_with("class Session"));
    }

    #[test]
    fn rust_items() {
        let source = "use std::fmt;\n\npub struct A;\n\nimpl A {\n    fn f(&self) {}\n}\n\nfn main() {}\n";
        let starts = definition_starts(source, "rust").unwrap();
        assert_eq!(starts.len(), 3);
        assert!(source[starts[2]..].starts_with("fn main"));
    }

    #[test]
    fn definition_at_file_start_is_not_a_boundary() {
        let source = "def a():\n    pass\n\ndef b():\n    pass\n";
        let starts = definition_starts(source, "python").unwrap();
        assert_eq!(starts.len(), 1);
        assert!(source[starts[0]..].starts_with("def b"));
    }

    #[test]
    fn unknown_language() {
        assert!(definition_starts("hello", "cobol").is_none());
    }
}
