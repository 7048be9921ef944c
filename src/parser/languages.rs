// SPDX-License-Identifier: MIT OR Apache-2.0

//! Language registry for tree-sitter parsers

use once_cell::sync::Lazy;
use std::collections::HashMap;
use tree_sitter::Language;

/// Supported languages with their tree-sitter parsers
pub struct LanguageRegistry {
    languages: HashMap<String, Language>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut languages = HashMap::new();

        languages.insert(
            "typescript".into(),
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        );
        languages.insert("tsx".into(), tree_sitter_typescript::LANGUAGE_TSX.into());
        languages.insert("javascript".into(), tree_sitter_javascript::LANGUAGE.into());
        languages.insert("python".into(), tree_sitter_python::LANGUAGE.into());
        languages.insert("rust".into(), tree_sitter_rust::LANGUAGE.into());
        languages.insert("go".into(), tree_sitter_go::LANGUAGE.into());
        languages.insert("c".into(), tree_sitter_c::LANGUAGE.into());
        languages.insert("cpp".into(), tree_sitter_cpp::LANGUAGE.into());
        languages.insert("java".into(), tree_sitter_java::LANGUAGE.into());
        languages.insert("ruby".into(), tree_sitter_ruby::LANGUAGE.into());

        Self { languages }
    }

    /// Get language by name
    pub fn get(&self, name: &str) -> Option<&Language> {
        self.languages.get(&name.to_lowercase())
    }
}

/// Global language registry
pub static LANGUAGES: Lazy<LanguageRegistry> = Lazy::new(LanguageRegistry::new);

/// Detect a grammar name from a file path's extension
pub fn detect_language(path: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())?
        .to_lowercase();

    match ext.as_str() {
        "rs" => Some("rust"),
        "ts" | "mts" | "cts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "py" | "pyi" => Some("python"),
        "go" => Some("go"),
        "java" => Some("java"),
        "c" | "h" => Some("c"),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => Some("cpp"),
        "rb" => Some("ruby"),
        _ => None,
    }
}

/// Top-level node kinds that start a new structural unit
pub fn definition_kinds(language: &str) -> &'static [&'static str] {
    match language {
        "python" => &["function_definition", "class_definition", "decorated_definition"],
        "rust" => &[
            "function_item",
            "impl_item",
            "struct_item",
            "enum_item",
            "trait_item",
            "mod_item",
            "macro_definition",
            "type_item",
        ],
        "javascript" | "typescript" | "tsx" => &[
            "function_declaration",
            "generator_function_declaration",
            "class_declaration",
            "abstract_class_declaration",
            "interface_declaration",
            "type_alias_declaration",
            "enum_declaration",
            "export_statement",
            "lexical_declaration",
        ],
        "go" => &[
            "function_declaration",
            "method_declaration",
            "type_declaration",
        ],
        "c" => &["function_definition", "struct_specifier", "enum_specifier"],
        "cpp" => &[
            "function_definition",
            "class_specifier",
            "struct_specifier",
            "namespace_definition",
            "template_declaration",
        ],
        "java" => &[
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "record_declaration",
        ],
        "ruby" => &["method", "class", "module", "singleton_method"],
        _ => &[],
    }
}
