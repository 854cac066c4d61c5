//! Language detection, tree-sitter grammar registry and node-kind tables.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
}

/// Grammar-independent classification of a syntax node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxKind {
    /// Class-like container: class, struct, enum, trait, impl, interface.
    Class,
    /// Function, method or function signature.
    Function,
    Import,
    Call,
    /// Node that adds a path through the code (if, loop arm, catch, ...).
    Branch,
    Comment,
    /// Decorator or export wrapper around a definition.
    Wrapper,
    Other,
}

impl Lang {
    pub const ALL: [Lang; 5] = [
        Lang::Rust,
        Lang::Python,
        Lang::JavaScript,
        Lang::TypeScript,
        Lang::Go,
    ];

    /// Identifier used in store payloads and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
        }
    }

    /// File extensions mapped to this language.
    #[must_use]
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["rs"],
            Self::Python => &["py", "pyi"],
            Self::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Self::TypeScript => &["ts", "tsx", "mts", "cts"],
            Self::Go => &["go"],
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Line comment prefix, used to label split blocks.
    #[must_use]
    pub fn line_comment(self) -> &'static str {
        match self {
            Self::Python => "#",
            Self::Rust | Self::JavaScript | Self::TypeScript | Self::Go => "//",
        }
    }

    /// Map a grammar node kind onto [`SyntaxKind`].
    #[must_use]
    pub fn classify(self, kind: &str) -> SyntaxKind {
        match self {
            Self::Python => match kind {
                "class_definition" => SyntaxKind::Class,
                "function_definition" => SyntaxKind::Function,
                "import_statement" | "import_from_statement" | "future_import_statement" => {
                    SyntaxKind::Import
                }
                "call" => SyntaxKind::Call,
                "if_statement" | "elif_clause" | "for_statement" | "while_statement"
                | "except_clause" | "conditional_expression" | "boolean_operator"
                | "case_clause" => SyntaxKind::Branch,
                "comment" => SyntaxKind::Comment,
                "decorated_definition" => SyntaxKind::Wrapper,
                _ => SyntaxKind::Other,
            },
            Self::Rust => match kind {
                "struct_item" | "enum_item" | "trait_item" | "impl_item" | "union_item" => {
                    SyntaxKind::Class
                }
                "function_item" | "function_signature_item" => SyntaxKind::Function,
                "use_declaration" => SyntaxKind::Import,
                "call_expression" => SyntaxKind::Call,
                "if_expression" | "match_arm" | "for_expression" | "while_expression"
                | "loop_expression" => SyntaxKind::Branch,
                "line_comment" | "block_comment" => SyntaxKind::Comment,
                _ => SyntaxKind::Other,
            },
            Self::JavaScript | Self::TypeScript => match kind {
                "class_declaration" | "abstract_class_declaration" | "interface_declaration" => {
                    SyntaxKind::Class
                }
                "function_declaration" | "generator_function_declaration"
                | "method_definition" => SyntaxKind::Function,
                "import_statement" => SyntaxKind::Import,
                "call_expression" | "new_expression" => SyntaxKind::Call,
                "if_statement" | "for_statement" | "for_in_statement" | "while_statement"
                | "do_statement" | "catch_clause" | "switch_case" | "ternary_expression" => {
                    SyntaxKind::Branch
                }
                "comment" => SyntaxKind::Comment,
                "export_statement" => SyntaxKind::Wrapper,
                _ => SyntaxKind::Other,
            },
            Self::Go => match kind {
                "type_declaration" => SyntaxKind::Class,
                "function_declaration" | "method_declaration" => SyntaxKind::Function,
                "import_declaration" => SyntaxKind::Import,
                "call_expression" => SyntaxKind::Call,
                "if_statement" | "for_statement" | "expression_case" | "type_case"
                | "communication_case" => SyntaxKind::Branch,
                "comment" => SyntaxKind::Comment,
                _ => SyntaxKind::Other,
            },
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    Lang::ALL
        .into_iter()
        .find(|lang| lang.extensions().contains(&ext))
}

/// Check if a file should be indexed (has a supported language with grammar).
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    detect_language(path).and_then(Lang::grammar).is_some()
}

/// Extensions of every language whose grammar is compiled in.
#[must_use]
pub fn indexable_extensions() -> Vec<&'static str> {
    Lang::ALL
        .into_iter()
        .filter(|lang| lang.grammar().is_some())
        .flat_map(Lang::extensions)
        .copied()
        .collect()
}
