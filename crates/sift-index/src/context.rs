//! Embedding text for chunks.
//!
//! Raw code alone embeds poorly for conceptual queries, so the embedded text
//! carries the file path, enclosing scope, language and a few imports ahead
//! of the code.

use crate::chunker::Chunk;

/// Maximum number of imports included in the embedding text.
const MAX_IMPORT_LINES: usize = 5;

/// Text sent to the dense and sparse embedders for `chunk`.
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk) -> String {
    let mut text = String::with_capacity(chunk.content.len() + 256);

    text.push_str("# ");
    text.push_str(&chunk.file_path);
    text.push('\n');

    let scope = match (&chunk.parent_symbol, &chunk.symbol_name) {
        (Some(parent), Some(name)) => Some(format!("{parent} > {name}")),
        (None, Some(name)) => Some(name.clone()),
        (Some(parent), None) => Some(parent.clone()),
        (None, None) => None,
    };
    if let Some(scope) = scope {
        text.push_str("# Scope: ");
        text.push_str(&scope);
        text.push('\n');
    }

    text.push_str("# Language: ");
    text.push_str(chunk.language.id());
    text.push('\n');

    if let Some(doc) = &chunk.docstring {
        text.push_str("# ");
        text.push_str(doc.lines().next().unwrap_or_default());
        text.push('\n');
    }

    if !chunk.imports.is_empty() {
        let shown = chunk
            .imports
            .iter()
            .take(MAX_IMPORT_LINES)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        text.push_str("# Imports: ");
        text.push_str(&shown);
        text.push('\n');
    }

    text.push_str(&chunk.content);
    text
}
