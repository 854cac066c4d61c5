//! Structural chunking: one source file in, an ordered list of bounded
//! semantic chunks out.
//!
//! Order is always File, Module (if any), then each top-level definition in
//! source order. Definitions above the size limit are broken up: classes into
//! a header plus their methods, functions into a header plus overlapping
//! line blocks.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::languages::{Lang, SyntaxKind, detect_language};
use crate::syntax::{SyntaxNode, docstring_statement, parse, strip_string_quotes};
use crate::tokens::estimate_tokens;

/// Kind of a [`Chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    File,
    Module,
    Class,
    Method,
    Function,
    Block,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Module => "module",
            Self::Class => "class",
            Self::Method => "method",
            Self::Function => "function",
            Self::Block => "block",
        }
    }

    /// Class, method or function: a named declaration.
    #[must_use]
    pub fn is_definition(self) -> bool {
        match self {
            Self::Class | Self::Method | Self::Function => true,
            Self::File | Self::Module | Self::Block => false,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One semantic unit of source code.
///
/// Lines are 1-based and inclusive; bytes are a half-open range into the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub kind: ChunkKind,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub content: String,
    pub docstring: Option<String>,
    pub symbol_name: Option<String>,
    pub parent_symbol: Option<String>,
    pub signature: Option<String>,
    pub imports: Vec<String>,
    pub calls: Vec<String>,
    pub language: Lang,
    pub complexity: u32,
    pub tokens: usize,
}

impl Chunk {
    /// Whether the two chunks share a file and any line.
    #[must_use]
    pub fn overlaps(&self, other: &Chunk) -> bool {
        self.file_path == other.file_path
            && self.start_line <= other.end_line
            && other.start_line <= self.end_line
    }

    /// Whether `other` lies entirely within this chunk's line range.
    #[must_use]
    pub fn contains(&self, other: &Chunk) -> bool {
        self.file_path == other.file_path
            && self.start_line <= other.start_line
            && other.end_line <= self.end_line
    }

    /// Move the chunk to `new_path` without re-reading the source.
    ///
    /// Path-derived fields (the File header, the Module stem) and the id are
    /// rebuilt exactly as chunking the same content at `new_path` would.
    pub fn relocate(&mut self, new_path: &str) {
        match self.kind {
            ChunkKind::File => {
                if let Some(rest) = self.content.strip_prefix(&overview_header(&self.file_path)) {
                    self.content = format!("{}{rest}", overview_header(new_path));
                    self.tokens = estimate_tokens(&self.content);
                }
            }
            ChunkKind::Module => self.symbol_name = file_stem(new_path),
            _ => {}
        }
        self.file_path = new_path.to_string();
        self.id = chunk_id(
            self.kind,
            &self.file_path,
            self.symbol_name.as_deref(),
            &self.content,
        );
    }
}

fn overview_header(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    format!("File: {file_name}\nPath: {path}\n")
}

fn file_stem(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
}

/// Deterministic chunk id over `(path, symbol, content)`, prefixed by kind.
#[must_use]
pub fn chunk_id(kind: ChunkKind, file_path: &str, symbol: Option<&str>, content: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(symbol.unwrap_or_default().as_bytes());
    hasher.update(b"\0");
    hasher.update(content.as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{kind}_{}", &hex[..32])
}

/// Chunker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Token estimate above which a definition is split (default: 512).
    pub max_chunk_tokens: usize,
    /// Word budget for one block of an oversized function (default: 400).
    pub block_target_tokens: usize,
    /// Lines repeated at the top of the next block (default: 3).
    pub overlap_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 512,
            block_target_tokens: 400,
            overlap_lines: 3,
        }
    }
}

/// Structural summary of a file, rendered into the File chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOverview {
    pub path: String,
    pub language: Lang,
    pub line_count: usize,
    pub imports: Vec<String>,
    pub classes: Vec<ClassOverview>,
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassOverview {
    pub name: String,
    pub methods: Vec<String>,
}

const OVERVIEW_LIST_LIMIT: usize = 10;

impl FileOverview {
    /// Navigation text used as the File chunk's content.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = overview_header(&self.path);
        if !self.imports.is_empty() {
            let shown: Vec<&str> = self
                .imports
                .iter()
                .take(OVERVIEW_LIST_LIMIT)
                .map(String::as_str)
                .collect();
            out.push_str(&format!("\nImports: {}", shown.join(", ")));
        }
        if !self.classes.is_empty() {
            let names: Vec<&str> = self.classes.iter().map(|c| c.name.as_str()).collect();
            out.push_str(&format!("\nClasses: {}", names.join(", ")));
            for class in self.classes.iter().filter(|c| !c.methods.is_empty()) {
                let shown: Vec<&str> = class
                    .methods
                    .iter()
                    .take(OVERVIEW_LIST_LIMIT)
                    .map(String::as_str)
                    .collect();
                out.push_str(&format!("\n  {} methods: {}", class.name, shown.join(", ")));
            }
        }
        if !self.functions.is_empty() {
            out.push_str(&format!("\nFunctions: {}", self.functions.join(", ")));
        }
        out
    }
}

/// Output of [`chunk_file`].
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    pub chunks: Vec<Chunk>,
    pub overview: FileOverview,
}

/// Detect the language from `file_path` and chunk `source`.
///
/// # Errors
///
/// Returns [`IndexError::UnsupportedLanguage`] for unknown extensions and
/// [`IndexError::Parse`] for malformed source.
pub fn chunk_source(source: &str, file_path: &str, config: &ChunkerConfig) -> Result<ChunkedFile> {
    let lang = detect_language(std::path::Path::new(file_path))
        .ok_or_else(|| IndexError::UnsupportedLanguage(file_path.to_string()))?;
    chunk_file(source, file_path, lang, config)
}

/// Parse and chunk a source file.
///
/// # Errors
///
/// Returns error if tree-sitter fails to parse or no grammar is available.
pub fn chunk_file(
    source: &str,
    file_path: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> Result<ChunkedFile> {
    let tree = parse(source, lang, file_path)?;
    let root = SyntaxNode::new(tree.root_node(), lang);
    let top: Vec<SyntaxNode<'_>> = root.children().collect();

    let imports: Vec<String> = top
        .iter()
        .filter(|n| n.kind() == SyntaxKind::Import)
        .flat_map(|n| n.import_paths(source))
        .collect();

    let ctx = ChunkCtx {
        source,
        file_path,
        lang,
        imports: &imports,
        config,
        lines: LineIndex::new(source),
    };

    let overview = ctx.overview(&top);
    let mut chunks = vec![ctx.file_chunk(&overview)];
    chunks.extend(ctx.module_chunk(&top));

    for node in &top {
        match node.definition_kind() {
            Some(SyntaxKind::Class) => ctx.class_chunks(*node, &mut chunks),
            Some(SyntaxKind::Function) => ctx.function_chunks(*node, None, &mut chunks),
            _ => {}
        }
    }

    Ok(ChunkedFile { chunks, overview })
}

/// Byte offsets of line starts.
struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            starts,
            len: source.len(),
        }
    }

    fn count(&self) -> usize {
        self.starts.len()
    }

    fn start(&self, row: usize) -> usize {
        self.starts.get(row).copied().unwrap_or(self.len)
    }

    /// End of `row`, excluding its newline.
    fn end(&self, row: usize) -> usize {
        self.starts
            .get(row + 1)
            .map_or(self.len, |next| next.saturating_sub(1))
    }

    fn text<'s>(&self, source: &'s str, row: usize) -> &'s str {
        let start = self.start(row);
        let end = self.end(row).max(start);
        source[start..end].trim_end_matches('\r')
    }
}

struct ChunkCtx<'a> {
    source: &'a str,
    file_path: &'a str,
    lang: Lang,
    imports: &'a [String],
    config: &'a ChunkerConfig,
    lines: LineIndex,
}

/// Fields that vary between chunk kinds.
struct ChunkSpec {
    kind: ChunkKind,
    start_row: usize,
    end_row: usize,
    start_byte: usize,
    end_byte: usize,
    content: String,
    docstring: Option<String>,
    symbol_name: Option<String>,
    parent_symbol: Option<String>,
    signature: Option<String>,
    calls: Vec<String>,
    complexity: u32,
}

impl ChunkCtx<'_> {
    fn build(&self, spec: ChunkSpec) -> Chunk {
        Chunk {
            id: chunk_id(
                spec.kind,
                self.file_path,
                spec.symbol_name.as_deref(),
                &spec.content,
            ),
            file_path: self.file_path.to_string(),
            kind: spec.kind,
            start_line: spec.start_row + 1,
            end_line: spec.end_row + 1,
            start_byte: spec.start_byte,
            end_byte: spec.end_byte,
            tokens: estimate_tokens(&spec.content),
            content: spec.content,
            docstring: spec.docstring,
            symbol_name: spec.symbol_name,
            parent_symbol: spec.parent_symbol,
            signature: spec.signature,
            imports: self.imports.to_vec(),
            calls: spec.calls,
            language: self.lang,
            complexity: spec.complexity,
        }
    }

    fn name_of(&self, def: SyntaxNode<'_>) -> String {
        def.name(self.source)
            .unwrap_or_else(|| "<anonymous>".to_string())
    }

    fn overview(&self, top: &[SyntaxNode<'_>]) -> FileOverview {
        let mut classes = Vec::new();
        let mut functions = Vec::new();
        for node in top {
            let def = node.unwrap_definition();
            match node.definition_kind() {
                Some(SyntaxKind::Class) => classes.push(ClassOverview {
                    name: self.name_of(def),
                    methods: def
                        .members()
                        .into_iter()
                        .map(|m| self.name_of(m.unwrap_definition()))
                        .collect(),
                }),
                Some(SyntaxKind::Function) => functions.push(self.name_of(def)),
                _ => {}
            }
        }
        FileOverview {
            path: self.file_path.to_string(),
            language: self.lang,
            line_count: self.source.lines().count(),
            imports: self.imports.to_vec(),
            classes,
            functions,
        }
    }

    fn file_chunk(&self, overview: &FileOverview) -> Chunk {
        self.build(ChunkSpec {
            kind: ChunkKind::File,
            start_row: 0,
            end_row: self.lines.count().saturating_sub(1),
            start_byte: 0,
            end_byte: self.source.len(),
            content: overview.describe(),
            docstring: None,
            symbol_name: None,
            parent_symbol: None,
            signature: None,
            calls: Vec::new(),
            complexity: 1,
        })
    }

    /// Leading comments, docstring and imports up to the first definition.
    fn module_chunk(&self, top: &[SyntaxNode<'_>]) -> Option<Chunk> {
        let mut parts: Vec<SyntaxNode<'_>> = Vec::new();
        let mut docstring = None;
        let mut leading = true;
        for node in top {
            if node.definition_kind().is_some() {
                break;
            }
            match node.kind() {
                SyntaxKind::Import => parts.push(*node),
                SyntaxKind::Comment if leading => parts.push(*node),
                _ if self.lang == Lang::Python && docstring_statement(*node) => {
                    docstring = node
                        .children()
                        .next()
                        .map(|s| strip_string_quotes(s.text(self.source)));
                    parts.push(*node);
                }
                _ => {}
            }
            if node.kind() != SyntaxKind::Comment {
                leading = false;
            }
        }

        let first = parts.first()?;
        let last = parts.last()?;
        let content = self.source[first.start_byte()..last.end_byte()].to_string();
        Some(self.build(ChunkSpec {
            kind: ChunkKind::Module,
            start_row: first.start_row(),
            end_row: last.end_row(),
            start_byte: first.start_byte(),
            end_byte: last.end_byte(),
            content,
            docstring,
            symbol_name: file_stem(self.file_path),
            parent_symbol: None,
            signature: None,
            calls: Vec::new(),
            complexity: 1,
        }))
    }

    fn whole(
        &self,
        node: SyntaxNode<'_>,
        kind: ChunkKind,
        name: &str,
        parent: Option<&str>,
    ) -> Chunk {
        let def = node.unwrap_definition();
        self.build(ChunkSpec {
            kind,
            start_row: node.start_row(),
            end_row: node.end_row(),
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            content: node.text(self.source).to_string(),
            docstring: def.docstring(self.source),
            symbol_name: Some(name.to_string()),
            parent_symbol: parent.map(str::to_string),
            signature: Some(def.signature(self.source)),
            calls: self.calls(def),
            complexity: def.complexity(),
        })
    }

    fn oversized(&self, node: SyntaxNode<'_>) -> bool {
        estimate_tokens(node.text(self.source)) > self.config.max_chunk_tokens
    }

    fn class_chunks(&self, node: SyntaxNode<'_>, out: &mut Vec<Chunk>) {
        let def = node.unwrap_definition();
        let name = self.name_of(def);
        if !self.oversized(node) {
            out.push(self.whole(node, ChunkKind::Class, &name, None));
            return;
        }

        let members = def.members();
        let Some(first) = members.first() else {
            self.split(node, ChunkKind::Class, &name, None, out);
            return;
        };

        let header = self.source[node.start_byte()..first.start_byte()].trim_end();
        let end_byte = node.start_byte() + header.len();
        out.push(self.build(ChunkSpec {
            kind: ChunkKind::Class,
            start_row: node.start_row(),
            end_row: node.start_row() + header.matches('\n').count(),
            start_byte: node.start_byte(),
            end_byte,
            content: header.to_string(),
            docstring: def.docstring(self.source),
            symbol_name: Some(name.clone()),
            parent_symbol: None,
            signature: Some(def.signature(self.source)),
            calls: Vec::new(),
            complexity: 1,
        }));

        for member in members {
            self.function_chunks(member, Some(&name), out);
        }
    }

    fn function_chunks(&self, node: SyntaxNode<'_>, class: Option<&str>, out: &mut Vec<Chunk>) {
        let name = self.name_of(node.unwrap_definition());
        let kind = if class.is_some() {
            ChunkKind::Method
        } else {
            ChunkKind::Function
        };
        if self.oversized(node) {
            self.split(node, kind, &name, class, out);
        } else {
            out.push(self.whole(node, kind, &name, class));
        }
    }

    /// Header chunk plus overlapping line blocks for an oversized definition.
    fn split(
        &self,
        node: SyntaxNode<'_>,
        header_kind: ChunkKind,
        name: &str,
        parent: Option<&str>,
        out: &mut Vec<Chunk>,
    ) {
        let def = node.unwrap_definition();
        let header_end_row = def.header_end_row(self.source).min(node.end_row());
        let header_end = self.lines.end(header_end_row).clamp(node.start_byte(), node.end_byte());
        out.push(self.build(ChunkSpec {
            kind: header_kind,
            start_row: node.start_row(),
            end_row: header_end_row,
            start_byte: node.start_byte(),
            end_byte: header_end,
            content: self.source[node.start_byte()..header_end].to_string(),
            docstring: def.docstring(self.source),
            symbol_name: Some(name.to_string()),
            parent_symbol: parent.map(str::to_string),
            signature: Some(def.signature(self.source)),
            calls: self.calls(def),
            complexity: def.complexity(),
        }));

        let prefix = format!("{} Part of {name}\n", self.lang.line_comment());
        let char_budget = self
            .config
            .max_chunk_tokens
            .saturating_sub(estimate_tokens(&prefix))
            .saturating_mul(4);

        let mut block: Vec<usize> = Vec::new();
        let mut words = 0usize;
        let mut chars = 0usize;
        let mut index = 0usize;

        for row in header_end_row + 1..=node.end_row() {
            let line = self.lines.text(self.source, row);
            let line_words = line.split_whitespace().count() + 1;
            let line_chars = line.chars().count() + 1;
            let over_words = words + line_words > self.config.block_target_tokens;
            let over_chars = chars + line_chars > char_budget;
            if !block.is_empty() && (over_words || over_chars) {
                out.push(self.block(&block, &prefix, name, index));
                index += 1;
                let keep = block.len().min(self.config.overlap_lines);
                block.drain(..block.len() - keep);
                words = block
                    .iter()
                    .map(|r| self.lines.text(self.source, *r).split_whitespace().count() + 1)
                    .sum();
                chars = block
                    .iter()
                    .map(|r| self.lines.text(self.source, *r).chars().count() + 1)
                    .sum();
            }
            block.push(row);
            words += line_words;
            chars += line_chars;
        }
        if !block.is_empty() {
            out.push(self.block(&block, &prefix, name, index));
        }
    }

    fn block(&self, rows: &[usize], prefix: &str, name: &str, index: usize) -> Chunk {
        let first = rows[0];
        let last = rows[rows.len() - 1];
        let start_byte = self.lines.start(first);
        let end_byte = self.lines.end(last).max(start_byte);
        let mut content = prefix.to_string();
        content.push_str(&self.source[start_byte..end_byte]);
        self.build(ChunkSpec {
            kind: ChunkKind::Block,
            start_row: first,
            end_row: last,
            start_byte,
            end_byte,
            content,
            docstring: None,
            symbol_name: Some(format!("{name}_block_{index}")),
            parent_symbol: Some(name.to_string()),
            signature: None,
            calls: Vec::new(),
            complexity: 1,
        })
    }

    /// Distinct callee names in first-seen order.
    fn calls(&self, def: SyntaxNode<'_>) -> Vec<String> {
        let mut calls: Vec<String> = Vec::new();
        for name in def
            .descendants()
            .filter(|n| n.kind() == SyntaxKind::Call)
            .filter_map(|n| n.callee_name(self.source))
        {
            if !calls.contains(&name) {
                calls.push(name);
            }
        }
        calls
    }
}
