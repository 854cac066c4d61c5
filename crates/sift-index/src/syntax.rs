//! Typed view over tree-sitter nodes.
//!
//! [`SyntaxNode`] pairs a raw node with its [`Lang`] so tree walks can ask
//! "is this a class / function / import" without comparing grammar strings.

use tree_sitter::{Node, Parser, Tree};

use crate::error::{IndexError, Result};
use crate::languages::{Lang, SyntaxKind};

/// Parse `source` with the grammar for `lang`.
///
/// # Errors
///
/// Returns [`IndexError::Parse`] if no grammar is compiled in, parsing fails,
/// or the resulting tree contains syntax errors.
pub fn parse(source: &str, lang: Lang, file_path: &str) -> Result<Tree> {
    let grammar = lang
        .grammar()
        .ok_or_else(|| IndexError::Parse(format!("no grammar for {}", lang.id())))?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| IndexError::Parse(format!("parse failed for {file_path}")))?;

    if tree.root_node().has_error() {
        return Err(IndexError::Parse(format!(
            "{file_path}: syntax errors in source"
        )));
    }
    Ok(tree)
}

#[derive(Debug, Clone, Copy)]
pub struct SyntaxNode<'t> {
    node: Node<'t>,
    lang: Lang,
}

impl<'t> SyntaxNode<'t> {
    #[must_use]
    pub fn new(node: Node<'t>, lang: Lang) -> Self {
        Self { node, lang }
    }

    #[must_use]
    pub fn kind(&self) -> SyntaxKind {
        self.lang.classify(self.node.kind())
    }

    #[must_use]
    pub fn grammar_kind(&self) -> &'static str {
        self.node.kind()
    }

    #[must_use]
    pub fn start_byte(&self) -> usize {
        self.node.start_byte()
    }

    #[must_use]
    pub fn end_byte(&self) -> usize {
        self.node.end_byte()
    }

    /// Zero-based first row.
    #[must_use]
    pub fn start_row(&self) -> usize {
        self.node.start_position().row
    }

    /// Zero-based last row.
    #[must_use]
    pub fn end_row(&self) -> usize {
        self.node.end_position().row
    }

    #[must_use]
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.node.byte_range()]
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<SyntaxNode<'t>> {
        self.node
            .child_by_field_name(name)
            .map(|n| Self::new(n, self.lang))
    }

    /// Named children in source order.
    pub fn children(&self) -> impl Iterator<Item = SyntaxNode<'t>> + use<'t> {
        let node = self.node;
        let lang = self.lang;
        let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
        (0..count).filter_map(move |i| node.named_child(i).map(|n| Self::new(n, lang)))
    }

    /// All named descendants in pre-order, excluding `self`.
    #[must_use]
    pub fn descendants(&self) -> Descendants<'t> {
        let mut stack: Vec<SyntaxNode<'t>> = self.children().collect();
        stack.reverse();
        Descendants { stack }
    }

    /// The definition wrapped by a decorator or export, or `self`.
    #[must_use]
    pub fn unwrap_definition(self) -> SyntaxNode<'t> {
        if self.kind() != SyntaxKind::Wrapper {
            return self;
        }
        self.field("definition")
            .or_else(|| self.field("declaration"))
            .map_or(self, SyntaxNode::unwrap_definition)
    }

    /// Class-like or function-like definition after unwrapping, if any.
    #[must_use]
    pub fn definition_kind(&self) -> Option<SyntaxKind> {
        match self.unwrap_definition().kind() {
            kind @ (SyntaxKind::Class | SyntaxKind::Function) => Some(kind),
            _ => None,
        }
    }

    /// Declared name. `impl` blocks report their type, Go type declarations
    /// their first spec.
    #[must_use]
    pub fn name(&self, source: &str) -> Option<String> {
        self.field("name")
            .or_else(|| self.field("type"))
            .or_else(|| self.children().find_map(|c| c.field("name")))
            .map(|n| n.text(source).to_string())
    }

    #[must_use]
    pub fn body(&self) -> Option<SyntaxNode<'t>> {
        self.field("body")
    }

    /// Definition header up to its body, whitespace-collapsed, without the
    /// trailing `:` or `{`.
    #[must_use]
    pub fn signature(&self, source: &str) -> String {
        let header = match self.body() {
            Some(body) => &source[self.start_byte()..body.start_byte()],
            None => self.text(source).lines().next().unwrap_or_default(),
        };
        let header = header.trim_end().trim_end_matches([':', '{']).trim_end();
        header.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Last row of the definition header: the docstring statement when the
    /// body opens with one, otherwise the row holding the end of the signature.
    #[must_use]
    pub fn header_end_row(&self, source: &str) -> usize {
        if let Some(doc) = self.body_docstring_node() {
            return doc.end_row();
        }
        match self.body() {
            Some(body) => {
                let head = source[self.start_byte()..body.start_byte()].trim_end();
                self.start_row() + head.matches('\n').count()
            }
            None => self.start_row(),
        }
    }

    fn body_docstring_node(&self) -> Option<SyntaxNode<'t>> {
        if self.lang != Lang::Python {
            return None;
        }
        let first = self.body()?.children().next()?;
        docstring_statement(first).then_some(first)
    }

    /// Python docstring, or the doc comments immediately preceding the node.
    #[must_use]
    pub fn docstring(&self, source: &str) -> Option<String> {
        if self.lang == Lang::Python {
            return self
                .body_docstring_node()
                .map(|n| strip_string_quotes(n.text(source)));
        }

        let mut lines = Vec::new();
        let mut row = self.start_row();
        let mut prev = self.node.prev_named_sibling();
        while let Some(p) = prev {
            let sibling = Self::new(p, self.lang);
            if sibling.kind() != SyntaxKind::Comment || sibling.end_row() + 1 < row {
                break;
            }
            lines.push(strip_comment_markers(sibling.text(source)));
            row = sibling.start_row();
            prev = p.prev_named_sibling();
        }
        if lines.is_empty() {
            return None;
        }
        lines.reverse();
        let doc = lines.join("\n").trim().to_string();
        (!doc.is_empty()).then_some(doc)
    }

    /// Name of the function invoked by a call node.
    #[must_use]
    pub fn callee_name(&self, source: &str) -> Option<String> {
        let target = self
            .field("function")
            .or_else(|| self.field("constructor"))?;
        if target.grammar_kind().ends_with("identifier") {
            return Some(target.text(source).to_string());
        }
        ["attribute", "field", "property", "name"]
            .iter()
            .find_map(|f| target.field(f))
            .map(|n| n.text(source).to_string())
    }

    /// Module paths referenced by an import node.
    #[must_use]
    pub fn import_paths(&self, source: &str) -> Vec<String> {
        match self.lang {
            Lang::Python => match self.grammar_kind() {
                "import_from_statement" => self
                    .field("module_name")
                    .map(|m| vec![m.text(source).to_string()])
                    .unwrap_or_default(),
                _ => self
                    .children()
                    .filter_map(|c| match c.grammar_kind() {
                        "dotted_name" => Some(c.text(source).to_string()),
                        "aliased_import" => c.field("name").map(|n| n.text(source).to_string()),
                        _ => None,
                    })
                    .collect(),
            },
            Lang::Rust => self
                .field("argument")
                .map(|a| vec![a.text(source).to_string()])
                .unwrap_or_default(),
            Lang::JavaScript | Lang::TypeScript => self
                .field("source")
                .map(|s| vec![strip_string_quotes(s.text(source))])
                .unwrap_or_default(),
            Lang::Go => std::iter::once(*self)
                .chain(self.descendants())
                .filter(|n| n.grammar_kind() == "import_spec")
                .filter_map(|n| n.field("path"))
                .map(|p| strip_string_quotes(p.text(source)))
                .collect(),
        }
    }

    /// Function-like members declared directly in this node's body.
    #[must_use]
    pub fn members(&self) -> Vec<SyntaxNode<'t>> {
        let Some(body) = self.body() else {
            return Vec::new();
        };
        body.children()
            .filter(|c| c.definition_kind() == Some(SyntaxKind::Function))
            .collect()
    }

    /// `1 + number of branching nodes` below this node.
    #[must_use]
    pub fn complexity(&self) -> u32 {
        let branches = self
            .descendants()
            .filter(|n| n.kind() == SyntaxKind::Branch)
            .count();
        u32::try_from(branches).map_or(u32::MAX, |b| b.saturating_add(1))
    }
}

/// Pre-order iterator returned by [`SyntaxNode::descendants`].
pub struct Descendants<'t> {
    stack: Vec<SyntaxNode<'t>>,
}

impl<'t> Iterator for Descendants<'t> {
    type Item = SyntaxNode<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let mark = self.stack.len();
        self.stack.extend(node.children());
        self.stack[mark..].reverse();
        Some(node)
    }
}

/// Python `expression_statement` consisting of a bare string literal.
pub(crate) fn docstring_statement(node: SyntaxNode<'_>) -> bool {
    node.grammar_kind() == "expression_statement"
        && node
            .children()
            .next()
            .is_some_and(|c| c.grammar_kind() == "string")
}

pub(crate) fn strip_string_quotes(text: &str) -> String {
    text.trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

fn strip_comment_markers(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim_start_matches('/')
                .trim_start_matches('!')
                .trim_start_matches('*')
                .trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
