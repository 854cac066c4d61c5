//! Token-budgeted context assembly: priority classification, overlap
//! dedup, greedy packing with truncation, prompt ordering.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;
use crate::config::AssemblerConfig;
use crate::search::SearchHit;
use crate::tokens::{CharEstimator, TokenCounter};

/// Priority class of a hit; its weight scales the raw search score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Symbol named in the query.
    Critical,
    /// Definition or strong match.
    High,
    Medium,
    Low,
    /// Supplementary context such as file overviews.
    Background,
}

impl Priority {
    #[must_use]
    pub fn weight(self) -> f32 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.8,
            Self::Medium => 0.6,
            Self::Low => 0.4,
            Self::Background => 0.2,
        }
    }

    /// Classify a search hit against the query text.
    #[must_use]
    pub fn classify(chunk: &Chunk, score: f32, query: &str) -> Self {
        if let Some(symbol) = chunk.symbol_name.as_deref()
            && !symbol.is_empty()
            && query.to_lowercase().contains(&symbol.to_lowercase())
        {
            return Self::Critical;
        }
        if chunk.kind.is_definition() || score > 0.8 {
            return Self::High;
        }
        if score > 0.6 {
            return Self::Medium;
        }
        Self::Low
    }
}

/// How a context budget is divided between categories of retrieved code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStrategy {
    Uniform,
    #[default]
    RelevanceWeighted,
    DefinitionsFirst,
}

impl BudgetStrategy {
    /// Percent shares of definitions, relevant code, file context, patterns.
    fn shares(self) -> [usize; 4] {
        match self {
            Self::Uniform => [25, 25, 25, 25],
            Self::RelevanceWeighted => [25, 55, 15, 5],
            Self::DefinitionsFirst => [35, 45, 15, 5],
        }
    }
}

/// Token budget per category, from [`ContextAssembler::allocate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetAllocation {
    pub definitions: usize,
    pub relevant: usize,
    pub context: usize,
    pub patterns: usize,
}

impl BudgetAllocation {
    #[must_use]
    pub fn total(&self) -> usize {
        self.definitions + self.relevant + self.context + self.patterns
    }
}

/// A hit selected for the context window.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextChunk {
    pub chunk: Chunk,
    /// Text placed in the prompt; differs from `chunk.content` when truncated.
    pub content: String,
    pub score: f32,
    pub priority: Priority,
    pub tokens: usize,
    pub truncated: bool,
}

impl ContextChunk {
    #[must_use]
    pub fn effective_score(&self) -> f32 {
        self.score * self.priority.weight()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub chunks: Vec<ContextChunk>,
    pub total_tokens: usize,
    /// `total_tokens / max_tokens`.
    pub budget_used: f32,
    pub files_included: usize,
    pub symbols_included: usize,
    pub truncated_chunks: usize,
    /// Hits dropped by dedup or because the budget ran out.
    pub dropped_chunks: usize,
}

impl AssembledContext {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Render as XML grouped by file, chunks in line order within each file.
    #[must_use]
    pub fn to_prompt(&self) -> String {
        if self.chunks.is_empty() {
            return String::new();
        }

        let mut files: Vec<&str> = Vec::new();
        for c in &self.chunks {
            if !files.contains(&c.chunk.file_path.as_str()) {
                files.push(&c.chunk.file_path);
            }
        }

        let mut out = String::from("<code_context>\n");
        for file in files {
            let mut in_file: Vec<&ContextChunk> = self
                .chunks
                .iter()
                .filter(|c| c.chunk.file_path == file)
                .collect();
            in_file.sort_by_key(|c| c.chunk.start_line);

            let _ = writeln!(out, "  <file path=\"{file}\">");
            for c in in_file {
                let name = c.chunk.symbol_name.as_deref().unwrap_or(c.chunk.kind.as_str());
                let _ = writeln!(
                    out,
                    "    <chunk lines=\"{}-{}\" name=\"{}\" kind=\"{}\" score=\"{:.2}\">",
                    c.chunk.start_line,
                    c.chunk.end_line,
                    name,
                    c.chunk.kind,
                    c.score,
                );
                out.push_str(&c.content);
                out.push_str("\n    </chunk>\n");
            }
            out.push_str("  </file>\n");
        }
        out.push_str("</code_context>");
        out
    }
}

/// Packs ranked search hits into a token budget.
pub struct ContextAssembler {
    counter: Arc<dyn TokenCounter>,
    config: AssemblerConfig,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(Arc::new(CharEstimator), AssemblerConfig::default())
    }
}

impl std::fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAssembler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContextAssembler {
    #[must_use]
    pub fn new(counter: Arc<dyn TokenCounter>, config: AssemblerConfig) -> Self {
        Self { counter, config }
    }

    /// Context budget for a model with a `window`-token context: whatever the
    /// system prompt and the expected output leave free, scaled by
    /// `target_utilization`. Feed it to [`assemble`](Self::assemble) as
    /// `max_tokens`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn budget_for(&self, window: usize, system: usize, output: usize) -> usize {
        let free = window.saturating_sub(system).saturating_sub(output);
        let utilization = f64::from(self.config.target_utilization.clamp(0.0, 1.0));
        (free as f64 * utilization).floor() as usize
    }

    /// Split [`budget_for`](Self::budget_for) across categories using the
    /// configured [`BudgetStrategy`].
    #[must_use]
    pub fn allocate(&self, window: usize, system: usize, output: usize) -> BudgetAllocation {
        let budget = self.budget_for(window, system, output);
        let [definitions, relevant, context, patterns] = self
            .config
            .budget_strategy
            .shares()
            .map(|pct| budget * pct / 100);
        BudgetAllocation {
            definitions,
            relevant,
            context,
            patterns,
        }
    }

    /// Assemble `hits` into at most `max_tokens - reserve_tokens` tokens.
    #[must_use]
    pub fn assemble(
        &self,
        hits: &[SearchHit],
        query: &str,
        max_tokens: usize,
        reserve_tokens: usize,
    ) -> AssembledContext {
        self.assemble_with_background(hits, &[], query, max_tokens, reserve_tokens)
    }

    /// Like [`assemble`](Self::assemble), with extra `background` hits
    /// (file overviews, neighbouring code) weighted as [`Priority::Background`].
    #[must_use]
    pub fn assemble_with_background(
        &self,
        hits: &[SearchHit],
        background: &[SearchHit],
        query: &str,
        max_tokens: usize,
        reserve_tokens: usize,
    ) -> AssembledContext {
        let candidates: Vec<ContextChunk> = hits
            .iter()
            .map(|h| self.candidate(h, Priority::classify(&h.chunk, h.score, query)))
            .chain(background.iter().map(|h| self.candidate(h, Priority::Background)))
            .collect();
        let offered = candidates.len();

        let mut chunks = deduplicate(candidates);
        chunks.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));

        let available = max_tokens.saturating_sub(reserve_tokens);
        let mut used = 0usize;
        let mut selected = Vec::with_capacity(chunks.len());
        let mut truncated_chunks = 0usize;

        for mut c in chunks {
            if used >= available {
                continue;
            }
            let remaining = available - used;
            if c.tokens <= remaining {
                used += c.tokens;
                selected.push(c);
            } else if remaining > self.config.min_truncation_tokens
                && let Some((content, tokens)) = self.truncate(&c.content, remaining)
            {
                tracing::debug!(
                    file = %c.chunk.file_path,
                    from = c.tokens,
                    to = tokens,
                    "truncating chunk to fit budget"
                );
                c.content = content;
                c.tokens = tokens;
                c.truncated = true;
                used += tokens;
                truncated_chunks += 1;
                selected.push(c);
            }
        }

        let dropped_chunks = offered - selected.len();
        let files_included = selected
            .iter()
            .map(|c| c.chunk.file_path.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        let symbols_included = selected
            .iter()
            .filter_map(|c| c.chunk.symbol_name.as_deref())
            .collect::<BTreeSet<_>>()
            .len();
        #[allow(clippy::cast_precision_loss)]
        let budget_used = if max_tokens == 0 {
            0.0
        } else {
            used as f32 / max_tokens as f32
        };

        tracing::debug!(
            offered,
            selected = selected.len(),
            tokens = used,
            available,
            truncated = truncated_chunks,
            "context assembled"
        );

        AssembledContext {
            chunks: order_for_prompt(selected),
            total_tokens: used,
            budget_used,
            files_included,
            symbols_included,
            truncated_chunks,
            dropped_chunks,
        }
    }

    fn candidate(&self, hit: &SearchHit, priority: Priority) -> ContextChunk {
        ContextChunk {
            tokens: self.counter.count_tokens(&hit.chunk.content),
            content: hit.chunk.content.clone(),
            chunk: hit.chunk.clone(),
            score: hit.score,
            priority,
            truncated: false,
        }
    }

    /// Cut `content` so that it plus the marker fits in `budget` tokens.
    fn truncate(&self, content: &str, budget: usize) -> Option<(String, usize)> {
        let marker = &self.config.truncation_marker;
        let mut target = budget.saturating_sub(self.counter.count_tokens(marker));
        loop {
            let mut cut = self.counter.truncate_to(content, target);
            cut.push_str(marker);
            let tokens = self.counter.count_tokens(&cut);
            if tokens <= budget {
                return Some((cut, tokens));
            }
            if target == 0 {
                return None;
            }
            target -= 1;
        }
    }
}

/// Collapse overlapping chunks of one file, best effective score first.
///
/// A later chunk replaces the kept ones it overlaps only if it encloses all
/// of them; otherwise it is dropped.
fn deduplicate(mut chunks: Vec<ContextChunk>) -> Vec<ContextChunk> {
    chunks.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
    let mut kept: Vec<ContextChunk> = Vec::with_capacity(chunks.len());
    for c in chunks {
        let overlapping: Vec<usize> = kept
            .iter()
            .enumerate()
            .filter(|(_, k)| k.chunk.overlaps(&c.chunk))
            .map(|(i, _)| i)
            .collect();
        if overlapping.is_empty() {
            kept.push(c);
        } else if overlapping.iter().all(|&i| c.chunk.contains(&kept[i].chunk)) {
            for i in overlapping.into_iter().rev() {
                kept.remove(i);
            }
            kept.push(c);
        }
    }
    kept
}

/// Definitions first by (file, symbol), then the rest by effective score.
fn order_for_prompt(chunks: Vec<ContextChunk>) -> Vec<ContextChunk> {
    let (mut definitions, mut rest): (Vec<_>, Vec<_>) =
        chunks.into_iter().partition(|c| c.chunk.kind.is_definition());
    definitions.sort_by(|a, b| {
        (&a.chunk.file_path, &a.chunk.symbol_name).cmp(&(&b.chunk.file_path, &b.chunk.symbol_name))
    });
    rest.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
    definitions.extend(rest);
    definitions
}
