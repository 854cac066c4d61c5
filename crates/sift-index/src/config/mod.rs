//! Runtime configuration: TOML file, defaults, then `SIFT_*` environment overrides.

mod env;
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::assembler::BudgetStrategy;
use crate::chunker::ChunkerConfig;
use crate::error::Result;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SiftConfig {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub assembler: AssemblerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl SiftConfig {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to sensible defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IndexConfig {
    /// State file, relative to the repository root.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_chunk_collection")]
    pub chunk_collection: String,
    #[serde(default = "default_symbol_collection")]
    pub symbol_collection: String,
    /// Maximum concurrent embedding calls.
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
    /// Quiet period per path before a watcher event is reconciled.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Dense vector length. When unset it is taken from the persisted state,
    /// or measured from the embedder on the very first pass.
    #[serde(default)]
    pub vector_size: Option<u64>,
    /// Age after which a leftover reconciliation lock is reclaimed.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
    #[serde(default)]
    pub chunker: ChunkerConfig,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".sift/index_state.json")
}

fn default_chunk_collection() -> String {
    "code_chunks".into()
}

fn default_symbol_collection() -> String {
    "code_symbols".into()
}

fn default_embed_concurrency() -> usize {
    32
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_stale_lock_secs() -> u64 {
    3600
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            chunk_collection: default_chunk_collection(),
            symbol_collection: default_symbol_collection(),
            embed_concurrency: default_embed_concurrency(),
            debounce_ms: default_debounce_ms(),
            vector_size: None,
            stale_lock_secs: default_stale_lock_secs(),
            chunker: ChunkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
    /// Candidate window multiplier for each list fed into fusion.
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    /// Symbol hit score above which multi-level search stops early.
    #[serde(default = "default_exact_threshold")]
    pub exact_threshold: f32,
    #[serde(default = "default_symbol_boost")]
    pub symbol_boost: f32,
    #[serde(default = "default_rerank")]
    pub rerank: bool,
}

fn default_search_limit() -> usize {
    10
}

fn default_overfetch() -> usize {
    3
}

fn default_rrf_k() -> f32 {
    60.0
}

fn default_exact_threshold() -> f32 {
    0.9
}

fn default_symbol_boost() -> f32 {
    1.2
}

fn default_rerank() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            overfetch: default_overfetch(),
            rrf_k: default_rrf_k(),
            exact_threshold: default_exact_threshold(),
            symbol_boost: default_symbol_boost(),
            rerank: default_rerank(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AssemblerConfig {
    /// A chunk is truncated into the remaining budget only when more than
    /// this many tokens remain.
    #[serde(default = "default_min_truncation_tokens")]
    pub min_truncation_tokens: usize,
    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,
    /// Share of the free model window handed to retrieved context.
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f32,
    #[serde(default)]
    pub budget_strategy: BudgetStrategy,
}

fn default_min_truncation_tokens() -> usize {
    100
}

fn default_truncation_marker() -> String {
    "\n... (truncated)".into()
}

fn default_target_utilization() -> f32 {
    0.6
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            min_truncation_tokens: default_min_truncation_tokens(),
            truncation_marker: default_truncation_marker(),
            target_utilization: default_target_utilization(),
            budget_strategy: BudgetStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
        }
    }
}
