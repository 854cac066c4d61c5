use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 9] = [
    "SIFT_QDRANT_URL",
    "SIFT_STATE_PATH",
    "SIFT_EMBED_CONCURRENCY",
    "SIFT_DEBOUNCE_MS",
    "SIFT_VECTOR_SIZE",
    "SIFT_SEARCH_LIMIT",
    "SIFT_OVERFETCH",
    "SIFT_RERANK",
    "SIFT_MIN_TRUNCATION_TOKENS",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults_match_documented_constants() {
    let config = SiftConfig::default();
    assert_eq!(config.index.state_path, PathBuf::from(".sift/index_state.json"));
    assert_eq!(config.index.chunk_collection, "code_chunks");
    assert_eq!(config.index.symbol_collection, "code_symbols");
    assert_eq!(config.index.embed_concurrency, 32);
    assert_eq!(config.index.debounce_ms, 500);
    assert_eq!(config.index.vector_size, None);
    assert_eq!(config.index.stale_lock_secs, 3600);
    assert_eq!(config.index.chunker.max_chunk_tokens, 512);
    assert_eq!(config.index.chunker.block_target_tokens, 400);
    assert_eq!(config.index.chunker.overlap_lines, 3);
    assert_eq!(config.search.default_limit, 10);
    assert_eq!(config.search.overfetch, 3);
    assert!((config.search.rrf_k - 60.0).abs() < f32::EPSILON);
    assert!((config.search.exact_threshold - 0.9).abs() < f32::EPSILON);
    assert!((config.search.symbol_boost - 1.2).abs() < f32::EPSILON);
    assert_eq!(config.assembler.min_truncation_tokens, 100);
    assert_eq!(config.assembler.truncation_marker, "\n... (truncated)");
    assert!((config.assembler.target_utilization - 0.6).abs() < f32::EPSILON);
    assert_eq!(
        config.assembler.budget_strategy,
        BudgetStrategy::RelevanceWeighted
    );
    assert_eq!(config.store.qdrant_url, "http://localhost:6334");
}

#[test]
#[serial]
fn missing_file_yields_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = SiftConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, SiftConfig::default());
}

#[test]
#[serial]
fn parse_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sift.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[index]
embed_concurrency = 8

[index.chunker]
max_chunk_tokens = 256

[search]
overfetch = 5
rerank = false

[assembler]
budget_strategy = "definitions_first"

[store]
qdrant_url = "http://qdrant:6334"
"#
    )
    .unwrap();

    clear_env();

    let config = SiftConfig::load(&path).unwrap();
    assert_eq!(config.index.embed_concurrency, 8);
    assert_eq!(config.index.chunker.max_chunk_tokens, 256);
    assert_eq!(config.index.chunker.overlap_lines, 3);
    assert_eq!(config.index.debounce_ms, 500);
    assert_eq!(config.search.overfetch, 5);
    assert!(!config.search.rerank);
    assert_eq!(config.search.default_limit, 10);
    assert_eq!(
        config.assembler.budget_strategy,
        BudgetStrategy::DefinitionsFirst
    );
    assert!((config.assembler.target_utilization - 0.6).abs() < f32::EPSILON);
    assert_eq!(config.store.qdrant_url, "http://qdrant:6334");
}

#[test]
#[serial]
fn invalid_toml_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[index\nembed_concurrency = ").unwrap();
    clear_env();
    let err = SiftConfig::load(&path).unwrap_err();
    assert!(matches!(err, crate::error::IndexError::Toml(_)));
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    let mut config = SiftConfig::default();

    unsafe {
        std::env::set_var("SIFT_QDRANT_URL", "http://remote:6334");
        std::env::set_var("SIFT_EMBED_CONCURRENCY", "4");
        std::env::set_var("SIFT_DEBOUNCE_MS", "250");
        std::env::set_var("SIFT_VECTOR_SIZE", "384");
        std::env::set_var("SIFT_SEARCH_LIMIT", "20");
        std::env::set_var("SIFT_OVERFETCH", "2");
        std::env::set_var("SIFT_RERANK", "false");
        std::env::set_var("SIFT_MIN_TRUNCATION_TOKENS", "64");
    };
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.store.qdrant_url, "http://remote:6334");
    assert_eq!(config.index.embed_concurrency, 4);
    assert_eq!(config.index.debounce_ms, 250);
    assert_eq!(config.index.vector_size, Some(384));
    assert_eq!(config.search.default_limit, 20);
    assert_eq!(config.search.overfetch, 2);
    assert!(!config.search.rerank);
    assert_eq!(config.assembler.min_truncation_tokens, 64);
}

#[test]
#[serial]
fn invalid_env_values_ignored() {
    clear_env();
    let mut config = SiftConfig::default();

    unsafe {
        std::env::set_var("SIFT_EMBED_CONCURRENCY", "0");
        std::env::set_var("SIFT_DEBOUNCE_MS", "soon");
        std::env::set_var("SIFT_SEARCH_LIMIT", "-1");
        std::env::set_var("SIFT_VECTOR_SIZE", "0");
    };
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.index.embed_concurrency, 32);
    assert_eq!(config.index.debounce_ms, 500);
    assert_eq!(config.search.default_limit, 10);
    assert_eq!(config.index.vector_size, None);
}
