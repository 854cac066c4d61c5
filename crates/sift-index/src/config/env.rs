use super::SiftConfig;

impl SiftConfig {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SIFT_QDRANT_URL") {
            self.store.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("SIFT_STATE_PATH") {
            self.index.state_path = v.into();
        }
        if let Ok(v) = std::env::var("SIFT_EMBED_CONCURRENCY") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => self.index.embed_concurrency = n,
                _ => tracing::warn!("ignoring invalid SIFT_EMBED_CONCURRENCY value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("SIFT_DEBOUNCE_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.index.debounce_ms = ms;
            } else {
                tracing::warn!("ignoring invalid SIFT_DEBOUNCE_MS value: {v}");
            }
        }
        if let Ok(v) = std::env::var("SIFT_VECTOR_SIZE") {
            match v.parse::<u64>() {
                Ok(n) if n > 0 => self.index.vector_size = Some(n),
                _ => tracing::warn!("ignoring invalid SIFT_VECTOR_SIZE value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("SIFT_SEARCH_LIMIT") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => self.search.default_limit = n,
                _ => tracing::warn!("ignoring invalid SIFT_SEARCH_LIMIT value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("SIFT_OVERFETCH") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => self.search.overfetch = n,
                _ => tracing::warn!("ignoring invalid SIFT_OVERFETCH value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("SIFT_RERANK")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.search.rerank = enabled;
        }
        if let Ok(v) = std::env::var("SIFT_MIN_TRUNCATION_TOKENS") {
            if let Ok(n) = v.parse::<usize>() {
                self.assembler.min_truncation_tokens = n;
            } else {
                tracing::warn!("ignoring invalid SIFT_MIN_TRUNCATION_TOKENS value: {v}");
            }
        }
    }
}
