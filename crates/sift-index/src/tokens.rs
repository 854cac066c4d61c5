//! Token counting used by the chunker's size checks and the context budget.

/// Rough token estimate: one token per four characters.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Counts and truncates text in downstream-consumer tokens.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    /// Longest prefix of `text` whose token count is at most `max_tokens`,
    /// cut on a token boundary.
    fn truncate_to(&self, text: &str, max_tokens: usize) -> String;
}

/// Character-based [`TokenCounter`] matching [`estimate_tokens`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl TokenCounter for CharEstimator {
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    fn truncate_to(&self, text: &str, max_tokens: usize) -> String {
        let max_chars = max_tokens.saturating_mul(4);
        match text.char_indices().nth(max_chars) {
            Some((byte, _)) => text[..byte].to_string(),
            None => text.to_string(),
        }
    }
}

/// [`TokenCounter`] backed by a Hugging Face `tokenizers` model.
#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenizer {
    /// Load a `tokenizer.json` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl std::fmt::Debug for HfTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfTokenizer").finish_non_exhaustive()
    }
}

#[cfg(feature = "hf-tokenizer")]
impl TokenCounter for HfTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        match self.inner.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::warn!("tokenizer encode failed, using estimate: {e}");
                estimate_tokens(text)
            }
        }
    }

    fn truncate_to(&self, text: &str, max_tokens: usize) -> String {
        let Ok(encoding) = self.inner.encode(text, false) else {
            return CharEstimator.truncate_to(text, max_tokens);
        };
        if encoding.len() <= max_tokens {
            return text.to_string();
        }
        if max_tokens == 0 {
            return String::new();
        }
        let end = encoding
            .get_offsets()
            .get(max_tokens - 1)
            .map_or(0, |&(_, end)| end);
        let mut end = end.min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}
