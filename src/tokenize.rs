//! Tokenizers for BM25.
//!
//! Any `Fn(&str) -> Vec<String>` is a tokenizer, so callers can plug in their own
//! normalization (stemming, stop words, ...) without a wrapper type.

/// Splits text into terms.
pub trait Tokenizer: Send + Sync {
    /// Tokenize `text` into an ordered sequence of terms.
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Split on Unicode whitespace, keeping case and punctuation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Whitespace;

impl Tokenizer for Whitespace {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn tokenize(&self, text: &str) -> Vec<String> {
        self(text)
    }
}
