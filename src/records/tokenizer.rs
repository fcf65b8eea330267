//! Token counting
//!
//! Real tokenizers are external collaborators keyed by model; the cache
//! here is read-mostly and populated on first use. The built-in
//! approximation keeps token-count metrics defined when no model
//! tokenizer is wired in.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain_types::ModelName;

pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> u64;
}

/// Character-based approximation (~4 characters per token), the common
/// rule of thumb for latin-script LLM vocabularies.
pub struct ApproximateTokenizer;

impl Tokenizer for ApproximateTokenizer {
    fn count(&self, text: &str) -> u64 {
        let chars = text.chars().count() as u64;
        if chars == 0 {
            0
        } else {
            chars.div_ceil(4)
        }
    }
}

/// Per-model tokenizer cache.
pub struct TokenizerCache {
    tokenizers: RwLock<HashMap<ModelName, Arc<dyn Tokenizer>>>,
}

impl Default for TokenizerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenizerCache {
    pub fn new() -> Self {
        Self {
            tokenizers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the tokenizer for a model, constructing it on first use.
    pub fn for_model(&self, model: &ModelName) -> Arc<dyn Tokenizer> {
        if let Some(tokenizer) = self
            .tokenizers
            .read()
            .ok()
            .and_then(|map| map.get(model).cloned())
        {
            return tokenizer;
        }
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(ApproximateTokenizer);
        if let Ok(mut map) = self.tokenizers.write() {
            map.entry(model.clone()).or_insert_with(|| tokenizer.clone());
        }
        tokenizer
    }

    /// Counts tokens across several texts.
    pub fn count_all(&self, model: &ModelName, texts: &[String]) -> u64 {
        let tokenizer = self.for_model(model);
        texts.iter().map(|text| tokenizer.count(text)).sum()
    }
}
