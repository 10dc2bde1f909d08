// Variant generation
// Paraphrase providers that expand a canonical question at ingest time


pub mod anthropic;
pub mod builtin;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tracing::info;

use crate::config::{Config, VariantProviderKind};
use crate::{IntentCacheError, Result};

pub use anthropic::AnthropicVariantProvider;
pub use builtin::BuiltinVariantProvider;

/// Expands one canonical question into paraphrases.
///
/// Returns at most `count` strings. Providers should not repeat the
/// question or themselves, but callers still pass the output through
/// [`dedup_variants`] before storing it. An `Err` is reserved for
/// configuration problems and strict-mode failures; a provider that cannot
/// reach its backend otherwise returns fewer variants, possibly none.
#[async_trait]
pub trait VariantProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, question: &str, count: usize) -> Result<Vec<String>>;
}

/// Build the provider selected in the configuration
#[inline]
pub fn from_config(config: &Config) -> Result<Arc<dyn VariantProvider>> {
    let provider: Arc<dyn VariantProvider> = match config.variants.provider {
        VariantProviderKind::Builtin => Arc::new(BuiltinVariantProvider::new()),
        VariantProviderKind::Anthropic => Arc::new(
            AnthropicVariantProvider::from_env(&config.variants.anthropic, config.variants.strict)
                .map_err(|e| IntentCacheError::VariantProvider(format!("{:#}", e)))?,
        ),
    };

    info!("Using {} variant provider", provider.name());
    Ok(provider)
}

/// Case and whitespace insensitive comparison key
#[inline]
pub fn normalize(text: &str) -> String {
    text.split_whitespace().join(" ").to_lowercase()
}

/// Trim `candidates`, drop blanks and anything that normalizes to an entry
/// of `existing` or to an earlier candidate, then keep at most `limit`.
#[inline]
pub fn dedup_variants<I, S>(existing: &[String], candidates: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let taken: HashSet<String> = existing.iter().map(|e| normalize(e)).collect();

    candidates
        .into_iter()
        .map(|candidate| candidate.as_ref().trim().to_string())
        .filter(|candidate| !candidate.is_empty())
        .unique_by(|candidate| normalize(candidate))
        .filter(|candidate| !taken.contains(&normalize(candidate)))
        .take(limit)
        .collect()
}
