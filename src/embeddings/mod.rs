// Embeddings module
// Provider contract plus the Ollama (self-hosted) and OpenAI-compatible (managed) clients

#[cfg(test)]
mod tests;

pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::{Config, EmbeddingProviderKind};
use crate::{IntentCacheError, Result};

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

pub type Embedding = Vec<f32>;

/// Turns text into fixed-length vectors.
///
/// Every vector a provider returns has exactly [`EmbeddingProvider::dimension`]
/// components. Implementations are interchangeable as long as the index is
/// configured with the same dimension.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Declared output dimension
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| {
                IntentCacheError::EmbeddingProvider(format!(
                    "{} returned no embedding",
                    self.name()
                ))
            })
    }
}

/// Build the provider selected in the configuration
#[inline]
pub fn from_config(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let dimension = config.index.vector_dim as usize;
    let timeout = Duration::from_secs(config.embedding.timeout_secs);

    let provider: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
        EmbeddingProviderKind::Ollama => Arc::new(
            OllamaClient::new(&config.embedding.ollama, dimension)
                .map_err(|e| IntentCacheError::Config(format!("{:#}", e)))?
                .with_timeout(timeout),
        ),
        EmbeddingProviderKind::OpenAi => Arc::new(
            OpenAiClient::from_env(&config.embedding.openai, dimension)
                .map_err(|e| IntentCacheError::Config(format!("{:#}", e)))?
                .with_timeout(timeout),
        ),
    };

    info!(
        "Using {} embedding provider with model {} ({} dimensions)",
        provider.name(),
        provider.model(),
        provider.dimension()
    );
    Ok(provider)
}

/// Cosine similarity of two vectors, `None` when their lengths differ
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Some(0.0);
    }

    Some(dot_product / (magnitude_a * magnitude_b))
}

/// Reject blank inputs before they reach a provider
pub(crate) fn validate_texts(texts: &[String]) -> Result<()> {
    if let Some(position) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(IntentCacheError::Validation(format!(
            "text at position {} is empty",
            position
        )));
    }
    Ok(())
}

/// Fail when a provider's output disagrees with its declared dimension
pub(crate) fn check_dimensions(
    provider: &str,
    expected: usize,
    embeddings: &[Embedding],
) -> Result<()> {
    if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
        return Err(IntentCacheError::EmbeddingProvider(format!(
            "{} returned a {}-dimensional vector, expected {}",
            provider,
            bad.len(),
            expected
        )));
    }
    Ok(())
}

/// Run a blocking HTTP client call on the blocking pool
pub(crate) async fn run_blocking<T, F>(provider: &str, call: F) -> Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| IntentCacheError::EmbeddingProvider(format!("{} task failed: {}", provider, e)))?
        .map_err(|e| IntentCacheError::EmbeddingProvider(format!("{}: {:#}", provider, e)))
}
