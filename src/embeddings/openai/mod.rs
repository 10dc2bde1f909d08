#[cfg(test)]
mod tests;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Embedding, EmbeddingProvider, check_dimensions, run_blocking, validate_texts};
use crate::config::OpenAiConfig;
use crate::retry::{RetryPolicy, build_agent, send_with_retry};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Client for a managed, OpenAI-compatible embedding service
#[derive(Clone)]
pub struct OpenAiClient {
    endpoint: String,
    model: String,
    api_key: String,
    batch_size: u32,
    dimension: usize,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &OpenAiConfig, api_key: String, dimension: usize) -> Self {
        Self {
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            batch_size: config.batch_size.max(1),
            dimension,
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry: RetryPolicy::default(),
        }
    }

    /// Read the API key from the environment variable named in the config
    #[inline]
    pub fn from_env(config: &OpenAiConfig, dimension: usize) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "Embedding API key not found in environment variable {}",
                    config.api_key_env
                )
            })?;
        Ok(Self::new(config, api_key, dimension))
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size as usize) {
            let batch = self
                .generate_embeddings_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;
            results.extend(batch);
        }
        Ok(results)
    }

    fn generate_embeddings_single_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        debug!(
            "Requesting {} embeddings from {} with model {}",
            texts.len(),
            self.endpoint,
            self.model
        );

        let request_json = serde_json::to_string(&EmbeddingsRequest {
            model: &self.model,
            input: texts,
        })
        .context("Failed to serialize embedding request")?;
        let authorization = format!("Bearer {}", self.api_key);

        let response_text = send_with_retry(&self.retry, &self.endpoint, || {
            self.agent
                .post(self.endpoint.as_str())
                .header("Authorization", authorization.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to generate embeddings")?;

        let mut response: EmbeddingsResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.data.len() != texts.len() {
            return Err(anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.data.len()
            ));
        }

        // the service may answer out of order
        response.data.sort_by_key(|item| item.index);
        Ok(response.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Embedding>> {
        validate_texts(texts)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.clone();
        let texts = texts.to_vec();
        let embeddings =
            run_blocking("openai", move || client.generate_embeddings_batch(&texts)).await?;

        check_dimensions("openai", self.dimension, &embeddings)?;
        Ok(embeddings)
    }
}
