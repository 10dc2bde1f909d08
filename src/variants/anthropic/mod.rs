#[cfg(test)]
mod tests;

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{VariantProvider, dedup_variants};
use crate::config::AnthropicConfig;
use crate::retry::{RetryPolicy, build_agent, send_with_retry};
use crate::{IntentCacheError, Result};

const API_VERSION: &str = "2023-06-01";
const TEMPERATURE: f32 = 0.7;

/// Numbering or bullet prefix a model may add despite being told not to
static LIST_MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+\s*[.):]|[-*•])\s*").expect("valid regex")
});

/// Paraphrases from the Anthropic Messages API.
///
/// Outside strict mode an unreachable or misbehaving service is logged and
/// yields no variants, so ingest still stores the canonical question.
#[derive(Clone)]
pub struct AnthropicVariantProvider {
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    strict: bool,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl std::fmt::Debug for AnthropicVariantProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicVariantProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicVariantProvider {
    #[inline]
    pub fn new(config: &AnthropicConfig, api_key: String, strict: bool) -> Self {
        Self {
            endpoint: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            strict,
            agent: build_agent(Duration::from_secs(config.timeout_secs)),
            retry: RetryPolicy::default(),
        }
    }

    /// Read the API key from the environment variable named in the config
    #[inline]
    pub fn from_env(config: &AnthropicConfig, strict: bool) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "Variant service API key not found in environment variable {}",
                    config.api_key_env
                )
            })?;
        Ok(Self::new(config, api_key, strict))
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Send one paraphrase request and return the raw completion text
    #[inline]
    pub fn request_completion(&self, question: &str, count: usize) -> anyhow::Result<String> {
        debug!(
            "Requesting {} paraphrases from {} with model {}",
            count, self.endpoint, self.model
        );

        let request_json = serde_json::to_string(&MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
            messages: [Message {
                role: "user",
                content: build_prompt(question, count),
            }],
        })
        .context("Failed to serialize paraphrase request")?;

        let response_text = send_with_retry(&self.retry, &self.endpoint, || {
            self.agent
                .post(self.endpoint.as_str())
                .header("x-api-key", self.api_key.as_str())
                .header("anthropic-version", API_VERSION)
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to generate paraphrases")?;

        let response: MessagesResponse = serde_json::from_str(&response_text)
            .context("Failed to parse paraphrase response")?;

        let text = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(anyhow!("Paraphrase response contained no text"));
        }
        Ok(text)
    }
}

#[async_trait]
impl VariantProvider for AnthropicVariantProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, question: &str, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let client = self.clone();
        let prompt_question = question.to_string();
        let completion = tokio::task::spawn_blocking(move || {
            client.request_completion(&prompt_question, count)
        })
        .await
        .map_err(|e| anyhow!("paraphrase task failed: {}", e))
        .and_then(|result| result);

        match completion {
            Ok(text) => {
                let variants = dedup_variants(&[question.to_string()], parse_variants(&text), count);
                if variants.len() < count {
                    warn!(
                        "Generated {} variants instead of requested {} for: {}",
                        variants.len(),
                        count,
                        question
                    );
                }
                Ok(variants)
            }
            Err(e) if self.strict => Err(IntentCacheError::VariantProvider(format!(
                "anthropic: {:#}",
                e
            ))),
            Err(e) => {
                warn!("Variant generation failed, storing question only: {:#}", e);
                Ok(Vec::new())
            }
        }
    }
}

/// Prompt asking for plain, one-per-line paraphrases
#[inline]
pub fn build_prompt(question: &str, count: usize) -> String {
    format!(
        "Generate {count} distinct paraphrases of the following question. \
         Keep the same meaning and intent, vary the wording and phrasing, and keep \
         each one natural and conversational. Return only the paraphrases, one per \
         line, without numbering or bullets.\n\n\
         Original question: {question}\n\n\
         Paraphrases:"
    )
}

/// Split a completion into lines with list markers removed
#[inline]
pub fn parse_variants(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| LIST_MARKER_REGEX.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
