use thiserror::Error;

pub type Result<T> = std::result::Result<T, IntentCacheError>;

#[derive(Error, Debug)]
pub enum IntentCacheError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Variant provider error: {0}")]
    VariantProvider(String),

    #[error("Index schema conflict: {0}")]
    IndexSchemaConflict(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl IntentCacheError {
    /// Only engine connectivity failures are worth another attempt
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_))
    }
}

impl From<config::ConfigError> for IntentCacheError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod retry;
pub mod store;
pub mod variants;
