
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const APP_DIR_NAME: &str = "intent-cache";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub variants: VariantConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Distance metric of the vector field. Cosine is the only metric the
/// similarity conversion is defined for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
}

impl DistanceMetric {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub name: String,
    pub key_prefix: String,
    pub vector_dim: u32,
    pub distance_metric: DistanceMetric,
    pub ef_construction: u32,
    pub m: u32,
    pub retry_attempts: u32,
    /// Location of the LanceDB database. Defaults to `<config dir>/vectors`.
    pub uri: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "intent_variants".to_string(),
            key_prefix: "sc:doc:".to_string(),
            vector_dim: 768,
            distance_metric: DistanceMetric::Cosine,
            ef_construction: 200,
            m: 16,
            retry_attempts: 3,
            uri: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub timeout_secs: u64,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Ollama,
            timeout_secs: 30,
            ollama: OllamaConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub batch_size: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariantProviderKind {
    #[default]
    Builtin,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct VariantConfig {
    pub provider: VariantProviderKind,
    /// Fail ingest instead of storing the canonical question alone when
    /// the variant service is unavailable
    pub strict: bool,
    pub anthropic: AnthropicConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 1000,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchingConfig {
    pub overfetch_factor: u32,
    pub default_top_k: u32,
    pub default_min_similarity: f32,
    pub default_auto_variants: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 4,
            default_top_k: 5,
            default_min_similarity: 0.0,
            default_auto_variants: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid index name: {0:?} (letters, digits, '_' and '-' only)")]
    InvalidIndexName(String),
    #[error("Invalid key prefix: {0:?} (cannot be empty or contain whitespace)")]
    InvalidKeyPrefix(String),
    #[error("Invalid vector dimension: {0} (must be between 8 and 4096)")]
    InvalidVectorDimension(u32),
    #[error("Invalid ef_construction: {0} (must be between 16 and 2000)")]
    InvalidEfConstruction(u32),
    #[error("Invalid M: {0} (must be between 2 and 128)")]
    InvalidM(u32),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid timeout: {0}s (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid API key variable name: {0:?} (cannot be empty)")]
    InvalidApiKeyEnv(String),
    #[error("Invalid max tokens: {0} (must be between 16 and 8192)")]
    InvalidMaxTokens(u32),
    #[error("Invalid over-fetch factor: {0} (must be between 1 and 20)")]
    InvalidOverfetchFactor(u32),
    #[error("Invalid default top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(u32),
    #[error("Invalid default min similarity: {0} (must be between 0.0 and 1.0)")]
    InvalidMinSimilarity(f32),
    #[error("Invalid default auto variants: {0} (must be 100 or less)")]
    InvalidAutoVariants(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            variants: VariantConfig::default(),
            matching: MatchingConfig::default(),
            base_dir: Self::config_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Per-user configuration directory, `<config dir>/intent-cache`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// URI of the LanceDB database holding the variant index
    #[inline]
    pub fn index_uri(&self) -> String {
        self.index
            .uri
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("vectors").display().to_string())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.index.validate()?;
        self.embedding.validate()?;
        self.variants.validate()?;
        self.matching.validate()?;
        Ok(())
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidIndexName(self.name.clone()));
        }

        if self.key_prefix.is_empty() || self.key_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidKeyPrefix(self.key_prefix.clone()));
        }

        if !(8..=4096).contains(&self.vector_dim) {
            return Err(ConfigError::InvalidVectorDimension(self.vector_dim));
        }

        if !(16..=2000).contains(&self.ef_construction) {
            return Err(ConfigError::InvalidEfConstruction(self.ef_construction));
        }

        if !(2..=128).contains(&self.m) {
            return Err(ConfigError::InvalidM(self.m));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn set_vector_dim(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(8..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidVectorDimension(dimension));
        }
        self.vector_dim = dimension;
        Ok(())
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout(self.timeout_secs)?;
        match self.provider {
            EmbeddingProviderKind::Ollama => self.ollama.validate(),
            EmbeddingProviderKind::OpenAi => self.openai.validate(),
        }
    }

    /// Model identifier of the selected provider
    #[inline]
    pub fn model(&self) -> &str {
        match self.provider {
            EmbeddingProviderKind::Ollama => &self.ollama.model,
            EmbeddingProviderKind::OpenAi => &self.openai.model,
        }
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        validate_batch_size(self.batch_size)
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        validate_batch_size(batch_size)?;
        self.batch_size = batch_size;
        Ok(())
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.api_key_env.trim().is_empty() {
            return Err(ConfigError::InvalidApiKeyEnv(self.api_key_env.clone()));
        }

        validate_batch_size(self.batch_size)
    }
}

impl VariantConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.provider {
            VariantProviderKind::Builtin => Ok(()),
            VariantProviderKind::Anthropic => self.anthropic.validate(),
        }
    }

    /// Model identifier of the selected provider, if it has one
    #[inline]
    pub fn model(&self) -> Option<&str> {
        match self.provider {
            VariantProviderKind::Builtin => None,
            VariantProviderKind::Anthropic => Some(&self.anthropic.model),
        }
    }
}

impl AnthropicConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.api_key_env.trim().is_empty() {
            return Err(ConfigError::InvalidApiKeyEnv(self.api_key_env.clone()));
        }

        if !(16..=8192).contains(&self.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        validate_timeout(self.timeout_secs)
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=20).contains(&self.overfetch_factor) {
            return Err(ConfigError::InvalidOverfetchFactor(self.overfetch_factor));
        }

        if !(1..=100).contains(&self.default_top_k) {
            return Err(ConfigError::InvalidTopK(self.default_top_k));
        }

        if !(0.0..=1.0).contains(&self.default_min_similarity) {
            return Err(ConfigError::InvalidMinSimilarity(
                self.default_min_similarity,
            ));
        }

        if self.default_auto_variants > 100 {
            return Err(ConfigError::InvalidAutoVariants(self.default_auto_variants));
        }

        Ok(())
    }
}

fn validate_batch_size(batch_size: u32) -> Result<(), ConfigError> {
    if batch_size == 0 || batch_size > 1000 {
        return Err(ConfigError::InvalidBatchSize(batch_size));
    }
    Ok(())
}

fn validate_timeout(timeout_secs: u64) -> Result<(), ConfigError> {
    if !(1..=600).contains(&timeout_secs) {
        return Err(ConfigError::InvalidTimeout(timeout_secs));
    }
    Ok(())
}
