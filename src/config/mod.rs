// Configuration management module
// TOML settings plus the interactive editor used by `intent-cache config`

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    AnthropicConfig, Config, ConfigError, DistanceMetric, EmbeddingConfig, EmbeddingProviderKind,
    IndexConfig, MatchingConfig, OllamaConfig, OpenAiConfig, VariantConfig, VariantProviderKind,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
