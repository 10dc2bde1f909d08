#[cfg(test)]
mod tests;

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{
    Config, ConfigError, EmbeddingProviderKind, OllamaConfig, OpenAiConfig, VariantConfig,
    VariantProviderKind,
};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Intent Cache Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Embedding Provider").bold().yellow());
    eprintln!("Every stored variant and every query is embedded with this provider.");
    eprintln!();

    configure_embedding(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Variant Provider").bold().yellow());
    eprintln!("Paraphrases generated for each canonical question at ingest time.");
    eprintln!();

    configure_variants(&mut config.variants)?;

    if config.embedding.provider == EmbeddingProviderKind::Ollama {
        eprintln!();
        eprintln!("{}", style("Testing configuration...").yellow());

        if test_ollama_connection(&config.embedding.ollama)? {
            eprintln!("{}", style("✓ Ollama connection successful!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Ollama").yellow()
            );
            eprintln!("You can continue, but make sure Ollama is running before ingesting.");
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
        eprintln!(
            "{}",
            style("Changing vector_dim requires `intent-cache rebuild-index` and a full re-ingest.")
                .dim()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Index Settings:").bold().yellow());
    eprintln!("  Name: {}", style(&config.index.name).cyan());
    eprintln!("  URI: {}", style(config.index_uri()).cyan());
    eprintln!("  Key Prefix: {}", style(&config.index.key_prefix).cyan());
    eprintln!("  Vector Dimension: {}", style(config.index.vector_dim).cyan());
    eprintln!(
        "  Distance Metric: {}",
        style(config.index.distance_metric.as_str()).cyan()
    );
    eprintln!(
        "  HNSW: M={} ef_construction={}",
        style(config.index.m).cyan(),
        style(config.index.ef_construction).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    match config.embedding.provider {
        EmbeddingProviderKind::Ollama => {
            eprintln!("  Provider: {}", style("ollama").cyan());
            match config.embedding.ollama.ollama_url() {
                Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
                Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
            }
            eprintln!(
                "  Batch Size: {}",
                style(config.embedding.ollama.batch_size).cyan()
            );
        }
        EmbeddingProviderKind::OpenAi => {
            eprintln!("  Provider: {}", style("openai").cyan());
            eprintln!(
                "  Base URL: {}",
                style(&config.embedding.openai.base_url).cyan()
            );
            eprintln!(
                "  API Key Variable: {}",
                style(&config.embedding.openai.api_key_env).cyan()
            );
        }
    }
    eprintln!("  Model: {}", style(config.embedding.model()).cyan());

    eprintln!();
    eprintln!("{}", style("Variant Settings:").bold().yellow());
    match config.variants.provider {
        VariantProviderKind::Builtin => {
            eprintln!("  Provider: {}", style("builtin").cyan());
        }
        VariantProviderKind::Anthropic => {
            eprintln!("  Provider: {}", style("anthropic").cyan());
            eprintln!("  Model: {}", style(&config.variants.anthropic.model).cyan());
            eprintln!("  Strict: {}", style(config.variants.strict).cyan());
        }
    }

    eprintln!();
    eprintln!("{}", style("Matching Settings:").bold().yellow());
    eprintln!(
        "  Over-fetch Factor: {}",
        style(config.matching.overfetch_factor).cyan()
    );
    eprintln!("  Default top_k: {}", style(config.matching.default_top_k).cyan());
    eprintln!(
        "  Default Min Similarity: {}",
        style(config.matching.default_min_similarity).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    let path = config_dir.join(super::settings::CONFIG_FILE_NAME);
    if path.exists() {
        let config = Config::load(config_dir)?;
        eprintln!("{}", style("Found existing configuration.").green());
        Ok(config)
    } else {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
        Ok(Config {
            base_dir: config_dir.to_path_buf(),
            ..Config::default()
        })
    }
}

fn configure_embedding(config: &mut Config) -> Result<()> {
    let providers = &["ollama", "openai"];
    let default_index = match config.embedding.provider {
        EmbeddingProviderKind::Ollama => 0,
        EmbeddingProviderKind::OpenAi => 1,
    };

    let provider_index = Select::new()
        .with_prompt("Embedding provider")
        .default(default_index)
        .items(providers)
        .interact()?;

    if provider_index == 0 {
        config.embedding.provider = EmbeddingProviderKind::Ollama;
        configure_ollama(&mut config.embedding.ollama)?;
    } else {
        config.embedding.provider = EmbeddingProviderKind::OpenAi;
        configure_openai(&mut config.embedding.openai)?;
    }

    let vector_dim: u32 = Input::new()
        .with_prompt("Vector dimension (must match the embedding model)")
        .default(config.index.vector_dim)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (8..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 8 and 4096")
            }
        })
        .interact_text()?;

    config.index.set_vector_dim(vector_dim)?;
    Ok(())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_openai(openai: &mut OpenAiConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("Embedding service base URL")
        .default(openai.base_url.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            url::Url::parse(input)
                .map(|_| ())
                .map_err(|_| "Must be an absolute URL")
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(openai.model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let api_key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(openai.api_key_env.clone())
        .validate_with(non_empty)
        .interact_text()?;

    openai.base_url = base_url;
    openai.model = model;
    openai.api_key_env = api_key_env;
    openai.validate()?;
    Ok(())
}

fn configure_variants(variants: &mut VariantConfig) -> Result<()> {
    let providers = &["builtin", "anthropic"];
    let default_index = match variants.provider {
        VariantProviderKind::Builtin => 0,
        VariantProviderKind::Anthropic => 1,
    };

    let provider_index = Select::new()
        .with_prompt("Variant provider")
        .default(default_index)
        .items(providers)
        .interact()?;

    if provider_index == 0 {
        variants.provider = VariantProviderKind::Builtin;
        return Ok(());
    }

    variants.provider = VariantProviderKind::Anthropic;

    let model: String = Input::new()
        .with_prompt("Anthropic model")
        .default(variants.anthropic.model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let api_key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(variants.anthropic.api_key_env.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let strict = Confirm::new()
        .with_prompt("Fail ingest when variant generation is unavailable?")
        .default(variants.strict)
        .interact()?;

    variants.anthropic.model = model;
    variants.anthropic.api_key_env = api_key_env;
    variants.strict = strict;
    variants.validate()?;
    Ok(())
}

fn non_empty(input: &String) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Value cannot be empty")
    } else {
        Ok(())
    }
}

fn test_ollama_connection(ollama: &OllamaConfig) -> Result<bool> {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => Ok(true),
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => Ok(true),
        Err(_) => Ok(false),
    }
}
