use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use intent_cache::commands::{
    MatchArgs, build_index, delete_intent, exit_code, import_file, ingest_intent, init_index,
    list_variants, match_query, rebuild_index, report_error, show_info,
};
use intent_cache::config::{Config, get_config_dir, run_interactive_config, show_config};
use intent_cache::engine::IntentCacheEngine;

#[derive(Parser)]
#[command(name = "intent-cache")]
#[command(about = "Semantic intent cache: map user questions to known intents by embedding similarity")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the default vector database
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure embedding and variant providers
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Create the vector index if it does not exist
    Init,
    /// Store a question and its variants under an intent
    Ingest {
        #[arg(long)]
        intent: String,
        #[arg(long)]
        question: String,
        /// Number of paraphrases to generate, defaults to the configured value
        #[arg(long)]
        auto_variants: Option<usize>,
        /// Explicit variant, may be repeated
        #[arg(long = "variant")]
        variants: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Find the intents closest to a query
    Match {
        #[arg(long)]
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Minimum similarity in [0, 1]
        #[arg(long = "min-sim")]
        min_sim: Option<f32>,
        /// Only consider this intent
        #[arg(long)]
        intent: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List the stored variants of an intent
    Variants {
        #[arg(long)]
        intent: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete an intent and all of its variants
    Delete {
        #[arg(long)]
        intent: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Ingest a JSON catalog of intents
    Import {
        /// JSON array of {intent_id, question, variants?, auto_variant_count?}
        file: PathBuf,
    },
    /// Build the HNSW vector index over stored variants
    BuildIndex,
    /// Drop and recreate the index, required after changing vector_dim
    RebuildIndex {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show index and provider status
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::from(u8::try_from(exit_code(&err)).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&Config::load(&config_dir)?)?;
        } else {
            run_interactive_config(&config_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&config_dir)?;
    let engine = IntentCacheEngine::from_config(&config).await?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Init => init_index(&engine).await?,
        Commands::Ingest {
            intent,
            question,
            auto_variants,
            variants,
            json,
        } => {
            let auto_variants =
                auto_variants.unwrap_or(config.matching.default_auto_variants as usize);
            ingest_intent(&engine, &intent, &question, auto_variants, &variants, json).await?;
        }
        Commands::Match {
            query,
            top_k,
            min_sim,
            intent,
            json,
        } => {
            let args = MatchArgs {
                query,
                top_k,
                min_similarity: min_sim,
                intent,
                json,
            };
            match_query(&engine, &config, &args).await?;
        }
        Commands::Variants { intent, json } => list_variants(&engine, &intent, json).await?,
        Commands::Delete { intent, yes } => delete_intent(&engine, &intent, yes).await?,
        Commands::Import { file } => import_file(&engine, &config, &file).await?,
        Commands::BuildIndex => build_index(&engine).await?,
        Commands::RebuildIndex { yes } => rebuild_index(&engine, yes).await?,
        Commands::Info => show_info(&engine, &config).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["intent-cache", "info"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Info));
            assert_eq!(parsed.config_dir, None);
        }
    }

    #[test]
    fn ingest_command_with_repeated_variants() {
        let cli = Cli::try_parse_from([
            "intent-cache",
            "ingest",
            "--intent",
            "billing.upgrade",
            "--question",
            "How do I upgrade my plan?",
            "--auto-variants",
            "3",
            "--variant",
            "Upgrade my plan",
            "--variant",
            "Move to a bigger plan",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ingest {
                intent,
                question,
                auto_variants,
                variants,
                json,
            } = parsed.command
            {
                assert_eq!(intent, "billing.upgrade");
                assert_eq!(question, "How do I upgrade my plan?");
                assert_eq!(auto_variants, Some(3));
                assert_eq!(variants, vec!["Upgrade my plan", "Move to a bigger plan"]);
                assert!(!json);
            } else {
                panic!("expected ingest command");
            }
        }
    }

    #[test]
    fn match_command_options() {
        let cli = Cli::try_parse_from([
            "intent-cache",
            "match",
            "--query",
            "upgrade plan",
            "--top-k",
            "3",
            "--min-sim",
            "0.8",
            "--intent",
            "billing.upgrade",
            "--json",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Match {
                query,
                top_k,
                min_sim,
                intent,
                json,
            } = parsed.command
            {
                assert_eq!(query, "upgrade plan");
                assert_eq!(top_k, Some(3));
                assert_eq!(min_sim, Some(0.8));
                assert_eq!(intent.as_deref(), Some("billing.upgrade"));
                assert!(json);
            } else {
                panic!("expected match command");
            }
        }
    }

    #[test]
    fn match_requires_query() {
        let cli = Cli::try_parse_from(["intent-cache", "match"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn delete_command_with_yes() {
        let cli = Cli::try_parse_from([
            "intent-cache",
            "delete",
            "--intent",
            "billing.upgrade",
            "--yes",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(
                parsed.command,
                Commands::Delete { ref intent, yes: true } if intent == "billing.upgrade"
            ));
        }
    }

    #[test]
    fn global_config_dir() {
        let cli = Cli::try_parse_from(["intent-cache", "rebuild-index", "--config-dir", "/tmp/ic"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/ic")));
            assert!(matches!(parsed.command, Commands::RebuildIndex { yes: false }));
        }
    }

    #[test]
    fn import_takes_a_file() {
        let cli = Cli::try_parse_from(["intent-cache", "import", "catalog.json"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Import { file } = parsed.command {
                assert_eq!(file, PathBuf::from("catalog.json"));
            } else {
                panic!("expected import command");
            }
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["intent-cache", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Config { show: true }));
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["intent-cache", "serve"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["intent-cache", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
