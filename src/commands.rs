#[cfg(test)]
mod tests;

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::IntentCacheError;
use crate::config::Config;
use crate::engine::{IntentCacheEngine, IntentMatch, MatchResponse};

/// One entry of a bulk import file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    pub intent_id: String,
    pub question: String,
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub auto_variant_count: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub intents: usize,
    pub documents: usize,
    pub generated: usize,
    pub failed: Vec<String>,
}

/// Options for a match from the command line, unset values fall back to
/// the `[matching]` configuration
#[derive(Debug, Clone, Default)]
pub struct MatchArgs {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_similarity: Option<f32>,
    pub intent: Option<String>,
    pub json: bool,
}

/// Process exit code for a failed command
#[inline]
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<IntentCacheError>() {
        Some(IntentCacheError::Validation(_)) => 2,
        Some(IntentCacheError::Config(_)) => 3,
        Some(
            IntentCacheError::IndexSchemaConflict(_)
            | IntentCacheError::IndexUnavailable(_)
            | IntentCacheError::IndexNotFound(_),
        ) => 4,
        Some(IntentCacheError::EmbeddingProvider(_) | IntentCacheError::VariantProvider(_)) => 5,
        _ => 1,
    }
}

/// Print a failed command's error chain
#[inline]
pub fn report_error(err: &anyhow::Error) {
    error!("{:#}", err);
    eprintln!("{} {:#}", style("Error:").red().bold(), err);
    if matches!(
        err.downcast_ref::<IntentCacheError>(),
        Some(IntentCacheError::IndexNotFound(_))
    ) {
        eprintln!("Run 'intent-cache init' to create the index.");
    }
}

#[inline]
pub async fn init_index(engine: &IntentCacheEngine) -> Result<()> {
    engine.ensure_index().await?;
    println!("{}", style("✓ Index is ready").green());
    Ok(())
}

#[inline]
pub async fn ingest_intent(
    engine: &IntentCacheEngine,
    intent_id: &str,
    question: &str,
    auto_variants: usize,
    variants: &[String],
    json: bool,
) -> Result<()> {
    let outcome = engine
        .ingest(intent_id, question, auto_variants, variants)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!(
            "Stored {} documents for {} ({} generated variants)",
            style(outcome.stored_count).cyan(),
            style(&outcome.intent_id).bold(),
            outcome.generated_count
        );
    }
    Ok(())
}

#[inline]
pub async fn match_query(engine: &IntentCacheEngine, config: &Config, args: &MatchArgs) -> Result<()> {
    let top_k = args
        .top_k
        .unwrap_or(config.matching.default_top_k as usize);
    let min_similarity = args
        .min_similarity
        .unwrap_or(config.matching.default_min_similarity);

    let response = engine
        .match_query(&args.query, top_k, min_similarity, args.intent.as_deref())
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_match_response(&response);
    }
    Ok(())
}

fn print_match_response(response: &MatchResponse) {
    let Some(best) = &response.best else {
        println!("{}", style("No matching intent").yellow());
        return;
    };

    println!("{}", style("Match").bold().green());
    print_intent_match(best);

    if !response.alternates.is_empty() {
        println!();
        println!("{}", style("Alternates").bold().yellow());
        for alternate in &response.alternates {
            print_intent_match(alternate);
        }
    }
}

fn print_intent_match(intent_match: &IntentMatch) {
    println!(
        "  {:.3}  {}  {}",
        intent_match.similarity,
        style(&intent_match.intent_id).cyan(),
        style(format!("\"{}\" ({})", intent_match.text, intent_match.source)).dim()
    );
}

#[inline]
pub async fn list_variants(engine: &IntentCacheEngine, intent_id: &str, json: bool) -> Result<()> {
    let variants = engine.get_variants(intent_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&variants)?);
        return Ok(());
    }

    if variants.is_empty() {
        println!("No variants stored for {}", style(intent_id).bold());
        return Ok(());
    }

    println!(
        "{} ({} variants)",
        style(intent_id).bold().cyan(),
        variants.len()
    );
    for variant in &variants {
        println!("  [{}] {}", style(variant.source).dim(), variant.text);
    }
    Ok(())
}

#[inline]
pub async fn delete_intent(engine: &IntentCacheEngine, intent_id: &str, yes: bool) -> Result<()> {
    if !yes
        && !Confirm::new()
            .with_prompt(format!("Delete every variant of {}?", intent_id))
            .default(false)
            .interact()?
    {
        println!("Cancelled");
        return Ok(());
    }

    let deleted = engine.delete_intent(intent_id).await?;
    if deleted == 0 {
        println!("No documents stored for {}", style(intent_id).bold());
    } else {
        println!(
            "{} Deleted {} documents for {}",
            style("✓").green(),
            deleted,
            style(intent_id).bold()
        );
    }
    Ok(())
}

/// Read a JSON array of catalog entries
#[inline]
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog file: {}", path.display()))
}

/// Ingest every catalog entry, continuing past failed entries
#[inline]
pub async fn import_catalog(
    engine: &IntentCacheEngine,
    entries: &[CatalogEntry],
    default_auto_variants: usize,
) -> Result<ImportSummary> {
    engine.ensure_index().await?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(entries.len() as u64).with_style(
            ProgressStyle::with_template("{bar:40} [{pos}/{len}] Importing {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };

    let mut summary = ImportSummary::default();
    for entry in entries {
        bar.set_message(entry.intent_id.clone());
        let auto_variants = entry.auto_variant_count.unwrap_or(default_auto_variants);

        match engine
            .ingest(&entry.intent_id, &entry.question, auto_variants, &entry.variants)
            .await
        {
            Ok(outcome) => {
                summary.intents += 1;
                summary.documents += outcome.stored_count;
                summary.generated += outcome.generated_count;
            }
            // an unreachable index fails every later entry as well
            Err(e @ IntentCacheError::IndexUnavailable(_)) => {
                bar.abandon();
                return Err(e.into());
            }
            Err(e) => {
                warn!("Skipping intent {}: {}", entry.intent_id, e);
                summary.failed.push(entry.intent_id.clone());
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    info!(
        "Imported {} intents ({} documents), {} failed",
        summary.intents,
        summary.documents,
        summary.failed.len()
    );
    Ok(summary)
}

#[inline]
pub async fn import_file(engine: &IntentCacheEngine, config: &Config, path: &Path) -> Result<()> {
    let entries = load_catalog(path)?;
    let summary = import_catalog(
        engine,
        &entries,
        config.matching.default_auto_variants as usize,
    )
    .await?;

    println!(
        "Imported {} intents, {} documents ({} generated variants)",
        style(summary.intents).cyan(),
        summary.documents,
        summary.generated
    );
    if !summary.failed.is_empty() {
        println!(
            "{} {} entries failed: {}",
            style("⚠").yellow(),
            summary.failed.len(),
            summary.failed.join(", ")
        );
    }
    Ok(())
}

#[inline]
pub async fn build_index(engine: &IntentCacheEngine) -> Result<()> {
    engine.build_ann_index().await?;
    println!("{}", style("✓ Vector index built").green());
    Ok(())
}

#[inline]
pub async fn rebuild_index(engine: &IntentCacheEngine, yes: bool) -> Result<()> {
    if !yes
        && !Confirm::new()
            .with_prompt("Drop the index and all stored variants?")
            .default(false)
            .interact()?
    {
        println!("Cancelled");
        return Ok(());
    }

    engine.rebuild_index().await?;
    println!(
        "{}",
        style("✓ Index recreated, ingest the catalog again").green()
    );
    Ok(())
}

#[inline]
pub async fn show_info(engine: &IntentCacheEngine, config: &Config) -> Result<()> {
    let report = engine.health_check().await?;

    println!("{}", style("Intent Cache").bold().cyan());
    println!("  Index: {} ({})", report.index_name, config.index_uri());
    println!("  Documents: {}", report.document_count);
    println!(
        "  Embeddings: {} / {} ({} dimensions)",
        report.embedding_provider, report.embedding_model, report.vector_dim
    );
    println!("  Variants: {}", report.variant_provider);
    println!(
        "  HNSW: M={}, ef_construction={}",
        config.index.m, config.index.ef_construction
    );
    Ok(())
}
