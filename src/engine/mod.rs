//! Ingest and match orchestration over the three collaborators.
//!
//! The engine keeps no state between calls. The vector index is the only
//! source of truth, so concurrent calls need no locks here. Ingest is
//! append-only: every call writes under a fresh time-ordered batch id, so
//! two ingests of one intent add documents side by side and re-ingesting
//! never replaces earlier documents. An ingest racing a delete of the same
//! intent may or may not have its documents removed by that delete.


use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embeddings::{self, EmbeddingProvider};
use crate::store::{
    LanceIndexStore, Ordinal, ScoredDocument, VariantDocument, VariantSource, VectorIndexStore,
};
use crate::variants::{self, VariantProvider, dedup_variants};
use crate::{IntentCacheError, Result};

/// Upper bound on paraphrases requested per ingest
pub const MAX_AUTO_VARIANTS: usize = 100;
/// Upper bound on results per match
pub const MAX_TOP_K: usize = 100;
pub const DEFAULT_OVERFETCH_FACTOR: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub vector_dim: usize,
    /// Raw neighbors fetched per requested result before per-intent
    /// aggregation
    pub overfetch_factor: usize,
}

impl EngineConfig {
    #[inline]
    pub fn new(vector_dim: usize) -> Self {
        Self {
            vector_dim,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            vector_dim: config.index.vector_dim as usize,
            overfetch_factor: config.matching.overfetch_factor as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub intent_id: String,
    /// Documents written by this call, the question included
    pub stored_count: usize,
    /// Paraphrases kept from the variant provider
    pub generated_count: usize,
}

/// Best-scoring document of one intent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentMatch {
    pub intent_id: String,
    /// Stored phrasing that matched
    pub text: String,
    pub similarity: f32,
    pub source: VariantSource,
    pub key: String,
    #[serde(skip)]
    pub ordinal: Ordinal,
}

impl IntentMatch {
    fn from_scored(scored: ScoredDocument) -> Self {
        let similarity = scored.similarity();
        let document = scored.document;
        Self {
            intent_id: document.intent_id,
            text: document.text,
            similarity,
            source: document.source,
            key: document.key,
            ordinal: document.ordinal,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResponse {
    #[serde(rename = "match")]
    pub best: Option<IntentMatch>,
    pub alternates: Vec<IntentMatch>,
}

/// Stored variant as listed for an intent, without its vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredVariant {
    pub key: String,
    pub text: String,
    pub source: VariantSource,
    pub created_at: String,
    /// Only set for match results
    pub similarity: Option<f32>,
}

impl From<VariantDocument> for StoredVariant {
    fn from(document: VariantDocument) -> Self {
        Self {
            key: document.key,
            text: document.text,
            source: document.source,
            created_at: document.created_at,
            similarity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub embedding_provider: String,
    pub embedding_model: String,
    pub vector_dim: usize,
    pub variant_provider: String,
    pub index_name: String,
    pub document_count: usize,
}

pub struct IntentCacheEngine {
    config: EngineConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    variants: Arc<dyn VariantProvider>,
    store: Arc<dyn VectorIndexStore>,
}

impl std::fmt::Debug for IntentCacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentCacheEngine")
            .field("config", &self.config)
            .field("embedder", &self.embedder.name())
            .field("variants", &self.variants.name())
            .field("index", &self.store.schema().name)
            .finish()
    }
}

impl IntentCacheEngine {
    /// Assemble an engine from its collaborators.
    ///
    /// Fails with a configuration error unless the configured dimension,
    /// the embedding provider's output dimension and the index schema all
    /// agree.
    #[inline]
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        variants: Arc<dyn VariantProvider>,
        store: Arc<dyn VectorIndexStore>,
    ) -> Result<Self> {
        if config.vector_dim == 0 {
            return Err(IntentCacheError::Config(
                "vector_dim must be positive".to_string(),
            ));
        }
        if embedder.dimension() != config.vector_dim {
            return Err(IntentCacheError::Config(format!(
                "Embedding provider {} produces {}-dimensional vectors but vector_dim is {}",
                embedder.name(),
                embedder.dimension(),
                config.vector_dim
            )));
        }
        if store.schema().vector_dim != config.vector_dim {
            return Err(IntentCacheError::Config(format!(
                "Index {} is configured for {} dimensions but vector_dim is {}",
                store.schema().name,
                store.schema().vector_dim,
                config.vector_dim
            )));
        }

        Ok(Self {
            config: EngineConfig {
                overfetch_factor: config.overfetch_factor.max(1),
                ..config
            },
            embedder,
            variants,
            store,
        })
    }

    /// Build every collaborator from a validated configuration
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let embedder = embeddings::from_config(config)?;
        let variants = variants::from_config(config)?;
        let store = Arc::new(LanceIndexStore::from_config(config).await?);
        Self::new(EngineConfig::from(config), embedder, variants, store)
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub async fn ensure_index(&self) -> Result<()> {
        self.store.ensure_index().await
    }

    /// Store `question` and its variants under `intent_id`.
    ///
    /// Explicit variants are kept before generated ones; both are deduplicated
    /// against the question and each other, so at most
    /// `auto_variant_count + explicit_variants.len() + 1` documents are written.
    /// Nothing is written unless every candidate was embedded.
    #[inline]
    pub async fn ingest(
        &self,
        intent_id: &str,
        question: &str,
        auto_variant_count: usize,
        explicit_variants: &[String],
    ) -> Result<IngestOutcome> {
        let intent_id = intent_id.trim();
        let question = question.trim();
        if intent_id.is_empty() {
            return Err(IntentCacheError::Validation(
                "intent_id must not be empty".to_string(),
            ));
        }
        if question.is_empty() {
            return Err(IntentCacheError::Validation(
                "question must not be empty".to_string(),
            ));
        }
        if auto_variant_count > MAX_AUTO_VARIANTS {
            return Err(IntentCacheError::Validation(format!(
                "auto_variant_count must be at most {}, got {}",
                MAX_AUTO_VARIANTS, auto_variant_count
            )));
        }

        let mut texts = vec![question.to_string()];
        let explicit = dedup_variants(&texts, explicit_variants, explicit_variants.len());
        texts.extend(explicit.iter().cloned());

        let generated = if auto_variant_count > 0 {
            let raw = self.variants.generate(question, auto_variant_count).await?;
            dedup_variants(&texts, raw, auto_variant_count)
        } else {
            Vec::new()
        };
        texts.extend(generated.iter().cloned());

        debug!(
            "Embedding {} texts for intent {} ({} explicit, {} generated)",
            texts.len(),
            intent_id,
            explicit.len(),
            generated.len()
        );
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(IntentCacheError::EmbeddingProvider(format!(
                "{} returned {} embeddings for {} texts",
                self.embedder.name(),
                vectors.len(),
                texts.len()
            )));
        }
        embeddings::check_dimensions(self.embedder.name(), self.config.vector_dim, &vectors)?;

        let batch = Uuid::now_v7().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        let schema = self.store.schema();
        let documents: Vec<VariantDocument> = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(position, (text, embedding))| {
                let source = match position {
                    0 => VariantSource::Canonical,
                    p if p <= explicit.len() => VariantSource::Explicit,
                    _ => VariantSource::Generated,
                };
                let ordinal = Ordinal::new(batch.as_str(), position as u32);
                VariantDocument {
                    key: schema.document_key(intent_id, &ordinal),
                    intent_id: intent_id.to_string(),
                    text,
                    source,
                    ordinal,
                    created_at: created_at.clone(),
                    embedding,
                }
            })
            .collect();

        self.store.upsert(&documents).await?;

        info!(
            "Ingested intent {}: {} documents ({} generated)",
            intent_id,
            documents.len(),
            generated.len()
        );
        Ok(IngestOutcome {
            intent_id: intent_id.to_string(),
            stored_count: documents.len(),
            generated_count: generated.len(),
        })
    }

    /// Closest intents to `query`, one entry per intent.
    ///
    /// `best` is `None` when nothing reaches `min_similarity`, which includes
    /// an empty index.
    #[inline]
    pub async fn match_query(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
        intent_filter: Option<&str>,
    ) -> Result<MatchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(IntentCacheError::Validation(
                "query must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_TOP_K).contains(&top_k) {
            return Err(IntentCacheError::Validation(format!(
                "top_k must be between 1 and {}, got {}",
                MAX_TOP_K, top_k
            )));
        }
        if !(0.0..=1.0).contains(&min_similarity) {
            return Err(IntentCacheError::Validation(format!(
                "min_similarity must be between 0 and 1, got {}",
                min_similarity
            )));
        }
        let intent_filter = intent_filter.map(str::trim).filter(|f| !f.is_empty());

        let vector = self.embedder.embed(query).await?;
        embeddings::check_dimensions(
            self.embedder.name(),
            self.config.vector_dim,
            std::slice::from_ref(&vector),
        )?;

        let fetch = top_k.saturating_mul(self.config.overfetch_factor);
        let hits = self.store.knn_search(&vector, fetch, intent_filter).await?;
        debug!("Query fetched {} raw neighbors", hits.len());

        let response = rank_matches(hits, min_similarity, top_k);
        match &response.best {
            Some(best) => debug!(
                "Best match {} at {:.3} with {} alternates",
                best.intent_id,
                best.similarity,
                response.alternates.len()
            ),
            None => debug!("No intent reached similarity {}", min_similarity),
        }
        Ok(response)
    }

    /// Every stored variant of an intent in insertion order
    #[inline]
    pub async fn get_variants(&self, intent_id: &str) -> Result<Vec<StoredVariant>> {
        let intent_id = intent_id.trim();
        if intent_id.is_empty() {
            return Err(IntentCacheError::Validation(
                "intent_id must not be empty".to_string(),
            ));
        }
        let documents = self.store.get_by_intent(intent_id).await?;
        Ok(documents.into_iter().map(StoredVariant::from).collect())
    }

    /// Remove an intent. Deleting an unknown intent returns 0.
    #[inline]
    pub async fn delete_intent(&self, intent_id: &str) -> Result<usize> {
        let intent_id = intent_id.trim();
        if intent_id.is_empty() {
            return Err(IntentCacheError::Validation(
                "intent_id must not be empty".to_string(),
            ));
        }
        self.store.delete_by_intent(intent_id).await
    }

    /// Drop and recreate the index. All documents are lost and must be
    /// ingested again.
    #[inline]
    pub async fn rebuild_index(&self) -> Result<()> {
        warn!("Rebuilding index {}", self.store.schema().name);
        self.store.drop_index().await?;
        self.store.ensure_index().await
    }

    #[inline]
    pub async fn build_ann_index(&self) -> Result<()> {
        self.store.build_ann_index().await
    }

    #[inline]
    pub async fn count_documents(&self) -> Result<usize> {
        self.store.count_documents().await
    }

    #[inline]
    pub async fn health_check(&self) -> Result<HealthReport> {
        self.store.health_check().await?;
        let document_count = self.store.count_documents().await?;
        Ok(HealthReport {
            embedding_provider: self.embedder.name().to_string(),
            embedding_model: self.embedder.model().to_string(),
            vector_dim: self.embedder.dimension(),
            variant_provider: self.variants.name().to_string(),
            index_name: self.store.schema().name.clone(),
            document_count,
        })
    }
}

/// Order by similarity descending, then canonical before other sources,
/// then earlier ordinal
#[inline]
pub fn rank_order(a: &IntentMatch, b: &IntentMatch) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| {
            let a_canonical = a.source == VariantSource::Canonical;
            let b_canonical = b.source == VariantSource::Canonical;
            b_canonical.cmp(&a_canonical)
        })
        .then_with(|| a.ordinal.cmp(&b.ordinal))
        .then_with(|| a.intent_id.cmp(&b.intent_id))
}

/// Turn raw neighbors into a match response.
///
/// Drops hits below `min_similarity`, keeps the best-ranked hit of each
/// intent and returns the first of the ranked intents as `best` and up to
/// `top_k - 1` more as alternates.
#[inline]
pub fn rank_matches(
    hits: Vec<ScoredDocument>,
    min_similarity: f32,
    top_k: usize,
) -> MatchResponse {
    let mut per_intent: HashMap<String, IntentMatch> = HashMap::new();

    for hit in hits {
        if hit.similarity() < min_similarity {
            continue;
        }
        let candidate = IntentMatch::from_scored(hit);
        match per_intent.get_mut(&candidate.intent_id) {
            Some(current) => {
                if rank_order(&candidate, current) == Ordering::Less {
                    *current = candidate;
                }
            }
            None => {
                per_intent.insert(candidate.intent_id.clone(), candidate);
            }
        }
    }

    let mut ranked: Vec<IntentMatch> = per_intent.into_values().collect();
    ranked.sort_by(rank_order);
    ranked.truncate(top_k);

    let mut ranked = ranked.into_iter();
    MatchResponse {
        best: ranked.next(),
        alternates: ranked.collect(),
    }
}
