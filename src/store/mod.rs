// Vector index store
// Schema lifecycle, document writes and KNN search over the variant index


pub mod lancedb;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::{DistanceMetric, IndexConfig};

pub use self::lancedb::LanceIndexStore;

/// How a variant entered its intent's set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantSource {
    /// The question supplied at ingest
    Canonical,
    /// Supplied by the caller next to the question
    Explicit,
    /// Produced by a variant provider
    Generated,
}

impl VariantSource {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Canonical => "canonical",
            Self::Explicit => "explicit",
            Self::Generated => "generated",
        }
    }
}

impl fmt::Display for VariantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "canonical" => Ok(Self::Canonical),
            "explicit" => Ok(Self::Explicit),
            "generated" => Ok(Self::Generated),
            other => Err(format!("Unknown variant source: {}", other)),
        }
    }
}

/// Insertion position of a document within its intent.
///
/// `batch` identifies the ingest call and sorts by time, `position` orders
/// documents written by that call. Deriving it per call keeps concurrent
/// ingests of one intent from colliding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ordinal {
    pub batch: String,
    pub position: u32,
}

impl Ordinal {
    #[inline]
    pub fn new(batch: impl Into<String>, position: u32) -> Self {
        Self {
            batch: batch.into(),
            position,
        }
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.batch, self.position)
    }
}

/// Stored unit of the index: one phrasing of one intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDocument {
    pub key: String,
    pub intent_id: String,
    pub text: String,
    pub source: VariantSource,
    pub ordinal: Ordinal,
    pub created_at: String,
    pub embedding: Vec<f32>,
}

/// Document returned by a KNN query together with its engine distance
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: VariantDocument,
    pub distance: f32,
}

impl ScoredDocument {
    #[inline]
    pub fn similarity(&self) -> f32 {
        distance_to_similarity(self.distance)
    }
}

/// Field layout and HNSW parameters of the vector index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub key_prefix: String,
    pub vector_dim: usize,
    pub distance_metric: DistanceMetric,
    pub ef_construction: u32,
    pub m: u32,
}

impl From<&IndexConfig> for IndexSchema {
    fn from(config: &IndexConfig) -> Self {
        Self {
            name: config.name.clone(),
            key_prefix: config.key_prefix.clone(),
            vector_dim: config.vector_dim as usize,
            distance_metric: config.distance_metric,
            ef_construction: config.ef_construction,
            m: config.m,
        }
    }
}

impl IndexSchema {
    /// Document key `<prefix><intent_id>:<ordinal>`
    #[inline]
    pub fn document_key(&self, intent_id: &str, ordinal: &Ordinal) -> String {
        format!("{}{}:{}", self.key_prefix, intent_id, ordinal)
    }
}

/// Similarity in `[0, 1]` for a cosine distance in `[0, 2]`.
///
/// Cosine distance is `1 - cos(a, b)`, so `1 - distance` recovers the
/// cosine. Opposed vectors would score negative and are clamped to 0, and
/// rounding noise above 1 is clamped to 1.
#[inline]
pub fn distance_to_similarity(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Operations the engine needs from a vector-search backend.
///
/// Reads against a missing index return nothing rather than failing;
/// writes require [`ensure_index`](Self::ensure_index) to have run.
/// Connectivity failures surface as `IndexUnavailable` after a bounded
/// retry, schema mismatches as `IndexSchemaConflict`.
#[async_trait]
pub trait VectorIndexStore: Send + Sync {
    fn schema(&self) -> &IndexSchema;

    /// Create the index if absent, or verify an existing one matches
    async fn ensure_index(&self) -> Result<()>;

    /// Write all documents in one commit, replacing any with the same key
    async fn upsert(&self, documents: &[VariantDocument]) -> Result<()>;

    /// Up to `top_k` nearest documents, closest first
    async fn knn_search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        intent_filter: Option<&str>,
    ) -> Result<Vec<ScoredDocument>>;

    /// All documents of one intent in insertion order
    async fn get_by_intent(&self, intent_id: &str) -> Result<Vec<VariantDocument>>;

    /// Remove all documents of one intent and return how many there were
    async fn delete_by_intent(&self, intent_id: &str) -> Result<usize>;

    async fn count_documents(&self) -> Result<usize>;

    /// Delete the whole index. Destructive, only run on request.
    async fn drop_index(&self) -> Result<()>;

    /// Build the approximate nearest-neighbor structure over stored vectors
    async fn build_ann_index(&self) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}
