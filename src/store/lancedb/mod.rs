
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::index::Index;
use lancedb::index::vector::IvfHnswSqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tracing::{debug, info, warn};

use super::{
    IndexSchema, Ordinal, ScoredDocument, VariantDocument, VariantSource, VectorIndexStore,
};
use crate::config::Config;
use crate::retry::{RetryPolicy, retry_async};
use crate::{IntentCacheError, Result};

const EMBEDDING_COLUMN: &str = "embedding";
const DISTANCE_COLUMN: &str = "_distance";
const METRIC_METADATA_KEY: &str = "intent_cache.distance_metric";
const M_METADATA_KEY: &str = "intent_cache.m";
const EF_CONSTRUCTION_METADATA_KEY: &str = "intent_cache.ef_construction";
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Variant index kept in a LanceDB table
pub struct LanceIndexStore {
    connection: Connection,
    schema: IndexSchema,
    retry: RetryPolicy,
}

impl std::fmt::Debug for LanceIndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceIndexStore")
            .field("schema", &self.schema)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl LanceIndexStore {
    /// Connect to the database at `uri`. Local paths are created if missing.
    ///
    /// Connecting does not touch the table; call
    /// [`VectorIndexStore::ensure_index`] before the first write.
    #[inline]
    pub async fn connect(uri: &str, schema: IndexSchema, retry: RetryPolicy) -> Result<Self> {
        let uri = if uri.contains("://") {
            uri.to_string()
        } else {
            std::fs::create_dir_all(Path::new(uri)).map_err(|e| {
                IntentCacheError::IndexUnavailable(format!(
                    "Failed to create vector database directory {}: {}",
                    uri, e
                ))
            })?;
            format!("file://{}", uri)
        };

        debug!("Connecting to LanceDB at {}", uri);
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            IntentCacheError::IndexUnavailable(format!("Failed to connect to LanceDB: {}", e))
        })?;

        Ok(Self {
            connection,
            schema,
            retry,
        })
    }

    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::connect(
            &config.index_uri(),
            IndexSchema::from(&config.index),
            RetryPolicy::new(config.index.retry_attempts, RETRY_BASE_DELAY),
        )
        .await
    }

    /// Arrow schema of the variant table
    #[inline]
    pub fn arrow_schema(&self) -> SchemaRef {
        let metadata = HashMap::from([
            (
                METRIC_METADATA_KEY.to_string(),
                self.schema.distance_metric.as_str().to_string(),
            ),
            (M_METADATA_KEY.to_string(), self.schema.m.to_string()),
            (
                EF_CONSTRUCTION_METADATA_KEY.to_string(),
                self.schema.ef_construction.to_string(),
            ),
        ]);

        Arc::new(Schema::new_with_metadata(
            vec![
                Field::new("key", DataType::Utf8, false),
                Field::new("intent_id", DataType::Utf8, false),
                Field::new("text", DataType::Utf8, false),
                Field::new("source", DataType::Utf8, false),
                Field::new("batch", DataType::Utf8, false),
                Field::new("position", DataType::UInt32, false),
                Field::new("created_at", DataType::Utf8, false),
                Field::new(
                    EMBEDDING_COLUMN,
                    DataType::FixedSizeList(
                        Arc::new(Field::new("item", DataType::Float32, true)),
                        self.schema.vector_dim as i32,
                    ),
                    false,
                ),
            ],
            metadata,
        ))
    }

    /// Open the table, or `None` when it has not been created yet
    async fn open_table(&self) -> Result<Option<Table>> {
        match self
            .connection
            .open_table(&self.schema.name)
            .execute()
            .await
        {
            Ok(table) => Ok(Some(table)),
            Err(lancedb::Error::TableNotFound { .. }) => Ok(None),
            Err(e) => Err(index_error("Failed to open table", e)),
        }
    }

    async fn require_table(&self) -> Result<Table> {
        self.open_table().await?.ok_or_else(|| {
            IntentCacheError::IndexNotFound(format!(
                "Index {} does not exist, run ensure_index first",
                self.schema.name
            ))
        })
    }

    async fn ensure_index_once(&self) -> Result<()> {
        let Some(table) = self.open_table().await? else {
            info!(
                "Creating index {} with {} dimensions ({} metric, M={}, ef_construction={})",
                self.schema.name,
                self.schema.vector_dim,
                self.schema.distance_metric.as_str(),
                self.schema.m,
                self.schema.ef_construction
            );
            return match self
                .connection
                .create_empty_table(&self.schema.name, self.arrow_schema())
                .execute()
                .await
            {
                Ok(_) => Ok(()),
                // lost a creation race, verify what the winner created
                Err(lancedb::Error::TableAlreadyExists { .. }) => {
                    let table = self.require_table().await?;
                    self.verify_existing(&table).await
                }
                Err(e) => Err(index_error("Failed to create table", e)),
            };
        };

        self.verify_existing(&table).await
    }

    /// Compare an existing table against the configured schema
    async fn verify_existing(&self, table: &Table) -> Result<()> {
        let existing = table
            .schema()
            .await
            .map_err(|e| index_error("Failed to read table schema", e))?;

        let dimension = existing
            .field_with_name(EMBEDDING_COLUMN)
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size as usize),
                _ => None,
            })
            .ok_or_else(|| {
                IntentCacheError::IndexSchemaConflict(format!(
                    "Index {} has no fixed-size {} vector field",
                    self.schema.name, EMBEDDING_COLUMN
                ))
            })?;

        if dimension != self.schema.vector_dim {
            return Err(IntentCacheError::IndexSchemaConflict(format!(
                "Index {} stores {}-dimensional vectors but {} are configured; \
                 rebuild the index and re-ingest",
                self.schema.name, dimension, self.schema.vector_dim
            )));
        }

        self.verify_fields(&existing)?;

        match existing.metadata().get(METRIC_METADATA_KEY) {
            Some(metric) if metric != self.schema.distance_metric.as_str() => {
                return Err(IntentCacheError::IndexSchemaConflict(format!(
                    "Index {} uses the {} metric but {} is configured",
                    self.schema.name,
                    metric,
                    self.schema.distance_metric.as_str()
                )));
            }
            Some(_) => {}
            None => warn!(
                "Index {} does not record its distance metric, assuming {}",
                self.schema.name,
                self.schema.distance_metric.as_str()
            ),
        }

        debug!("Index {} matches configured schema", self.schema.name);
        Ok(())
    }

    /// Every configured column must exist with the same type, and no others.
    /// The vector column is compared by width only.
    fn verify_fields(&self, existing: &Schema) -> Result<()> {
        let expected = self.arrow_schema();

        let mismatched: Vec<String> = expected
            .fields()
            .iter()
            .filter(|field| field.name() != EMBEDDING_COLUMN)
            .filter_map(|field| match existing.field_with_name(field.name()) {
                Ok(found) if found.data_type() == field.data_type() => None,
                Ok(found) => Some(format!(
                    "{} is {} instead of {}",
                    field.name(),
                    found.data_type(),
                    field.data_type()
                )),
                Err(_) => Some(format!("{} is missing", field.name())),
            })
            .chain(
                existing
                    .fields()
                    .iter()
                    .filter(|field| expected.field_with_name(field.name()).is_err())
                    .map(|field| format!("{} is unexpected", field.name())),
            )
            .collect();

        if mismatched.is_empty() {
            return Ok(());
        }
        Err(IntentCacheError::IndexSchemaConflict(format!(
            "Index {} has a different column layout ({}); rebuild the index and re-ingest",
            self.schema.name,
            mismatched.join(", ")
        )))
    }

    /// Arrow record batch for a set of documents
    #[inline]
    pub fn create_record_batch(&self, documents: &[VariantDocument]) -> Result<RecordBatch> {
        let dim = self.schema.vector_dim;
        let mut flat_values = Vec::with_capacity(documents.len() * dim);
        for document in documents {
            if document.embedding.len() != dim {
                return Err(IntentCacheError::IndexSchemaConflict(format!(
                    "Document {} has {} dimensions, index expects {}",
                    document.key,
                    document.embedding.len(),
                    dim
                )));
            }
            flat_values.extend_from_slice(&document.embedding);
        }

        let item_field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            item_field,
            dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| IntentCacheError::Other(anyhow::anyhow!("Failed to build vector array: {}", e)))?;

        let columns: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from_iter_values(
                documents.iter().map(|d| d.key.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                documents.iter().map(|d| d.intent_id.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                documents.iter().map(|d| d.text.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                documents.iter().map(|d| d.source.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                documents.iter().map(|d| d.ordinal.batch.as_str()),
            )),
            Arc::new(UInt32Array::from_iter_values(
                documents.iter().map(|d| d.ordinal.position),
            )),
            Arc::new(StringArray::from_iter_values(
                documents.iter().map(|d| d.created_at.as_str()),
            )),
            Arc::new(vector_array),
        ];

        RecordBatch::try_new(self.arrow_schema(), columns).map_err(|e| {
            IntentCacheError::Other(anyhow::anyhow!("Failed to build record batch: {}", e))
        })
    }

    async fn upsert_once(&self, documents: &[VariantDocument]) -> Result<()> {
        let table = self.require_table().await?;
        let batch = self.create_record_batch(documents)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        let mut merge = table.merge_insert(&["key"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| index_error("Failed to write documents", e))?;
        Ok(())
    }

    async fn knn_search_once(
        &self,
        query_vector: &[f32],
        top_k: usize,
        intent_filter: Option<&str>,
    ) -> Result<Vec<ScoredDocument>> {
        let Some(table) = self.open_table().await? else {
            return Ok(Vec::new());
        };

        let mut query = table
            .vector_search(query_vector)
            .map_err(|e| index_error("Failed to create vector search", e))?
            .column(EMBEDDING_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(top_k);

        if let Some(intent_id) = intent_filter {
            query = query.only_if(intent_predicate(intent_id));
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| index_error("Failed to execute vector search", e))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| index_error("Failed to read search results", e))?;

        let mut results = Vec::new();
        for batch in &batches {
            let documents = parse_documents(batch)?;
            let distances = batch
                .column_by_name(DISTANCE_COLUMN)
                .and_then(|col| col.as_any().downcast_ref::<Float32Array>());
            for (row, document) in documents.into_iter().enumerate() {
                let distance = distances
                    .filter(|d| !d.is_null(row))
                    .map_or(f32::NAN, |d| d.value(row));
                results.push(ScoredDocument { document, distance });
            }
        }

        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        debug!("Vector search returned {} documents", results.len());
        Ok(results)
    }

    async fn get_by_intent_once(&self, intent_id: &str) -> Result<Vec<VariantDocument>> {
        let Some(table) = self.open_table().await? else {
            return Ok(Vec::new());
        };

        let predicate = intent_predicate(intent_id);
        let count = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| index_error("Failed to count documents", e))?;
        if count == 0 {
            return Ok(Vec::new());
        }

        // plain queries carry a default limit, ask for every row
        let stream = table
            .query()
            .only_if(predicate)
            .limit(count)
            .execute()
            .await
            .map_err(|e| index_error("Failed to query documents", e))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| index_error("Failed to read documents", e))?;

        let mut documents = Vec::with_capacity(count);
        for batch in &batches {
            documents.extend(parse_documents(batch)?);
        }
        documents.sort_by(|a, b| a.ordinal.cmp(&b.ordinal));
        Ok(documents)
    }

    async fn delete_by_intent_once(&self, intent_id: &str) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let predicate = intent_predicate(intent_id);
        let count = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| index_error("Failed to count documents", e))?;
        if count == 0 {
            return Ok(0);
        }

        table
            .delete(&predicate)
            .await
            .map_err(|e| index_error("Failed to delete documents", e))?;
        Ok(count)
    }

    async fn count_documents_once(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };
        table
            .count_rows(None)
            .await
            .map_err(|e| index_error("Failed to count documents", e))
    }

    async fn drop_index_once(&self) -> Result<()> {
        match self.connection.drop_table(&self.schema.name).await {
            Ok(()) | Err(lancedb::Error::TableNotFound { .. }) => Ok(()),
            Err(e) => Err(index_error("Failed to drop table", e)),
        }
    }

    async fn build_ann_index_once(&self) -> Result<()> {
        let table = self.require_table().await?;
        let builder = IvfHnswSqIndexBuilder::default()
            .distance_type(DistanceType::Cosine)
            .num_edges(self.schema.m)
            .ef_construction(self.schema.ef_construction);

        table
            .create_index(&[EMBEDDING_COLUMN], Index::IvfHnswSq(builder))
            .execute()
            .await
            .map_err(|e| index_error("Failed to build vector index", e))
    }

    async fn health_check_once(&self) -> Result<()> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| index_error("Failed to list tables", e))?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndexStore for LanceIndexStore {
    fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    async fn ensure_index(&self) -> Result<()> {
        retry_async(&self.retry, "ensure_index", || self.ensure_index_once()).await
    }

    async fn upsert(&self, documents: &[VariantDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        retry_async(&self.retry, "upsert", || self.upsert_once(documents)).await?;
        debug!("Stored {} documents", documents.len());
        Ok(())
    }

    async fn knn_search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        intent_filter: Option<&str>,
    ) -> Result<Vec<ScoredDocument>> {
        if query_vector.len() != self.schema.vector_dim {
            return Err(IntentCacheError::IndexSchemaConflict(format!(
                "Query vector has {} dimensions, index expects {}",
                query_vector.len(),
                self.schema.vector_dim
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        retry_async(&self.retry, "knn_search", || {
            self.knn_search_once(query_vector, top_k, intent_filter)
        })
        .await
    }

    async fn get_by_intent(&self, intent_id: &str) -> Result<Vec<VariantDocument>> {
        retry_async(&self.retry, "get_by_intent", || {
            self.get_by_intent_once(intent_id)
        })
        .await
    }

    async fn delete_by_intent(&self, intent_id: &str) -> Result<usize> {
        let deleted = retry_async(&self.retry, "delete_by_intent", || {
            self.delete_by_intent_once(intent_id)
        })
        .await?;
        info!("Deleted {} documents for intent {}", deleted, intent_id);
        Ok(deleted)
    }

    async fn count_documents(&self) -> Result<usize> {
        retry_async(&self.retry, "count_documents", || self.count_documents_once()).await
    }

    async fn drop_index(&self) -> Result<()> {
        warn!("Dropping index {}", self.schema.name);
        retry_async(&self.retry, "drop_index", || self.drop_index_once()).await
    }

    async fn build_ann_index(&self) -> Result<()> {
        info!(
            "Building HNSW index on {} (M={}, ef_construction={})",
            self.schema.name, self.schema.m, self.schema.ef_construction
        );
        retry_async(&self.retry, "build_ann_index", || self.build_ann_index_once()).await
    }

    async fn health_check(&self) -> Result<()> {
        retry_async(&self.retry, "health_check", || self.health_check_once()).await
    }
}

/// Map a LanceDB failure onto the error taxonomy.
///
/// Only IO and runtime failures become `IndexUnavailable` and get retried.
/// Schema and argument errors repeat on every attempt.
fn index_error(context: &str, error: lancedb::Error) -> IntentCacheError {
    match error {
        lancedb::Error::Schema { .. } | lancedb::Error::Arrow { .. } => {
            IntentCacheError::IndexSchemaConflict(format!("{}: {}", context, error))
        }
        lancedb::Error::InvalidInput { .. }
        | lancedb::Error::InvalidTableName { .. }
        | lancedb::Error::NotSupported { .. } => {
            IntentCacheError::Other(anyhow::anyhow!("{}: {}", context, error))
        }
        _ => IntentCacheError::IndexUnavailable(format!("{}: {}", context, error)),
    }
}

/// SQL filter on the intent field with quotes escaped
#[inline]
pub fn intent_predicate(intent_id: &str) -> String {
    format!("intent_id = '{}'", intent_id.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| malformed(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| malformed(format!("Invalid {} column type", name)))
}

fn malformed(message: String) -> IntentCacheError {
    IntentCacheError::IndexSchemaConflict(message)
}

/// Documents stored in one record batch, in row order
fn parse_documents(batch: &RecordBatch) -> Result<Vec<VariantDocument>> {
    let keys = string_column(batch, "key")?;
    let intent_ids = string_column(batch, "intent_id")?;
    let texts = string_column(batch, "text")?;
    let sources = string_column(batch, "source")?;
    let batches = string_column(batch, "batch")?;
    let created_ats = string_column(batch, "created_at")?;
    let positions = batch
        .column_by_name("position")
        .ok_or_else(|| malformed("Missing position column".to_string()))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| malformed("Invalid position column type".to_string()))?;
    let embeddings = batch
        .column_by_name(EMBEDDING_COLUMN)
        .ok_or_else(|| malformed(format!("Missing {} column", EMBEDDING_COLUMN)))?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| malformed(format!("Invalid {} column type", EMBEDDING_COLUMN)))?;

    (0..batch.num_rows())
        .map(|row| {
            let source = sources.value(row).parse::<VariantSource>().map_err(malformed)?;
            let vector = embeddings.value(row);
            let embedding = vector
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| malformed("Invalid embedding item type".to_string()))?
                .values()
                .to_vec();

            Ok(VariantDocument {
                key: keys.value(row).to_string(),
                intent_id: intent_ids.value(row).to_string(),
                text: texts.value(row).to_string(),
                source,
                ordinal: Ordinal::new(batches.value(row), positions.value(row)),
                created_at: created_ats.value(row).to_string(),
                embedding,
            })
        })
        .collect()
}
