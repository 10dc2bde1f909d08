#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a local Ollama instance
// Run with: cargo test --test integration_ollama -- --ignored

use std::env;
use std::sync::Arc;
use std::time::Duration;

use intent_cache::config::{IndexConfig, OllamaConfig};
use intent_cache::embeddings::{EmbeddingProvider, OllamaClient, cosine_similarity};
use intent_cache::engine::{EngineConfig, IntentCacheEngine};
use intent_cache::retry::RetryPolicy;
use intent_cache::store::{IndexSchema, LanceIndexStore};
use intent_cache::variants::BuiltinVariantProvider;
use serial_test::serial;
use tempfile::TempDir;
use tracing::info;

const TEST_MODEL: &str = "nomic-embed-text:latest";
const TEST_DIMENSION: usize = 768;

fn create_integration_test_client() -> OllamaClient {
    let mut config = OllamaConfig::default();
    if let Ok(host) = env::var("OLLAMA_HOST") {
        config.host = host;
    }
    if let Some(port) = env::var("OLLAMA_PORT").ok().and_then(|p| p.parse().ok()) {
        config.port = port;
    }
    config.model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| TEST_MODEL.to_string());
    config.batch_size = 5;

    OllamaClient::new(&config, TEST_DIMENSION)
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_policy(RetryPolicy::new(3, Duration::from_secs(1)))
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running Ollama instance"]
#[serial]
async fn ollama_health_and_model() {
    init_test_tracing();
    let client = create_integration_test_client();

    client.health_check().expect("Ollama should be reachable");
    client.validate_model().expect("test model should be pulled");
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running Ollama instance"]
#[serial]
async fn repeated_embeddings_are_stable() {
    init_test_tracing();
    let client = create_integration_test_client();

    let first = client.embed("How do I upgrade my plan?").await.expect("embed");
    let second = client.embed("How do I upgrade my plan?").await.expect("embed");

    assert_eq!(first.len(), TEST_DIMENSION);
    let similarity = cosine_similarity(&first, &second).expect("same dimension");
    info!("Repeated embedding similarity: {}", similarity);
    assert!(similarity > 0.999);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running Ollama instance"]
#[serial]
async fn paraphrase_matches_with_real_embeddings() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("should create temp dir");
    let uri = temp_dir.path().join("vectors").display().to_string();
    let schema = IndexSchema {
        vector_dim: TEST_DIMENSION,
        ..IndexSchema::from(&IndexConfig::default())
    };
    let store = LanceIndexStore::connect(&uri, schema, RetryPolicy::default())
        .await
        .expect("connect");

    let engine = IntentCacheEngine::new(
        EngineConfig::new(TEST_DIMENSION),
        Arc::new(create_integration_test_client()),
        Arc::new(BuiltinVariantProvider::new()),
        Arc::new(store),
    )
    .expect("engine");
    engine.ensure_index().await.expect("ensure index");

    engine
        .ingest("billing.upgrade", "How do I upgrade my plan?", 3, &[])
        .await
        .expect("ingest");
    engine
        .ingest("account.password", "How do I reset my password?", 3, &[])
        .await
        .expect("ingest");

    let response = engine
        .match_query("I'd like a bigger subscription tier", 3, 0.3, None)
        .await
        .expect("match");
    let best = response.best.expect("should match an intent");
    info!("Best match {} at {}", best.intent_id, best.similarity);
    assert_eq!(best.intent_id, "billing.upgrade");
}
