use super::*;
use crate::IntentCacheError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer) -> OpenAiConfig {
    OpenAiConfig {
        base_url: format!("{}/v1/", server.uri()),
        model: "text-embedding-3-small".to_string(),
        api_key_env: "INTENT_CACHE_TEST_UNSET_KEY".to_string(),
        batch_size: 8,
    }
}

#[test]
fn endpoint_keeps_versioned_base_path() {
    let config = OpenAiConfig {
        base_url: "https://api.example.com/v1/".to_string(),
        ..OpenAiConfig::default()
    };
    let client = OpenAiClient::new(&config, "key".to_string(), 1536);

    assert_eq!(client.endpoint, "https://api.example.com/v1/embeddings");
    assert_eq!(client.dimension(), 1536);
}

#[test]
fn missing_api_key_is_a_configuration_error() {
    let config = OpenAiConfig {
        api_key_env: "INTENT_CACHE_TEST_DEFINITELY_UNSET".to_string(),
        ..OpenAiConfig::default()
    };

    let err = OpenAiClient::from_env(&config, 1536).expect_err("key is not set");
    assert!(err.to_string().contains("INTENT_CACHE_TEST_DEFINITELY_UNSET"));
}

#[test]
fn debug_output_hides_api_key() {
    let client = OpenAiClient::new(&OpenAiConfig::default(), "sk-secret".to_string(), 8);
    assert!(!format!("{:?}", client).contains("sk-secret"));
}

#[tokio::test(flavor = "multi_thread")]
async fn embeddings_are_reordered_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "text-embedding-3-small",
            "input": ["first", "second"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "model": "text-embedding-3-small",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiClient::new(&test_config(&server), "test-key".to_string(), 2)
        .with_retry_policy(RetryPolicy::new(1, Duration::ZERO));
    let embeddings = client
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .expect("embedding should succeed");

    assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiClient::new(&test_config(&server), "bad-key".to_string(), 2)
        .with_retry_policy(RetryPolicy::new(3, Duration::ZERO));
    let result = client.embed("hello").await;

    assert!(matches!(result, Err(IntentCacheError::EmbeddingProvider(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn short_response_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [1.0, 0.0]}]
        })))
        .mount(&server)
        .await;

    let client = OpenAiClient::new(&test_config(&server), "test-key".to_string(), 2)
        .with_retry_policy(RetryPolicy::new(1, Duration::ZERO));
    let result = client
        .embed_batch(&["one".to_string(), "two".to_string()])
        .await;

    assert!(matches!(result, Err(IntentCacheError::EmbeddingProvider(_))));
}
