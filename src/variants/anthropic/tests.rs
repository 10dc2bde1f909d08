use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UPGRADE_PLAN: &str = "How do I upgrade my plan?";

fn provider(server: &MockServer, strict: bool) -> AnthropicVariantProvider {
    let config = AnthropicConfig {
        base_url: server.uri(),
        ..AnthropicConfig::default()
    };
    AnthropicVariantProvider::new(&config, "test-key".to_string(), strict)
        .with_retry_policy(RetryPolicy::new(1, Duration::ZERO))
}

fn completion(text: &str) -> serde_json::Value {
    json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn"
    })
}

#[test]
fn prompt_names_count_and_question() {
    let prompt = build_prompt(UPGRADE_PLAN, 4);
    assert!(prompt.starts_with("Generate 4 distinct paraphrases"));
    assert!(prompt.contains("Original question: How do I upgrade my plan?"));
    assert!(prompt.ends_with("Paraphrases:"));
}

#[test]
fn list_markers_are_stripped() {
    let text = "1. Upgrade my plan\n2) Move to a higher tier\n- Get a bigger plan\n\n* Boost my subscription\n• Raise my tier\nPlain line";
    assert_eq!(
        parse_variants(text),
        vec![
            "Upgrade my plan",
            "Move to a higher tier",
            "Get a bigger plan",
            "Boost my subscription",
            "Raise my tier",
            "Plain line",
        ]
    );
}

#[test]
fn missing_key_is_reported() {
    let config = AnthropicConfig {
        api_key_env: "INTENT_CACHE_TEST_UNSET_ANTHROPIC".to_string(),
        ..AnthropicConfig::default()
    };
    let err = AnthropicVariantProvider::from_env(&config, false).expect_err("key is not set");
    assert!(err.to_string().contains("INTENT_CACHE_TEST_UNSET_ANTHROPIC"));
}

#[tokio::test(flavor = "multi_thread")]
async fn paraphrases_are_parsed_and_deduplicated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", API_VERSION))
        .and(body_partial_json(json!({"model": "claude-3-5-haiku-latest"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "1. How can I upgrade my plan?\n2. how do i upgrade my plan?\n3. What's the way to move to a higher tier?\n4. How can I upgrade my plan?\n5. Upgrade my subscription",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let variants = provider(&server, false)
        .generate(UPGRADE_PLAN, 3)
        .await
        .expect("generation should succeed");

    assert_eq!(
        variants,
        vec![
            "How can I upgrade my plan?",
            "What's the way to move to a higher tier?",
            "Upgrade my subscription",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_service_degrades_to_no_variants() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529))
        .mount(&server)
        .await;

    let variants = provider(&server, false)
        .generate(UPGRADE_PLAN, 3)
        .await
        .expect("non-strict mode swallows failures");
    assert!(variants.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn strict_mode_surfaces_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": []})))
        .mount(&server)
        .await;

    let provider = provider(&server, true);
    assert!(provider.is_strict());
    let result = provider.generate(UPGRADE_PLAN, 3).await;
    assert!(matches!(result, Err(IntentCacheError::VariantProvider(_))));
}

#[tokio::test]
async fn zero_count_skips_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let variants = provider(&server, true)
        .generate(UPGRADE_PLAN, 0)
        .await
        .expect("nothing requested");
    assert!(variants.is_empty());
}
