use super::*;
use crate::config::OpenAiConfig;

#[test]
fn cosine_similarity_of_identical_direction_is_one() {
    let a = [0.3, 0.4, 0.5];
    let b = [0.6, 0.8, 1.0];
    let similarity = cosine_similarity(&a, &b).expect("same dimension");
    assert!((similarity - 1.0).abs() < 1e-6);
}

#[test]
fn cosine_similarity_edge_cases() {
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), Some(0.0));
    assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);

    let opposite = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).expect("same dimension");
    assert!((opposite + 1.0).abs() < 1e-6);
}

#[test]
fn blank_texts_fail_validation() {
    assert!(validate_texts(&["fine".to_string()]).is_ok());
    assert!(matches!(
        validate_texts(&["fine".to_string(), " \t".to_string()]),
        Err(IntentCacheError::Validation(_))
    ));
}

#[test]
fn dimension_check_names_the_provider() {
    let err = check_dimensions("ollama", 4, &[vec![0.0; 4], vec![0.0; 3]])
        .expect_err("second vector is short");
    let message = err.to_string();
    assert!(message.contains("ollama"));
    assert!(message.contains("expected 4"));
}

#[test]
fn factory_selects_configured_provider() {
    let config = Config::default();
    let provider = from_config(&config).expect("ollama provider should build");
    assert_eq!(provider.name(), "ollama");
    assert_eq!(provider.dimension(), 768);
}

#[test]
fn factory_reports_missing_managed_service_key() {
    let mut config = Config::default();
    config.embedding.provider = EmbeddingProviderKind::OpenAi;
    config.embedding.openai = OpenAiConfig {
        api_key_env: "INTENT_CACHE_TEST_NO_SUCH_KEY".to_string(),
        ..OpenAiConfig::default()
    };

    assert!(matches!(
        from_config(&config),
        Err(IntentCacheError::Config(_))
    ));
}
