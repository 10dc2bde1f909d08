use super::*;
use crate::variants::normalize;

const UPGRADE_PLAN: &str = "How do I upgrade my plan?";

#[test]
fn action_phrase_strips_question_stem() {
    assert_eq!(action_phrase(UPGRADE_PLAN), "upgrade my plan");
    assert_eq!(action_phrase("can I   cancel my account."), "cancel my account");
    assert_eq!(action_phrase("Refund policy"), "refund policy");
    // stems only match on a word boundary
    assert_eq!(action_phrase("How tough is it?"), "how tough is it");
}

#[tokio::test]
async fn generates_requested_count_without_the_question() {
    let provider = BuiltinVariantProvider::new();
    let variants = provider
        .generate(UPGRADE_PLAN, 3)
        .await
        .expect("builtin never fails");

    assert_eq!(variants.len(), 3);
    assert!(
        variants
            .iter()
            .all(|v| normalize(v) != normalize(UPGRADE_PLAN))
    );
    assert_eq!(variants[0], "Can you tell me how to upgrade my plan?");
    assert_eq!(variants[1], "I want to upgrade my plan");
}

#[tokio::test]
async fn output_is_deterministic() {
    let provider = BuiltinVariantProvider::new();
    let first = provider.generate(UPGRADE_PLAN, 8).await.expect("first run");
    let second = provider.generate(UPGRADE_PLAN, 8).await.expect("second run");
    assert_eq!(first, second);
}

#[tokio::test]
async fn zero_count_yields_nothing() {
    let provider = BuiltinVariantProvider::new();
    assert!(provider.generate(UPGRADE_PLAN, 0).await.expect("ok").is_empty());
}

#[tokio::test]
async fn large_counts_fall_back_to_substitutions() {
    let provider = BuiltinVariantProvider::new();
    let variants = provider.generate(UPGRADE_PLAN, 30).await.expect("ok");

    assert!(variants.len() > TEMPLATES.len() - 1);
    assert!(variants.len() <= 30);
    assert!(variants.iter().any(|v| v == "How do i enhance my plan?"));
    assert!(variants.iter().any(|v| v == "What do i upgrade my plan?"));

    let unique: std::collections::HashSet<_> = variants.iter().map(|v| normalize(v)).collect();
    assert_eq!(unique.len(), variants.len());
}

#[test]
fn capitalize_handles_empty_and_unicode() {
    assert_eq!(capitalize(""), "");
    assert_eq!(capitalize("émile"), "Émile");
}
