use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn exit_codes_follow_error_class() {
    let cases = [
        (IntentCacheError::Validation("empty".to_string()), 2),
        (IntentCacheError::Config("bad".to_string()), 3),
        (IntentCacheError::IndexUnavailable("down".to_string()), 4),
        (IntentCacheError::IndexSchemaConflict("dim".to_string()), 4),
        (IntentCacheError::IndexNotFound("missing".to_string()), 4),
        (IntentCacheError::EmbeddingProvider("down".to_string()), 5),
        (IntentCacheError::VariantProvider("key".to_string()), 5),
    ];
    for (err, code) in cases {
        assert_eq!(exit_code(&anyhow::Error::from(err)), code);
    }

    assert_eq!(exit_code(&anyhow::anyhow!("something else")), 1);
}

#[test]
fn exit_code_sees_through_context() {
    let err = anyhow::Error::from(IntentCacheError::Validation("empty".to_string()))
        .context("Failed to ingest");
    assert_eq!(exit_code(&err), 2);
}

#[test]
fn catalog_entries_default_optional_fields() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("catalog.json");
    fs::write(
        &path,
        r#"[
            {"intent_id": "billing.upgrade", "question": "How do I upgrade my plan?", "auto_variant_count": 3},
            {"intent_id": "account.cancel", "question": "How do I cancel?", "variants": ["Cancel my account"]}
        ]"#,
    )
    .expect("should write catalog");

    let entries = load_catalog(&path).expect("catalog should parse");

    assert_eq!(
        entries,
        vec![
            CatalogEntry {
                intent_id: "billing.upgrade".to_string(),
                question: "How do I upgrade my plan?".to_string(),
                variants: Vec::new(),
                auto_variant_count: Some(3),
            },
            CatalogEntry {
                intent_id: "account.cancel".to_string(),
                question: "How do I cancel?".to_string(),
                variants: vec!["Cancel my account".to_string()],
                auto_variant_count: None,
            },
        ]
    );
}

#[test]
fn malformed_catalog_names_the_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("broken.json");
    fs::write(&path, r#"{"intent_id": "not an array"}"#).expect("should write catalog");

    let err = load_catalog(&path).expect_err("object is not a catalog");
    assert!(format!("{:#}", err).contains("broken.json"));

    let missing = load_catalog(&temp_dir.path().join("missing.json"));
    assert!(missing.is_err());
}
