use super::load_existing_config as load_existing_config_impl;
use super::non_empty;
use tempfile::TempDir;

#[test]
fn load_existing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");
    assert_eq!(config.base_dir, temp_dir.path());
    assert!(!config.embedding.ollama.host.is_empty());
    assert!(config.embedding.ollama.port > 0);
    assert!(!config.embedding.model().is_empty());
    assert!(config.index.vector_dim > 0);
}

#[test]
fn non_empty_validator() {
    assert!(non_empty(&"model".to_string()).is_ok());
    assert!(non_empty(&"   ".to_string()).is_err());
}
