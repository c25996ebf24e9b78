//! Configuration integration tests against the public `Config::load` API.

use convoy_core::Config;
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_load_project_config() {
    let temp = TempDir::new().expect("failed to create temp dir");

    let config_content = r#"{
        "model": "anthropic/claude-sonnet-4-5",
        "max_retry_attempts": 4
    }"#;
    fs::write(temp.path().join("convoy.json"), config_content).expect("failed to write config");

    let (config, sources) = Config::load(Some(temp.path())).await.expect("failed to load config");

    assert_eq!(config.model, Some("anthropic/claude-sonnet-4-5".to_string()));
    assert_eq!(config.max_retry_attempts, Some(4));
    assert!(!sources.is_empty());
}

#[tokio::test]
async fn test_load_jsonc_config() {
    let temp = TempDir::new().expect("failed to create temp dir");

    let config_content = r#"{
        // This is a comment
        "model": "openai/gpt-4o",
        /* Multi-line
           comment */
        "log_level": "debug"
    }"#;
    fs::write(temp.path().join("convoy.jsonc"), config_content).expect("failed to write config");

    let (config, _) = Config::load(Some(temp.path())).await.expect("failed to load config");

    assert_eq!(config.model, Some("openai/gpt-4o".to_string()));
}

#[tokio::test]
async fn test_default_config_when_nothing_present() {
    let temp = TempDir::new().expect("failed to create temp dir");

    let (config, sources) = Config::load(Some(temp.path())).await.expect("failed to load config");

    let project_config_found = sources
        .iter()
        .any(|s| s.file_name().is_some_and(|n| n.to_string_lossy().contains("convoy")));
    assert!(!project_config_found);
    assert!(config.model.is_none());
}

#[tokio::test]
async fn test_save_and_reload_config() {
    let temp = TempDir::new().expect("failed to create temp dir");

    let config = Config {
        model: Some("anthropic/claude-haiku-4-5".to_string()),
        max_retry_attempts: Some(7),
        ..Default::default()
    };
    config.save(Some(temp.path())).await.expect("failed to save config");

    let (loaded, _) = Config::load(Some(temp.path())).await.expect("failed to reload config");

    assert_eq!(loaded.model, Some("anthropic/claude-haiku-4-5".to_string()));
    assert_eq!(loaded.max_retry_attempts, Some(7));
}

#[tokio::test]
async fn test_env_var_overrides_project_file() {
    let temp = TempDir::new().expect("failed to create temp dir");
    fs::write(
        temp.path().join("convoy.json"),
        r#"{"model": "project/model"}"#,
    )
    .expect("failed to write config");

    std::env::set_var("CONVOY_MODEL", "env/model");
    let (config, _) = Config::load(Some(temp.path())).await.expect("failed to load config");
    std::env::remove_var("CONVOY_MODEL");

    // Individual env vars are the layer above the project file (§6).
    assert_eq!(config.model, Some("env/model".to_string()));
}

#[tokio::test]
async fn test_nested_directory_discovers_ancestor_config() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let nested = temp.path().join("a").join("b").join("c");
    fs::create_dir_all(&nested).expect("failed to create nested dir");
    fs::write(
        temp.path().join("convoy.json"),
        r#"{"model": "anthropic/claude-sonnet-4-5"}"#,
    )
    .expect("failed to write config");

    let (config, sources) = Config::load(Some(&nested)).await.expect("failed to load config");

    assert_eq!(config.model, Some("anthropic/claude-sonnet-4-5".to_string()));
    assert!(sources.iter().any(|s| s == &temp.path().join("convoy.json")));
}
