use std::io::Write;

use atrium_core::config::AppConfig;
use atrium_core::AtriumError;
use atrium_test_utils::write_config;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[workflow]
max_retries = 2
pass_threshold = 75
no_result_text = "Nothing to report."
workspace = "/tmp/atrium-test"

[model]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"
api_key = "sk-test-key"
max_tokens = 4096
temperature = 0.5

[model.retry]
max_retries = 5
initial_backoff_ms = 200

[[fallback_models]]
provider = "openai"
model_id = "gpt-4o"

[grader]
provider = "openai"
model_id = "gpt-4o-mini"

[telemetry]
base_url = "https://telemetry.example.com"
api_key = "anon-key"
room_rpc = "room_summary"

[weather]
enabled = false

[knowledge]
db_path = "/tmp/atrium-test/manuals.db"
max_results = 3

[rooms]
salc = "404 SALC"
lab = "501 Lab"
"#;

    let (_dir, path) = write_config(toml_content).expect("write config");
    let config = AppConfig::load(&path).expect("load config");

    assert_eq!(config.workflow.max_retries, 2);
    assert_eq!(config.workflow.pass_threshold, 75);
    assert_eq!(config.workflow.no_result_text, "Nothing to report.");
    assert_eq!(config.workflow.failure_text, "An error occurred while collecting data");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 4096);

    let retry = config.model.retry.as_ref().expect("retry present");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 200);
    assert_eq!(retry.max_backoff_ms, 30000);

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.grader_model().model_id, "gpt-4o-mini");

    let telemetry = config.telemetry.as_ref().expect("telemetry present");
    assert_eq!(telemetry.room_rpc, "room_summary");
    assert_eq!(telemetry.device_rpc, "get_device_anomaly");
    assert_eq!(telemetry.timeout_secs, 30);

    assert!(!config.weather.enabled);
    assert_eq!(config.knowledge.max_results, 3);
    assert_eq!(
        config.knowledge_db_path().to_str(),
        Some("/tmp/atrium-test/manuals.db")
    );
    assert_eq!(config.rooms.len(), 2);
    assert_eq!(config.rooms.get("lab").map(String::as_str), Some("501 Lab"));
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("ATRIUM_TEST_TELEMETRY_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
model_id = "test-model"

[telemetry]
base_url = "https://telemetry.example.com"
api_key = "${ATRIUM_TEST_TELEMETRY_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.telemetry.and_then(|t| t.api_key),
        Some("expanded-key-value".to_string())
    );

    std::env::remove_var("ATRIUM_TEST_TELEMETRY_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let (_dir, path) = write_config("[model]\nmodel_id = \"llama3.2\"\n").expect("write config");
    let config = AppConfig::load(&path).expect("load config");

    assert_eq!(config.workflow.max_retries, 3);
    assert_eq!(config.workflow.pass_threshold, 80);
    assert_eq!(config.workflow.no_result_text, "No result generated.");
    assert_eq!(config.model.provider, "anthropic");
    assert!(config.model.retry.is_none());
    assert!(config.fallback_models.is_empty());
    assert_eq!(config.grader_model().model_id, "llama3.2");
    assert!(config.telemetry.is_none());
    assert!(config.weather.enabled);
    assert_eq!(config.weather.timezone, "Asia/Tokyo");
    assert_eq!(config.knowledge.max_results, 5);
    assert_eq!(config.rooms.get("salc").map(String::as_str), Some("404 SALC"));
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AtriumError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_dir, path) = write_config("[model]\nprovider = \"openai\"\n").expect("write config");
    assert!(matches!(AppConfig::load(&path), Err(AtriumError::Config(_))));

    let (_dir, path) = write_config("[model]\nmodel_id = \"  \"\n").expect("write config");
    assert!(matches!(AppConfig::load(&path), Err(AtriumError::Config(_))));
}

#[test]
fn test_config_round_trips_through_toml() {
    let (_dir, path) = write_config("[model]\nmodel_id = \"gpt-4o\"\nprovider = \"openai\"\n")
        .expect("write config");
    let config = AppConfig::load(&path).expect("load config");

    let rendered = toml::to_string_pretty(&config).expect("render");
    let (_dir2, path2) = write_config(&rendered).expect("write rendered");
    let reloaded = AppConfig::load(&path2).expect("reload");

    assert_eq!(reloaded.model.provider, "openai");
    assert_eq!(reloaded.rooms, config.rooms);
    assert_eq!(reloaded.workflow.max_retries, config.workflow.max_retries);
}
