use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AtriumError, Result};

/// Top-level Atrium configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    /// Model used for grading drafts. Defaults to `model`.
    #[serde(default)]
    pub grader: Option<ModelConfig>,
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    /// Room alias (lowercase) → official room name.
    #[serde(default = "default_room_aliases")]
    pub rooms: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Validation-triggered retries allowed before the run gives up.
    #[serde(default = "default_max_retries_workflow")]
    pub max_retries: u32,
    /// Minimum score (0-100) every criterion must reach for a draft to pass.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: u8,
    /// Answer emitted when a run finishes without any answer.
    #[serde(default = "default_no_result_text")]
    pub no_result_text: String,
    /// Draft used when a collection pass fails outright.
    #[serde(default = "default_failure_text")]
    pub failure_text: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries_workflow(),
            pass_threshold: default_pass_threshold(),
            no_result_text: default_no_result_text(),
            failure_text: default_failure_text(),
            workspace: default_workspace(),
        }
    }
}

fn default_max_retries_workflow() -> u32 { 3 }
fn default_pass_threshold() -> u8 { 80 }
fn default_no_result_text() -> String { "No result generated.".to_string() }
fn default_failure_text() -> String { "An error occurred while collecting data".to_string() }
fn default_workspace() -> String { "~/.atrium".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "anthropic".to_string() }
fn default_max_tokens() -> u32 { 2048 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Building telemetry database (PostgREST-style RPC endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_room_rpc")]
    pub room_rpc: String,
    #[serde(default = "default_device_rpc")]
    pub device_rpc: String,
    #[serde(default = "default_telemetry_timeout")]
    pub timeout_secs: u64,
}

fn default_room_rpc() -> String { "get_room_anomaly".to_string() }
fn default_device_rpc() -> String { "get_device_anomaly".to_string() }
fn default_telemetry_timeout() -> u64 { 30 }

/// Current-conditions weather lookup (Open-Meteo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_weather_enabled")]
    pub enabled: bool,
    #[serde(default = "default_weather_url")]
    pub base_url: String,
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: default_weather_enabled(),
            base_url: default_weather_url(),
            latitude: default_latitude(),
            longitude: default_longitude(),
            timezone: default_timezone(),
        }
    }
}

fn default_weather_enabled() -> bool { true }
fn default_weather_url() -> String { "https://api.open-meteo.com/v1/forecast".to_string() }
fn default_latitude() -> f64 { 34.664967 }
fn default_longitude() -> f64 { 135.451014 }
fn default_timezone() -> String { "Asia/Tokyo".to_string() }

/// Local manual store used for knowledge retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Database path. Default: <workspace>/knowledge.db
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> usize { 5 }

/// Aliases for the rooms of the building.
pub fn default_room_aliases() -> BTreeMap<String, String> {
    [
        ("salc", "404 SALC"),
        ("cw2", "403 CW2"),
        ("halc", "409 HALC"),
        ("piloty", "ピロティ"),
        ("lounge", "交流スペース西"),
        ("食堂", "食堂"),
        ("server room", "サーバールーム２"),
        ("entrance", "風除室"),
    ]
    .into_iter()
    .map(|(alias, name)| (alias.to_string(), name.to_string()))
    .collect()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AtriumError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| AtriumError::Config(e.to_string()))?;
        config.validate()?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Reject settings the workflow cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workflow.pass_threshold > 100 {
            return Err(AtriumError::Config(format!(
                "workflow.pass_threshold must be within 0-100, got {}",
                self.workflow.pass_threshold
            )));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(AtriumError::Config("model.model_id must not be empty".into()));
        }
        Ok(())
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        let ws = &self.workflow.workspace;
        if let Some(rest) = ws.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(ws)
    }

    /// Resolve the knowledge database path.
    pub fn knowledge_db_path(&self) -> PathBuf {
        match &self.knowledge.db_path {
            Some(path) => PathBuf::from(path),
            None => self.workspace_dir().join("knowledge.db"),
        }
    }

    /// The model used for grading.
    pub fn grader_model(&self) -> &ModelConfig {
        self.grader.as_ref().unwrap_or(&self.model)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
