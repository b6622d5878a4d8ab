use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use atrium_core::config::AppConfig;
use atrium_core::error::{AtriumError, Result};
use atrium_core::traits::Tool;
use atrium_core::types::{ToolDefinition, ToolResult};

use crate::builtin::telemetry::{DeviceDataTool, RoomDataTool, TelemetryClient};
use crate::builtin::weather::WeatherTool;

/// Registry of available lookups.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for the model, sorted by name so prompts are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name, bounded by the tool's timeout.
    pub async fn execute(&self, name: &str, input: serde_json::Value) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| AtriumError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());
        debug!(tool = %name, input = %input, "Executing lookup");

        match tokio::time::timeout(timeout, tool.execute(input)).await {
            Ok(result) => result,
            Err(_) => Err(AtriumError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Create a registry with the building lookups the config enables.
    pub fn with_builtins(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();

        match &config.telemetry {
            Some(telemetry) => {
                let client = Arc::new(TelemetryClient::new(telemetry)?);
                registry.register(RoomDataTool::new(client.clone()));
                registry.register(DeviceDataTool::new(client));
            }
            None => warn!("No [telemetry] section configured, room and device lookups disabled"),
        }

        if config.weather.enabled {
            registry.register(WeatherTool::new(&config.weather)?);
        }

        Ok(registry)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_test_utils::{StaticTool, ToolOutcome};
    use futures::future::BoxFuture;

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never answers in time"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        fn execute(&self, _input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(ToolResult::success(serde_json::json!("late")))
            })
        }

        fn timeout_secs(&self) -> u64 {
            2
        }
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("get_room_data", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AtriumError::ToolNotFound(name) if name == "get_room_data"));
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(StaticTool::new(
            "get_room_data",
            ToolOutcome::Data(serde_json::json!([{"temp": 26.5}])),
        ));
        let result = registry
            .execute("get_room_data", serde_json::json!({"room": "404 SALC"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content[0]["temp"], 26.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let err = registry.execute("slow", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AtriumError::ToolTimeout { timeout_secs: 2, .. }));
    }

    #[test]
    fn test_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(StaticTool::new("get_weather_data", ToolOutcome::Data(serde_json::json!({}))));
        registry.register(StaticTool::new("get_device_data", ToolOutcome::Data(serde_json::json!({}))));
        registry.register(StaticTool::new("get_room_data", ToolOutcome::Data(serde_json::json!({}))));
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["get_device_data", "get_room_data", "get_weather_data"]);
        assert!(registry.unregister("get_room_data"));
        assert_eq!(registry.list(), vec!["get_device_data", "get_weather_data"]);
    }

    #[test]
    fn test_with_builtins_respects_config() {
        let config: AppConfig = toml::from_str(
            r#"
[model]
model_id = "m"

[weather]
enabled = false
"#,
        )
        .unwrap();
        let registry = ToolRegistry::with_builtins(&config).unwrap();
        assert!(registry.is_empty());

        let config: AppConfig = toml::from_str(
            r#"
[model]
model_id = "m"

[telemetry]
base_url = "https://telemetry.example.com"
"#,
        )
        .unwrap();
        let registry = ToolRegistry::with_builtins(&config).unwrap();
        assert_eq!(
            registry.list(),
            vec!["get_device_data", "get_room_data", "get_weather_data"]
        );
    }
}
