//! Room and device anomaly lookups against the building telemetry database.
//!
//! The database exposes PostgREST-style RPC endpoints; each lookup posts a
//! single named argument and receives a JSON array of rows.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use atrium_core::config::TelemetryConfig;
use atrium_core::error::{AtriumError, Result};
use atrium_core::traits::Tool;
use atrium_core::types::ToolResult;

use super::{DEVICE_DATA_TOOL, ROOM_DATA_TOOL};

/// Shared HTTP client for the telemetry RPCs.
pub struct TelemetryClient {
    http: reqwest::Client,
    config: TelemetryConfig,
}

impl TelemetryClient {
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Atrium/0.1")
            .build()
            .map_err(|e| AtriumError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    fn rpc_url(&self, rpc: &str) -> String {
        format!(
            "{}/rest/v1/rpc/{}",
            self.config.base_url.trim_end_matches('/'),
            rpc
        )
    }

    /// Call `rpc` with `{arg_name: value}` and return the raw JSON body.
    async fn call(&self, tool: &str, rpc: &str, arg_name: &str, value: &str) -> Result<CallOutcome> {
        let mut body = serde_json::Map::new();
        body.insert(arg_name.to_string(), serde_json::Value::String(value.to_string()));

        let mut req = self.http.post(self.rpc_url(rpc)).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.map_err(|e| AtriumError::ToolExecution {
            tool: tool.to_string(),
            message: format!("Request failed: {}", e),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Ok(CallOutcome::Status(format!(
                "HTTP {} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                text
            )));
        }

        let data: serde_json::Value = resp.json().await.map_err(|e| AtriumError::ToolExecution {
            tool: tool.to_string(),
            message: format!("Invalid response body: {}", e),
        })?;
        debug!(tool, rpc, value, "Telemetry RPC returned");
        Ok(CallOutcome::Body(data))
    }
}

enum CallOutcome {
    Body(serde_json::Value),
    Status(String),
}

/// Null, empty arrays and empty objects all mean "no rows".
fn has_rows(data: &serde_json::Value) -> bool {
    match data {
        serde_json::Value::Null => false,
        serde_json::Value::Array(rows) => !rows.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn into_result(outcome: CallOutcome, missing: String) -> ToolResult {
    match outcome {
        CallOutcome::Body(data) if has_rows(&data) => ToolResult::success(data),
        CallOutcome::Body(_) => ToolResult::error(missing),
        CallOutcome::Status(message) => ToolResult::error(message),
    }
}

// ── get_room_data ───────────────────────────────────────────────

pub struct RoomDataTool {
    client: Arc<TelemetryClient>,
}

impl RoomDataTool {
    pub fn new(client: Arc<TelemetryClient>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct RoomInput {
    room: String,
}

impl Tool for RoomDataTool {
    fn name(&self) -> &str {
        ROOM_DATA_TOOL
    }

    fn description(&self) -> &str {
        "Get sensor readings and anomaly flags for a room of the building, by official room name."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "room": {
                    "type": "string",
                    "description": "Official room name, e.g. \"404 SALC\""
                }
            },
            "required": ["room"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.client.config.timeout_secs
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: RoomInput = serde_json::from_value(input)
                .map_err(|e| AtriumError::ToolValidation(e.to_string()))?;

            let outcome = self
                .client
                .call(ROOM_DATA_TOOL, &self.client.config.room_rpc, "room_input", &params.room)
                .await?;
            Ok(into_result(
                outcome,
                format!("No data found for room: {}", params.room),
            ))
        })
    }
}

// ── get_device_data ─────────────────────────────────────────────

pub struct DeviceDataTool {
    client: Arc<TelemetryClient>,
}

impl DeviceDataTool {
    pub fn new(client: Arc<TelemetryClient>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct DeviceInput {
    device_id: String,
}

impl Tool for DeviceDataTool {
    fn name(&self) -> &str {
        DEVICE_DATA_TOOL
    }

    fn description(&self) -> &str {
        "Get sensor readings and anomaly flags for a single device, by device UUID."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "device_id": {
                    "type": "string",
                    "description": "Device UUID (8-4-4-4-12 hex)"
                }
            },
            "required": ["device_id"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.client.config.timeout_secs
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: DeviceInput = serde_json::from_value(input)
                .map_err(|e| AtriumError::ToolValidation(e.to_string()))?;

            let outcome = self
                .client
                .call(
                    DEVICE_DATA_TOOL,
                    &self.client.config.device_rpc,
                    "device_input",
                    &params.device_id,
                )
                .await?;
            Ok(into_result(
                outcome,
                format!("No data found for device: {}", params.device_id),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> Arc<TelemetryClient> {
        let config = TelemetryConfig {
            base_url: base_url.into(),
            api_key: Some("anon".into()),
            room_rpc: "get_room_anomaly".into(),
            device_rpc: "get_device_anomaly".into(),
            timeout_secs: 5,
        };
        Arc::new(TelemetryClient::new(&config).unwrap())
    }

    #[test]
    fn test_rpc_url() {
        let c = client("https://db.example.com/");
        assert_eq!(
            c.rpc_url("get_room_anomaly"),
            "https://db.example.com/rest/v1/rpc/get_room_anomaly"
        );
    }

    #[test]
    fn test_empty_rows_become_error_result() {
        let result = into_result(
            CallOutcome::Body(serde_json::json!([])),
            "No data found for room: 404 SALC".into(),
        );
        assert!(result.is_error);
        assert_eq!(result.content, "No data found for room: 404 SALC");

        let result = into_result(CallOutcome::Body(serde_json::Value::Null), "none".into());
        assert!(result.is_error);

        let result = into_result(
            CallOutcome::Body(serde_json::json!([{"device_id": "abc", "anomaly": true}])),
            "none".into(),
        );
        assert!(!result.is_error);
    }

    #[test]
    fn test_http_status_becomes_error_result() {
        let result = into_result(CallOutcome::Status("HTTP 404 Not Found: {}".into()), "none".into());
        assert!(result.is_error);
        assert!(result.content.as_str().unwrap().starts_with("HTTP 404"));
    }

    #[tokio::test]
    async fn test_room_tool_rejects_missing_argument() {
        let tool = RoomDataTool::new(client("https://db.example.com"));
        let err = tool
            .execute(serde_json::json!({"device_id": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AtriumError::ToolValidation(_)));
    }

    #[tokio::test]
    async fn test_device_tool_rejects_missing_argument() {
        let tool = DeviceDataTool::new(client("https://db.example.com"));
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AtriumError::ToolValidation(_)));
    }
}
