use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use atrium_core::config::WeatherConfig;
use atrium_core::error::{AtriumError, Result};
use atrium_core::traits::Tool;
use atrium_core::types::ToolResult;

use super::WEATHER_TOOL;

/// Open-Meteo `current` variables and the names they are reported under.
const CURRENT_FIELDS: &[(&str, &str)] = &[
    ("temperature_2m", "temperature_C"),
    ("relative_humidity_2m", "relative_humidity_%"),
    ("wind_speed_10m", "wind_speed_10m_kmh"),
    ("wind_direction_10m", "wind_direction_10m_deg"),
    ("apparent_temperature", "apparent_temperature_C"),
    ("is_day", "is_day"),
    ("wind_gusts_10m", "wind_gusts_10m_kmh"),
    ("precipitation", "precipitation_mm"),
    ("rain", "rain_mm"),
    ("showers", "showers_mm"),
    ("snowfall", "snowfall_mm"),
    ("weather_code", "weather_code"),
    ("cloud_cover", "cloud_cover_%"),
    ("pressure_msl", "pressure_msl_hPa"),
    ("surface_pressure", "surface_pressure_hPa"),
];

/// Current outdoor conditions at the building.
pub struct WeatherTool {
    http: reqwest::Client,
    config: WeatherConfig,
}

impl WeatherTool {
    pub fn new(config: &WeatherConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("Atrium/0.1")
            .build()
            .map_err(|e| AtriumError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let current = CURRENT_FIELDS
            .iter()
            .map(|(field, _)| *field)
            .collect::<Vec<_>>()
            .join(",");
        vec![
            ("latitude", self.config.latitude.to_string()),
            ("longitude", self.config.longitude.to_string()),
            ("current", current),
            ("timezone", self.config.timezone.clone()),
        ]
    }
}

/// Flatten an Open-Meteo forecast body into the reported field names.
fn parse_current(body: &serde_json::Value) -> Option<serde_json::Value> {
    let current = body.get("current")?.as_object()?;
    let mut out = serde_json::Map::new();

    if let Some(time) = current.get("time").and_then(|t| t.as_str()) {
        // Local ISO time ("2025-07-01T14:15") in the configured timezone
        out.insert("time_local".into(), serde_json::Value::String(time.replace('T', " ")));
    }
    for (field, name) in CURRENT_FIELDS {
        if let Some(value) = current.get(*field) {
            out.insert((*name).to_string(), value.clone());
        }
    }

    Some(serde_json::Value::Object(out))
}

impl Tool for WeatherTool {
    fn name(&self) -> &str {
        WEATHER_TOOL
    }

    fn description(&self) -> &str {
        "Get current outdoor weather at the building: temperature, humidity, wind, precipitation, cloud cover and pressure."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    fn timeout_secs(&self) -> u64 {
        30
    }

    fn execute(&self, _input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(&self.config.base_url)
                .query(&self.query())
                .send()
                .await
                .map_err(|e| AtriumError::ToolExecution {
                    tool: WEATHER_TOOL.to_string(),
                    message: format!("Request failed: {}", e),
                })?;

            let status = resp.status();
            if !status.is_success() {
                return Ok(ToolResult::error(format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                )));
            }

            let body: serde_json::Value = resp.json().await.map_err(|e| AtriumError::ToolExecution {
                tool: WEATHER_TOOL.to_string(),
                message: format!("Invalid response body: {}", e),
            })?;

            match parse_current(&body) {
                Some(current) => {
                    debug!(weather = %current, "Weather lookup complete");
                    Ok(ToolResult::success(current))
                }
                None => Ok(ToolResult::error("Weather response has no current conditions")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_current() {
        let body = serde_json::json!({
            "latitude": 34.66,
            "longitude": 135.45,
            "timezone": "Asia/Tokyo",
            "current": {
                "time": "2025-07-01T14:15",
                "interval": 900,
                "temperature_2m": 31.2,
                "relative_humidity_2m": 68,
                "is_day": 1,
                "weather_code": 3
            }
        });
        let parsed = parse_current(&body).unwrap();
        assert_eq!(parsed["time_local"], "2025-07-01 14:15");
        assert_eq!(parsed["temperature_C"], 31.2);
        assert_eq!(parsed["relative_humidity_%"], 68);
        assert_eq!(parsed["weather_code"], 3);
        assert!(parsed.get("interval").is_none());
        assert!(parsed.get("rain_mm").is_none());
    }

    #[test]
    fn test_parse_current_missing() {
        assert!(parse_current(&serde_json::json!({"error": true, "reason": "bad"})).is_none());
    }

    #[test]
    fn test_query_lists_all_fields() {
        let tool = WeatherTool::new(&WeatherConfig::default()).unwrap();
        let query = tool.query();
        let current = &query.iter().find(|(k, _)| *k == "current").unwrap().1;
        assert_eq!(current.split(',').count(), CURRENT_FIELDS.len());
        assert!(query.contains(&("timezone", "Asia/Tokyo".to_string())));
    }
}
