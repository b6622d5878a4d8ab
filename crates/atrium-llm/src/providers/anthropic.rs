use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use atrium_core::config::ModelConfig;
use atrium_core::error::{AtriumError, Result};
use atrium_core::traits::LlmClient;
use atrium_core::types::*;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

// Anthropic API request types
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

// Anthropic API response types
#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Split out the system prompt; Anthropic takes it as a top-level field.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Option<String> = None;
    let mut api_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                system = Some(match system {
                    Some(existing) => format!("{}\n\n{}", existing, msg.text),
                    None => msg.text,
                });
            }
            Role::User => api_msgs.push(ApiMessage {
                role: "user",
                content: msg.text,
            }),
            Role::Assistant => api_msgs.push(ApiMessage {
                role: "assistant",
                content: msg.text,
            }),
        }
    }

    (system, api_msgs)
}

fn parse_response(body: &str) -> Result<Completion> {
    let resp: AnthropicResponse =
        serde_json::from_str(body).map_err(|e| AtriumError::LlmParse(e.to_string()))?;

    let mut completion = Completion {
        stop_reason: resp.stop_reason.as_deref().and_then(StopReason::from_provider),
        ..Default::default()
    };

    for block in resp.content {
        match block {
            ResponseBlock::Text { text } => completion.text.push_str(&text),
            ResponseBlock::ToolUse { id, name, input } => completion.tool_calls.push(SubRequest {
                id,
                name,
                arguments: input,
            }),
            ResponseBlock::Other => {}
        }
    }

    if let Some(usage) = resp.usage {
        completion.input_tokens = usage.input_tokens;
        completion.output_tokens = usage.output_tokens;
    }

    Ok(completion)
}

impl LlmClient for AnthropicClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<Completion>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| AtriumError::Config("Anthropic API key not set".into()))?;

            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let (system, api_messages) = convert_messages(messages);

            let api_tools: Vec<ApiTool> = tools
                .iter()
                .map(|t| ApiTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect();

            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                messages: api_messages,
                system,
                tools: api_tools,
            };

            let response = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| AtriumError::LlmRequest(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| AtriumError::LlmRequest(e.to_string()))?;

            if !status.is_success() {
                return Err(AtriumError::LlmRequest(format!("HTTP {}: {}", status, text)));
            }

            let completion = parse_response(&text)?;
            debug!(
                model = %config.model_id,
                input_tokens = completion.input_tokens,
                output_tokens = completion.output_tokens,
                tool_calls = completion.tool_calls.len(),
                "Anthropic completion"
            );
            Ok(completion)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_messages_extracts_system() {
        let (system, msgs) = convert_messages(vec![
            ChatMessage::system("You are a building assistant."),
            ChatMessage::user("Is SALC too warm?"),
        ]);
        assert_eq!(system.as_deref(), Some("You are a building assistant."));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "user");
    }

    #[test]
    fn test_parse_text_response() {
        let body = r#"{
            "id": "msg_1",
            "content": [{"type": "text", "text": "It is 24 degrees."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 6}
        }"#;
        let completion = parse_response(body).unwrap();
        assert_eq!(completion.text, "It is 24 degrees.");
        assert!(completion.tool_calls.is_empty());
        assert_eq!(completion.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(completion.output_tokens, 6);
    }

    #[test]
    fn test_parse_tool_use_response() {
        let body = r#"{
            "content": [
                {"type": "text", "text": "Checking the room."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_room_data", "input": {"room": "404 SALC"}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use"
        }"#;
        let completion = parse_response(body).unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "get_room_data");
        assert_eq!(completion.tool_calls[0].arguments["room"], "404 SALC");
        assert!(matches!(
            Generation::from(completion),
            Generation::Requests(_)
        ));
    }

    #[test]
    fn test_parse_invalid_body() {
        assert!(matches!(
            parse_response("<html>bad gateway</html>"),
            Err(AtriumError::LlmParse(_))
        ));
    }
}
