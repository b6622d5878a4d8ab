use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use atrium_core::config::ModelConfig;
use atrium_core::error::{AtriumError, Result};
use atrium_core::traits::LlmClient;
use atrium_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: &'static str,
    function: OaiToolDef,
}

#[derive(Serialize)]
struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCall>,
}

#[derive(Deserialize, Debug)]
struct OaiToolCall {
    #[serde(default)]
    id: String,
    function: OaiFunction,
}

#[derive(Deserialize, Debug)]
struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Debug)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|m| OaiMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.text,
        })
        .collect()
}

/// Tool arguments arrive as a JSON-encoded string.
fn parse_arguments(name: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(tool = %name, error = %e, "Tool arguments are not valid JSON, passing raw string");
            serde_json::Value::String(raw.to_string())
        }
    }
}

fn parse_response(body: &str) -> Result<Completion> {
    let resp: ChatResponse =
        serde_json::from_str(body).map_err(|e| AtriumError::LlmParse(e.to_string()))?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AtriumError::LlmParse("response has no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| SubRequest {
            arguments: parse_arguments(&tc.function.name, &tc.function.arguments),
            id: tc.id,
            name: tc.function.name,
        })
        .collect();

    let (input_tokens, output_tokens) = resp
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    Ok(Completion {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        stop_reason: choice.finish_reason.as_deref().and_then(StopReason::from_provider),
        input_tokens,
        output_tokens,
    })
}

impl LlmClient for OpenAiClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<Completion>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let oai_tools: Vec<OaiTool> = tools
                .iter()
                .map(|t| OaiTool {
                    r#type: "function",
                    function: OaiToolDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect();

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                tools: oai_tools,
            };

            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
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
                "OpenAI-compatible completion"
            );
            Ok(completion)
        })
    }
}
