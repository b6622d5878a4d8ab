use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message sent to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Stop reason reported by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    /// Map a provider's stop/finish reason string.
    pub fn from_provider(reason: &str) -> Option<Self> {
        match reason {
            "end_turn" | "stop" => Some(Self::EndTurn),
            "tool_use" | "tool_calls" | "function_call" => Some(Self::ToolUse),
            "max_tokens" | "length" => Some(Self::MaxTokens),
            "stop_sequence" => Some(Self::StopSequence),
            _ => None,
        }
    }
}

/// Tool definition for sending to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A named lookup the model asked for, with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRequest {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl SubRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            arguments,
        }
    }
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<SubRequest>,
    pub stop_reason: Option<StopReason>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// What the answer model produced when asked to plan a query.
///
/// Either a final text, or a set of named sub-requests that the collection
/// stage dispatches through the tool registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Text(String),
    Requests(Vec<SubRequest>),
}

impl From<Completion> for Generation {
    fn from(completion: Completion) -> Self {
        if completion.tool_calls.is_empty() {
            Generation::Text(completion.text)
        } else {
            Generation::Requests(completion.tool_calls)
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: serde_json::Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: serde_json::Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: serde_json::Value::String(message.into()),
            is_error: true,
        }
    }
}

/// One entry of collected evidence: either data from a lookup or an inline
/// error marker for a lookup that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Evidence {
    Data {
        source: String,
        data: serde_json::Value,
    },
    Error {
        source: String,
        error: String,
    },
}

impl Evidence {
    pub fn data(source: impl Into<String>, data: serde_json::Value) -> Self {
        Self::Data {
            source: source.into(),
            data,
        }
    }

    pub fn error(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Error {
            source: source.into(),
            error: error.into(),
        }
    }

    /// Convert a tool outcome into evidence.
    pub fn from_tool(source: &str, result: ToolResult) -> Self {
        if result.is_error {
            let message = match result.content {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            Self::error(source, message)
        } else {
            Self::data(source, result.content)
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Self::Data { source, .. } | Self::Error { source, .. } => source,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// One-line rendering used in prompts.
    pub fn render(&self) -> String {
        match self {
            Self::Data { source, data } => format!("- [{}] {}", source, data),
            Self::Error { source, error } => format!("- [{}] error: {}", source, error),
        }
    }
}

/// Input to a knowledge-base retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub query: String,
    pub evidence: Vec<Evidence>,
    pub guidance: Option<String>,
}

/// Workflow stage names, used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Interface,
    Collection,
    Validation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Interface => "interface",
            Self::Collection => "collection",
            Self::Validation => "validation",
        };
        f.write_str(name)
    }
}

/// Workflow event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A new query entered the workflow.
    RunStarted { session_id: SessionId, query: String },
    /// An already-finalized query was asked again; the stored output was re-emitted.
    OutputReused { session_id: SessionId },
    /// A stage began a pass.
    StageEntered {
        session_id: SessionId,
        stage: Stage,
        pass: u32,
    },
    /// The collection stage finished gathering evidence.
    EvidenceCollected {
        session_id: SessionId,
        total: usize,
        errors: usize,
    },
    /// The validation stage graded a draft.
    Graded {
        session_id: SessionId,
        passed: bool,
        lowest_score: u8,
    },
    /// A failing grade sent the run back to collection.
    RetryScheduled {
        session_id: SessionId,
        retry_count: u32,
    },
    /// The run reached its terminal state.
    RunComplete {
        session_id: SessionId,
        passes: u32,
        validation_passed: bool,
        error: Option<String>,
        elapsed_ms: u64,
    },
}
