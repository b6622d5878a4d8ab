use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Multi-provider, non-streaming LLM client.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and wait for the full response.
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<Completion>>;
}

/// Generation and grading capability used by the workflow.
pub trait AnswerModel: Send + Sync + 'static {
    /// Decide which lookups a query needs.
    ///
    /// Returns `Generation::Requests` when the model asks for lookups and
    /// `Generation::Text` when it answers directly.
    fn plan(
        &self,
        system: String,
        query: String,
        tools: Vec<ToolDefinition>,
    ) -> BoxFuture<'_, Result<Generation>>;

    /// Produce text for a fully composed prompt.
    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>>;
}

/// A named data lookup the model can request.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the lookup. Lookups that reach the service but find nothing
    /// return `ToolResult::error` rather than `Err`.
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Supplementary context for a query.
pub trait KnowledgeBase: Send + Sync + 'static {
    /// Retrieve a text summary relevant to the query, evidence, and guidance.
    /// An empty string means nothing relevant was found.
    fn retrieve(&self, request: RetrievalRequest) -> BoxFuture<'_, Result<String>>;
}
