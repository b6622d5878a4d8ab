use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use atrium_core::config::ModelConfig;
use atrium_core::error::{AtriumError, Result};
use atrium_core::traits::{AnswerModel, LlmClient};
use atrium_core::types::{ChatMessage, Generation, ToolDefinition};

/// `AnswerModel` backed by an `LlmClient` and one model configuration.
pub struct LlmAnswerModel {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl LlmAnswerModel {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { llm, config }
    }
}

impl AnswerModel for LlmAnswerModel {
    fn plan(
        &self,
        system: String,
        query: String,
        tools: Vec<ToolDefinition>,
    ) -> BoxFuture<'_, Result<Generation>> {
        Box::pin(async move {
            let messages = vec![ChatMessage::system(system), ChatMessage::user(query)];
            let completion = self.llm.complete(&self.config, messages, &tools).await?;
            debug!(
                model = %self.config.model_id,
                tool_calls = completion.tool_calls.len(),
                "Planning response"
            );
            Ok(Generation::from(completion))
        })
    }

    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let completion = self
                .llm
                .complete(&self.config, vec![ChatMessage::user(prompt)], &[])
                .await?;
            let text = completion.text.trim().to_string();
            if text.is_empty() {
                return Err(AtriumError::LlmParse(format!(
                    "{} returned an empty response",
                    self.config.model_id
                )));
            }
            Ok(text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::types::{Completion, Role, SubRequest};
    use std::sync::Mutex;

    /// Returns a fixed completion and records the messages it saw.
    struct CannedLlm {
        completion: Completion,
        seen: Mutex<Vec<(Vec<ChatMessage>, usize)>>,
    }

    impl LlmClient for CannedLlm {
        fn complete(
            &self,
            _config: &ModelConfig,
            messages: Vec<ChatMessage>,
            tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<Completion>> {
            self.seen.lock().unwrap().push((messages, tools.len()));
            let completion = self.completion.clone();
            Box::pin(async move { Ok(completion) })
        }
    }

    fn config() -> ModelConfig {
        ModelConfig {
            provider: "anthropic".into(),
            model_id: "test-model".into(),
            api_key: None,
            base_url: None,
            max_tokens: 512,
            temperature: 0.0,
            retry: None,
        }
    }

    fn canned(completion: Completion) -> Arc<CannedLlm> {
        Arc::new(CannedLlm {
            completion,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_plan_returns_requests() {
        let llm = canned(Completion {
            tool_calls: vec![SubRequest::new("get_weather_data", serde_json::json!({}))],
            ..Default::default()
        });
        let model = LlmAnswerModel::new(llm.clone(), config());
        let tools = vec![ToolDefinition {
            name: "get_weather_data".into(),
            description: "weather".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];

        let plan = model.plan("sys".into(), "Is it raining?".into(), tools).await.unwrap();
        assert!(matches!(plan, Generation::Requests(ref r) if r[0].name == "get_weather_data"));

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0].0[0].role, Role::System);
        assert_eq!(seen[0].0[1].text, "Is it raining?");
        assert_eq!(seen[0].1, 1);
    }

    #[tokio::test]
    async fn test_complete_trims_text() {
        let llm = canned(Completion {
            text: "  SALC is comfortable.\n".into(),
            ..Default::default()
        });
        let model = LlmAnswerModel::new(llm, config());
        assert_eq!(model.complete("p".into()).await.unwrap(), "SALC is comfortable.");
    }

    #[tokio::test]
    async fn test_complete_rejects_empty_text() {
        let model = LlmAnswerModel::new(canned(Completion::default()), config());
        assert!(matches!(
            model.complete("p".into()).await,
            Err(AtriumError::LlmParse(_))
        ));
    }
}
