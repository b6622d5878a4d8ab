//! Scripted collaborators and fixtures shared by Atrium's tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;

use atrium_core::error::{AtriumError, Result};
use atrium_core::traits::{AnswerModel, KnowledgeBase, Tool};
use atrium_core::types::{Generation, RetrievalRequest, ToolDefinition, ToolResult};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Answer model ────────────────────────────────────────────────

enum Step<T> {
    Ok(T),
    Fail(String),
}

/// An `AnswerModel` that replays queued responses.
///
/// When the plan queue is empty `plan` returns the default plan (an empty
/// text answer unless set). When the completion queue is empty `complete`
/// returns the default completion, or an error if none is set.
#[derive(Default)]
pub struct ScriptedModel {
    plans: Mutex<VecDeque<Step<Generation>>>,
    completions: Mutex<VecDeque<Step<String>>>,
    default_plan: Option<Generation>,
    default_completion: Option<String>,
    prompts: Mutex<Vec<String>>,
    plan_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(self, plan: Generation) -> Self {
        lock(&self.plans).push_back(Step::Ok(plan));
        self
    }

    pub fn with_plan_failure(self, message: &str) -> Self {
        lock(&self.plans).push_back(Step::Fail(message.to_string()));
        self
    }

    pub fn with_default_plan(mut self, plan: Generation) -> Self {
        self.default_plan = Some(plan);
        self
    }

    pub fn with_completion(self, text: &str) -> Self {
        lock(&self.completions).push_back(Step::Ok(text.to_string()));
        self
    }

    pub fn with_completion_failure(self, message: &str) -> Self {
        lock(&self.completions).push_back(Step::Fail(message.to_string()));
        self
    }

    pub fn with_default_completion(mut self, text: &str) -> Self {
        self.default_completion = Some(text.to_string());
        self
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    /// Prompts passed to `complete`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl AnswerModel for ScriptedModel {
    fn plan(
        &self,
        _system: String,
        _query: String,
        _tools: Vec<ToolDefinition>,
    ) -> BoxFuture<'_, Result<Generation>> {
        Box::pin(async move {
            self.plan_calls.fetch_add(1, Ordering::SeqCst);
            match lock(&self.plans).pop_front() {
                Some(Step::Ok(plan)) => Ok(plan),
                Some(Step::Fail(message)) => Err(AtriumError::LlmRequest(message)),
                None => Ok(self
                    .default_plan
                    .clone()
                    .unwrap_or_else(|| Generation::Text(String::new()))),
            }
        })
    }

    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.prompts).push(prompt);
            match lock(&self.completions).pop_front() {
                Some(Step::Ok(text)) => Ok(text),
                Some(Step::Fail(message)) => Err(AtriumError::LlmRequest(message)),
                None => self
                    .default_completion
                    .clone()
                    .ok_or_else(|| AtriumError::LlmRequest("scripted completions exhausted".into())),
            }
        })
    }
}

// ── Tools ───────────────────────────────────────────────────────

/// What a `StaticTool` does on every call.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// Successful lookup returning this payload.
    Data(serde_json::Value),
    /// Lookup reached the service but reported an error.
    ErrorResult(String),
    /// Lookup failed outright.
    Fail(String),
}

/// A tool with a fixed outcome that counts its calls.
pub struct StaticTool {
    name: String,
    outcome: ToolOutcome,
    calls: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl StaticTool {
    pub fn new(name: &str, outcome: ToolOutcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared call counter; take it before handing the tool to a registry.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Shared log of inputs received.
    pub fn input_log(&self) -> Arc<Mutex<Vec<serde_json::Value>>> {
        self.inputs.clone()
    }
}

impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Static test lookup"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.inputs).push(input);
            match &self.outcome {
                ToolOutcome::Data(value) => Ok(ToolResult::success(value.clone())),
                ToolOutcome::ErrorResult(message) => Ok(ToolResult::error(message.clone())),
                ToolOutcome::Fail(message) => Err(AtriumError::ToolExecution {
                    tool: self.name.clone(),
                    message: message.clone(),
                }),
            }
        })
    }
}

// ── Knowledge base ──────────────────────────────────────────────

/// A knowledge base with a fixed reply that records its requests.
pub struct StaticKnowledge {
    reply: Step<String>,
    requests: Mutex<Vec<RetrievalRequest>>,
}

impl StaticKnowledge {
    pub fn text(text: &str) -> Self {
        Self {
            reply: Step::Ok(text.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Finds nothing.
    pub fn empty() -> Self {
        Self::text("")
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Step::Fail(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RetrievalRequest> {
        lock(&self.requests).clone()
    }
}

impl KnowledgeBase for StaticKnowledge {
    fn retrieve(&self, request: RetrievalRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            lock(&self.requests).push(request);
            match &self.reply {
                Step::Ok(text) => Ok(text.clone()),
                Step::Fail(message) => Err(AtriumError::Knowledge(message.clone())),
            }
        })
    }
}

// ── Fixtures ────────────────────────────────────────────────────

/// A grading reply with the given relevance, completeness, accuracy and
/// consistency scores.
pub fn grade_json(scores: [u8; 4], improved_response: Option<&str>) -> String {
    let criterion = |score: u8| {
        serde_json::json!({
            "score": score,
            "reason": format!("scored {}", score),
        })
    };
    let mut grade = serde_json::json!({
        "relevance": criterion(scores[0]),
        "completeness": criterion(scores[1]),
        "accuracy": criterion(scores[2]),
        "consistency": criterion(scores[3]),
    });
    if let Some(improved) = improved_response {
        grade["improved_response"] = serde_json::Value::String(improved.to_string());
    }
    grade.to_string()
}

/// Write `contents` to `atrium.toml` in a fresh temp dir. Keep the dir alive
/// for as long as the path is used.
pub fn write_config(contents: &str) -> std::io::Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("atrium.toml");
    std::fs::write(&path, contents)?;
    Ok((dir, path))
}
