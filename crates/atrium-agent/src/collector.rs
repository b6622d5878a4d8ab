use std::sync::Arc;

use tracing::{debug, info, warn};

use atrium_core::error::{AtriumError, Result};
use atrium_core::record::WorkflowRecord;
use atrium_core::traits::{AnswerModel, KnowledgeBase};
use atrium_core::types::{Evidence, Generation, RetrievalRequest, SubRequest};
use atrium_core::Phase;
use atrium_tools::{ToolRegistry, DEVICE_DATA_TOOL, ROOM_DATA_TOOL};

/// Evidence source name for knowledge-base failures.
pub const KNOWLEDGE_SOURCE: &str = "knowledge_base";

/// Gathers evidence for the current query and drafts an answer.
pub struct CollectionStage {
    model: Arc<dyn AnswerModel>,
    tools: Arc<ToolRegistry>,
    knowledge: Arc<dyn KnowledgeBase>,
    failure_text: String,
}

impl CollectionStage {
    pub fn new(
        model: Arc<dyn AnswerModel>,
        tools: Arc<ToolRegistry>,
        knowledge: Arc<dyn KnowledgeBase>,
        failure_text: impl Into<String>,
    ) -> Self {
        Self {
            model,
            tools,
            knowledge,
            failure_text: failure_text.into(),
        }
    }

    /// Run one collection pass. Always leaves the record in `Validating`.
    pub async fn process(&self, record: &mut WorkflowRecord) {
        record.draft_answer = None;
        record.error = None;

        if let Err(e) = self.collect(record).await {
            warn!(session = %record.session_id, error = %e, "Collection pass failed");
            record.draft_answer = Some(format!("{}: {}", self.failure_text, e));
            record.error = Some(e.to_string());
        }

        record.verdict = None;
        record.phase = Phase::Validating;
    }

    async fn collect(&self, record: &mut WorkflowRecord) -> Result<()> {
        let query = record
            .normalized_query
            .clone()
            .ok_or_else(|| AtriumError::Workflow("collection started without a query".into()))?;

        let requests = self.plan(record, &query).await;

        let mut evidence = Vec::with_capacity(requests.len());
        for request in requests {
            evidence.push(self.dispatch(request).await);
        }

        let retrieval = RetrievalRequest {
            query: query.clone(),
            evidence: evidence.clone(),
            guidance: record.guidance.clone(),
        };
        let context = match self.knowledge.retrieve(retrieval).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Knowledge retrieval failed");
                evidence.push(Evidence::error(KNOWLEDGE_SOURCE, e.to_string()));
                None
            }
        };

        let has_material = !evidence.is_empty() || context.is_some();
        record.collected_evidence = Some(evidence);
        record.retrieved_context = context;

        if !has_material {
            info!(session = %record.session_id, "No evidence or context collected, skipping draft");
            return Ok(());
        }

        let prompt = compose_answer_prompt(record, &query);
        let draft = self.model.complete(prompt).await?;
        debug!(session = %record.session_id, chars = draft.len(), "Draft answer generated");
        record.draft_answer = Some(draft);
        Ok(())
    }

    /// Ask the model which lookups to run. Falls back to direct lookups for
    /// the extracted room and device when planning fails or asks for nothing.
    async fn plan(&self, record: &WorkflowRecord, query: &str) -> Vec<SubRequest> {
        let system = compose_planning_prompt(record);
        match self
            .model
            .plan(system, query.to_string(), self.tools.definitions())
            .await
        {
            Ok(Generation::Requests(requests)) if !requests.is_empty() => {
                info!(lookups = requests.len(), "Model planned lookups");
                requests
            }
            Ok(_) => {
                debug!("Model planned no lookups, using extracted entities");
                self.direct_lookups(record)
            }
            Err(e) => {
                warn!(error = %e, "Planning failed, using extracted entities");
                self.direct_lookups(record)
            }
        }
    }

    fn direct_lookups(&self, record: &WorkflowRecord) -> Vec<SubRequest> {
        let mut requests = Vec::new();
        if let Some(room) = &record.extracted_room {
            if self.tools.get(ROOM_DATA_TOOL).is_some() {
                requests.push(SubRequest::new(
                    ROOM_DATA_TOOL,
                    serde_json::json!({ "room": room }),
                ));
            }
        }
        if let Some(device) = &record.extracted_device {
            if self.tools.get(DEVICE_DATA_TOOL).is_some() {
                requests.push(SubRequest::new(
                    DEVICE_DATA_TOOL,
                    serde_json::json!({ "device_id": device }),
                ));
            }
        }
        requests
    }

    async fn dispatch(&self, request: SubRequest) -> Evidence {
        match self.tools.execute(&request.name, request.arguments).await {
            Ok(result) => {
                let evidence = Evidence::from_tool(&request.name, result);
                if let Evidence::Error { error, .. } = &evidence {
                    warn!(tool = %request.name, error = %error, "Lookup returned an error");
                } else {
                    debug!(tool = %request.name, "Lookup succeeded");
                }
                evidence
            }
            Err(e) => {
                warn!(tool = %request.name, error = %e, "Lookup failed");
                Evidence::error(request.name, e.to_string())
            }
        }
    }
}

fn compose_planning_prompt(record: &WorkflowRecord) -> String {
    let mut prompt = format!(
        "You are the data-collection coordinator of a smart building assistant.\n\n\
         Analyze the user's question, decide which sensor or weather data is needed, \
         and request it with the available tools.\n\n\
         Current context:\n\
         - Room: {}\n\
         - Device: {}",
        record.extracted_room.as_deref().unwrap_or("unknown"),
        record.extracted_device.as_deref().unwrap_or("unknown"),
    );
    if let Some(guidance) = &record.guidance {
        prompt.push_str("\n\nA previous answer to this question was rejected. Reviewer feedback:\n");
        prompt.push_str(guidance);
    }
    prompt
}

fn compose_answer_prompt(record: &WorkflowRecord, query: &str) -> String {
    let evidence = match &record.collected_evidence {
        Some(items) if !items.is_empty() => items
            .iter()
            .map(Evidence::render)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "(none)".to_string(),
    };

    format!(
        "Based on the collected data, provide the best possible answer to the user's question.\n\n\
         User question: {}\n\n\
         Available data:\n{}\n\n\
         {}\n\n\
         Advice: {}",
        query,
        evidence,
        record.retrieved_context.as_deref().unwrap_or(""),
        record.guidance.as_deref().unwrap_or(""),
    )
}
