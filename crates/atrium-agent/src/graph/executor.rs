use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{error, info};

use atrium_core::config::WorkflowConfig;
use atrium_core::event::EventBus;
use atrium_core::record::{Phase, Verdict, WorkflowOutput, WorkflowRecord};
use atrium_core::traits::{AnswerModel, KnowledgeBase};
use atrium_core::types::{Stage, WorkflowEvent};
use atrium_tools::ToolRegistry;

use super::route::{next_step, Step};
use crate::collector::CollectionStage;
use crate::interface::{InterfaceStage, Route};
use crate::validator::ValidationStage;

/// External capabilities the stages depend on.
pub struct Collaborators {
    /// Plans lookups and drafts answers.
    pub model: Arc<dyn AnswerModel>,
    /// Grades drafts.
    pub grader: Arc<dyn AnswerModel>,
    pub tools: Arc<ToolRegistry>,
    pub knowledge: Arc<dyn KnowledgeBase>,
}

/// Binds the three stages and walks a record to its terminal state.
pub struct WorkflowGraph {
    interface: InterfaceStage,
    collector: CollectionStage,
    validator: ValidationStage,
    max_retries: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl WorkflowGraph {
    pub fn new(
        config: &WorkflowConfig,
        rooms: &BTreeMap<String, String>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            interface: InterfaceStage::new(rooms, config.no_result_text.clone()),
            collector: CollectionStage::new(
                collaborators.model,
                collaborators.tools,
                collaborators.knowledge,
                config.failure_text.clone(),
            ),
            validator: ValidationStage::new(
                collaborators.grader,
                config.max_retries,
                config.pass_threshold,
            ),
            max_retries: config.max_retries,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Feed `query` into the record and run it to completion.
    ///
    /// Returns the terminal output, or `None` when the query was empty and
    /// there is no earlier output to return.
    pub async fn run(&self, record: &mut WorkflowRecord, query: &str) -> Option<WorkflowOutput> {
        let session_id = record.session_id.clone();

        match self.interface.process(record, query) {
            Route::Passthrough => return None,
            Route::Emit => {
                self.publish(WorkflowEvent::OutputReused { session_id });
                return record.output.clone();
            }
            Route::Collect => {}
        }

        let start = Instant::now();
        self.publish(WorkflowEvent::RunStarted {
            session_id: session_id.clone(),
            query: record.normalized_query.clone().unwrap_or_default(),
        });

        let mut passes: u32 = 0;
        loop {
            match next_step(record, self.max_retries) {
                Step::Collect => {
                    passes += 1;
                    info!(session = %session_id, pass = passes, "Collection pass");
                    self.publish(WorkflowEvent::StageEntered {
                        session_id: session_id.clone(),
                        stage: Stage::Collection,
                        pass: passes,
                    });

                    let outcome = AssertUnwindSafe(self.collector.process(record))
                        .catch_unwind()
                        .await;
                    if let Err(panic) = outcome {
                        recover(record, Stage::Collection, panic);
                        continue;
                    }

                    self.publish(WorkflowEvent::EvidenceCollected {
                        session_id: session_id.clone(),
                        total: record.collected_evidence.as_ref().map_or(0, Vec::len),
                        errors: record.evidence_errors(),
                    });
                }
                Step::Validate => {
                    self.publish(WorkflowEvent::StageEntered {
                        session_id: session_id.clone(),
                        stage: Stage::Validation,
                        pass: passes,
                    });

                    let outcome = AssertUnwindSafe(self.validator.process(record))
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(verdict) => {
                            record.verdict = Some(verdict);
                            if let Some(grade) = &record.grade {
                                self.publish(WorkflowEvent::Graded {
                                    session_id: session_id.clone(),
                                    passed: record.validation_passed,
                                    lowest_score: grade.lowest_score(),
                                });
                            }
                        }
                        Err(panic) => recover(record, Stage::Validation, panic),
                    }
                }
                Step::Retry => {
                    info!(
                        session = %session_id,
                        retry_count = record.retry_count,
                        max_retries = self.max_retries,
                        "Draft rejected, retrying collection"
                    );
                    self.publish(WorkflowEvent::RetryScheduled {
                        session_id: session_id.clone(),
                        retry_count: record.retry_count,
                    });
                    record.verdict = None;
                    record.phase = Phase::Collecting;
                }
                Step::Finalize => self.interface.finalize(record),
                Step::Halt => break,
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            session = %session_id,
            passes,
            validation_passed = record.validation_passed,
            retries = record.retry_count,
            elapsed_ms,
            "Run complete"
        );
        self.publish(WorkflowEvent::RunComplete {
            session_id,
            passes,
            validation_passed: record.validation_passed,
            error: record.error.clone(),
            elapsed_ms,
        });

        record.output.clone()
    }
}

/// End the run with whatever draft exists.
fn force_give_up(record: &mut WorkflowRecord, reason: String) {
    record.validation_passed = false;
    if record.final_answer.is_none() {
        record.final_answer = record.draft_answer.clone();
    }
    if record.error.is_none() {
        record.error = Some(reason);
    }
    record.verdict = Some(Verdict::GiveUp);
    record.phase = Phase::Validating;
}

fn recover(record: &mut WorkflowRecord, stage: Stage, panic: Box<dyn Any + Send>) {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(session = %record.session_id, stage = %stage, panic = %message, "Stage panicked");
    record.error = Some(format!("{} stage failed unexpectedly: {}", stage, message));
    force_give_up(record, message);
}
