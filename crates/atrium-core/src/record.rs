//! The workflow record threaded through every stage of a run.
//!
//! One record exists per session. The graph owns it for the duration of a run
//! and hands it to each stage by `&mut`; only the interface stage resets it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{Evidence, SessionId};

/// Current stage of the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Collecting,
    Validating,
    Done,
}

/// Decision of the validation stage for the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The draft met every criterion.
    Accept,
    /// The draft failed and the retry budget allows another pass.
    Retry,
    /// The run ends with the best available draft (exhausted retries or grading failure).
    GiveUp,
}

/// Score and rationale for one grading criterion.
/// A criterion or score the grader left out counts as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionScore {
    #[serde(default, deserialize_with = "deserialize_score")]
    pub score: u8,
    #[serde(default)]
    pub reason: String,
}

impl CriterionScore {
    pub fn new(score: u8, reason: impl Into<String>) -> Self {
        Self {
            score: score.min(100),
            reason: reason.into(),
        }
    }
}

/// Accepts integers, floats, and numeric strings. Fractions round down so a
/// score never crosses the pass threshold it did not reach; clamps into 0..=100.
fn deserialize_score<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = serde_json::Value::deserialize(deserializer)?;
    let raw = match &value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => Ok(v.floor().clamp(0.0, 100.0) as u8),
        _ => Err(D::Error::custom(format!("invalid score: {}", value))),
    }
}

/// Structured outcome of grading one draft answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    #[serde(default)]
    pub relevance: CriterionScore,
    #[serde(default)]
    pub completeness: CriterionScore,
    #[serde(default)]
    pub accuracy: CriterionScore,
    #[serde(default)]
    pub consistency: CriterionScore,
    #[serde(default)]
    pub improved_response: Option<String>,
}

impl Grade {
    /// The four criteria, in grading order.
    pub fn criteria(&self) -> [(&'static str, &CriterionScore); 4] {
        [
            ("relevance", &self.relevance),
            ("completeness", &self.completeness),
            ("accuracy", &self.accuracy),
            ("consistency", &self.consistency),
        ]
    }

    /// A draft passes only if every criterion reaches the threshold.
    pub fn passes(&self, threshold: u8) -> bool {
        self.criteria().iter().all(|(_, c)| c.score >= threshold)
    }

    pub fn lowest_score(&self) -> u8 {
        self.criteria()
            .iter()
            .map(|(_, c)| c.score)
            .min()
            .unwrap_or(0)
    }

    /// Improvement guidance for the next collection pass.
    ///
    /// Lists every criterion below the threshold with its reason, followed by
    /// the grader's suggested response when one was given.
    pub fn guidance(&self, threshold: u8) -> Option<String> {
        let mut lines: Vec<String> = self
            .criteria()
            .iter()
            .filter(|(_, c)| c.score < threshold)
            .map(|(name, c)| {
                if c.reason.is_empty() {
                    format!("- {} scored {}", name, c.score)
                } else {
                    format!("- {} scored {}: {}", name, c.score, c.reason)
                }
            })
            .collect();

        if let Some(improved) = self.improved_response.as_deref() {
            if !improved.trim().is_empty() {
                lines.push(format!("Suggested response: {}", improved.trim()));
            }
        }

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

/// Terminal payload returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutput {
    pub answer: String,
    pub room: Option<String>,
    pub device_id: Option<String>,
    pub error: Option<String>,
    pub validation_passed: bool,
    pub retries: u32,
    pub timestamp: DateTime<Utc>,
}

/// Shared mutable state of one session's workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub session_id: SessionId,
    pub raw_query: String,
    pub normalized_query: Option<String>,
    pub extracted_room: Option<String>,
    pub extracted_device: Option<String>,
    pub retry_count: u32,
    pub draft_answer: Option<String>,
    pub collected_evidence: Option<Vec<Evidence>>,
    pub retrieved_context: Option<String>,
    pub guidance: Option<String>,
    pub grade: Option<Grade>,
    pub verdict: Option<Verdict>,
    pub validation_passed: bool,
    pub final_answer: Option<String>,
    pub error: Option<String>,
    pub phase: Phase,
    pub output: Option<WorkflowOutput>,
}

impl WorkflowRecord {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            ..Default::default()
        }
    }

    /// Whether any query has been accepted into this record yet.
    pub fn has_started(&self) -> bool {
        self.normalized_query.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Clear everything derived from a previous query.
    pub fn reset_derived(&mut self) {
        self.normalized_query = None;
        self.extracted_room = None;
        self.extracted_device = None;
        self.retry_count = 0;
        self.draft_answer = None;
        self.collected_evidence = None;
        self.retrieved_context = None;
        self.guidance = None;
        self.grade = None;
        self.verdict = None;
        self.validation_passed = false;
        self.final_answer = None;
        self.error = None;
        self.output = None;
    }

    /// Accept a new query: reset derived state and enter collection.
    pub fn begin(
        &mut self,
        raw_query: &str,
        normalized: String,
        room: Option<String>,
        device: Option<String>,
    ) {
        self.reset_derived();
        self.raw_query = raw_query.to_string();
        self.normalized_query = Some(normalized);
        self.extracted_room = room;
        self.extracted_device = device;
        self.phase = Phase::Collecting;
    }

    /// Number of error markers among the collected evidence.
    pub fn evidence_errors(&self) -> usize {
        self.collected_evidence
            .as_ref()
            .map(|ev| ev.iter().filter(|e| e.is_error()).count())
            .unwrap_or(0)
    }
}
