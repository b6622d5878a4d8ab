use std::sync::Arc;

use tracing::{info, warn};

use atrium_core::error::{AtriumError, Result};
use atrium_core::record::{Grade, Verdict, WorkflowRecord};
use atrium_core::traits::AnswerModel;

pub const RETRIES_EXHAUSTED: &str = "Validation failed after maximum retries";
pub const NO_DRAFT: &str = "No draft answer was produced";

/// Grades the draft answer and decides whether the run accepts it, retries,
/// or gives up.
pub struct ValidationStage {
    grader: Arc<dyn AnswerModel>,
    max_retries: u32,
    pass_threshold: u8,
}

impl ValidationStage {
    pub fn new(grader: Arc<dyn AnswerModel>, max_retries: u32, pass_threshold: u8) -> Self {
        Self {
            grader,
            max_retries,
            pass_threshold,
        }
    }

    pub async fn process(&self, record: &mut WorkflowRecord) -> Verdict {
        record.grade = None;
        let Some(draft) = record.draft_answer.clone() else {
            warn!(session = %record.session_id, "Nothing to grade");
            return self.give_up(record, NO_DRAFT.to_string());
        };
        let query = record.normalized_query.clone().unwrap_or_default();

        let grade = match self.grade(&query, &draft).await {
            Ok(grade) => grade,
            Err(e) => {
                warn!(session = %record.session_id, error = %e, "Grading failed");
                return self.give_up(record, e.to_string());
            }
        };

        let passed = grade.passes(self.pass_threshold);
        info!(
            session = %record.session_id,
            relevance = grade.relevance.score,
            completeness = grade.completeness.score,
            accuracy = grade.accuracy.score,
            consistency = grade.consistency.score,
            passed,
            retry_count = record.retry_count,
            "Draft graded"
        );
        record.validation_passed = passed;

        if passed {
            record.grade = Some(grade);
            record.final_answer = Some(draft);
            return Verdict::Accept;
        }

        if record.retry_count < self.max_retries {
            record.retry_count += 1;
            record.guidance = grade.guidance(self.pass_threshold);
            record.grade = Some(grade);
            return Verdict::Retry;
        }

        record.grade = Some(grade);
        self.give_up(record, RETRIES_EXHAUSTED.to_string())
    }

    /// Keep the best draft and record why the run stopped.
    fn give_up(&self, record: &mut WorkflowRecord, reason: String) -> Verdict {
        record.validation_passed = false;
        record.final_answer = record.draft_answer.clone();
        if record.error.is_none() {
            record.error = Some(reason);
        }
        Verdict::GiveUp
    }

    async fn grade(&self, query: &str, draft: &str) -> Result<Grade> {
        let raw = self
            .grader
            .complete(grading_prompt(query, draft))
            .await
            .map_err(|e| AtriumError::Grading(e.to_string()))?;
        parse_grade(&raw)
    }
}

fn grading_prompt(query: &str, draft: &str) -> String {
    format!(
        r#"You are a quality assurance reviewer. Evaluate the response below strictly against these criteria:

1. Relevance: Is the response directly related to the user's question? (score 0-100)
2. Completeness: Does the response give enough information to answer the question? (score 0-100)
3. Accuracy: Is the response factually correct given the provided data? (score 0-100)
4. Consistency: Is the response free of contradictions? (score 0-100)

User's question: {}
Generated response: {}

Respond with ONLY valid JSON:
{{
  "relevance": {{"score": int, "reason": str}},
  "completeness": {{"score": int, "reason": str}},
  "accuracy": {{"score": int, "reason": str}},
  "consistency": {{"score": int, "reason": str}},
  "improved_response": "optional improved response"
}}"#,
        query, draft
    )
}

/// Parse a grade from grader output: the whole text first, then the JSON
/// fragment embedded in it.
pub fn parse_grade(response: &str) -> Result<Grade> {
    if let Ok(grade) = serde_json::from_str::<Grade>(response.trim()) {
        return Ok(grade);
    }

    let fragment = extract_json(response);
    if !fragment.starts_with('{') {
        return Err(AtriumError::Grading(
            "Could not parse grader output as JSON".into(),
        ));
    }

    serde_json::from_str::<Grade>(&strip_trailing_commas(fragment))
        .map_err(|e| AtriumError::Grading(format!("Could not parse grader output as JSON: {}", e)))
}

fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }
    trimmed
}

/// Drop commas directly before a closing brace or bracket, outside strings.
fn strip_trailing_commas(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = json.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::SessionId;
    use atrium_test_utils::{grade_json, ScriptedModel};

    fn record_with_draft(draft: &str) -> WorkflowRecord {
        let mut record = WorkflowRecord::new(SessionId::from_str("v"));
        record.begin("q", "q".into(), None, None);
        record.draft_answer = Some(draft.to_string());
        record
    }

    fn stage(grader: ScriptedModel, max_retries: u32) -> ValidationStage {
        ValidationStage::new(Arc::new(grader), max_retries, 80)
    }

    #[test]
    fn test_parse_grade_plain() {
        let grade = parse_grade(&grade_json([90, 85, 80, 100], None)).unwrap();
        assert_eq!(grade.accuracy.score, 80);
        assert!(grade.improved_response.is_none());
    }

    #[test]
    fn test_parse_grade_embedded_with_trailing_comma() {
        let raw = r#"Here is my evaluation:
```json
{
  "relevance": {"score": 90, "reason": "on topic"},
  "completeness": {"score": 60, "reason": "missing humidity, see {notes}"},
  "accuracy": {"score": 85, "reason": "ok"},
  "consistency": {"score": 95, "reason": "ok"},
  "improved_response": "SALC is 26°C and 55% RH.",
}
```"#;
        let grade = parse_grade(raw).unwrap();
        assert_eq!(grade.completeness.score, 60);
        assert_eq!(grade.completeness.reason, "missing humidity, see {notes}");
        assert_eq!(grade.improved_response.as_deref(), Some("SALC is 26°C and 55% RH."));
    }

    #[test]
    fn test_parse_grade_outer_braces() {
        let raw = format!("Evaluation follows. {} Thanks.", grade_json([80, 80, 80, 80], None));
        assert!(parse_grade(&raw).unwrap().passes(80));
    }

    #[test]
    fn test_parse_grade_failures() {
        assert!(matches!(parse_grade("I cannot grade this."), Err(AtriumError::Grading(_))));
        assert!(parse_grade(r#"{"relevance": {"score": "high"}}"#).is_err());
    }

    #[test]
    fn test_parse_grade_missing_criterion_scores_zero() {
        let raw = r#"{"relevance": {"score": 90}, "completeness": {"score": 90}, "accuracy": {"score": 90}}"#;
        let grade = parse_grade(raw).unwrap();
        assert_eq!(grade.consistency.score, 0);
        assert!(!grade.passes(80));
    }

    #[test]
    fn test_strip_trailing_commas_keeps_strings() {
        assert_eq!(strip_trailing_commas(r#"{"a": "x,}", "b": [1, 2,],}"#), r#"{"a": "x,}", "b": [1, 2]}"#);
    }

    #[tokio::test]
    async fn test_pass_at_threshold_accepts() {
        let grader = ScriptedModel::new().with_completion(&grade_json([80, 80, 80, 80], None));
        let mut record = record_with_draft("draft");
        let verdict = stage(grader, 3).process(&mut record).await;
        assert_eq!(verdict, Verdict::Accept);
        assert!(record.validation_passed);
        assert_eq!(record.final_answer.as_deref(), Some("draft"));
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn test_fail_with_budget_retries() {
        let grader = ScriptedModel::new()
            .with_completion(&grade_json([90, 79, 90, 90], Some("Add the humidity reading.")));
        let mut record = record_with_draft("draft");
        let verdict = stage(grader, 3).process(&mut record).await;
        assert_eq!(verdict, Verdict::Retry);
        assert_eq!(record.retry_count, 1);
        assert!(record.final_answer.is_none());
        let guidance = record.guidance.as_deref().unwrap();
        assert!(guidance.contains("completeness scored 79"));
        assert!(guidance.contains("Add the humidity reading."));
    }

    #[tokio::test]
    async fn test_fractional_score_below_threshold_retries() {
        let raw = r#"{"relevance": {"score": 90}, "completeness": {"score": 79.6}, "accuracy": {"score": 90}, "consistency": {"score": 90}}"#;
        let grader = ScriptedModel::new().with_completion(raw);
        let mut record = record_with_draft("draft");
        let verdict = stage(grader, 3).process(&mut record).await;
        assert_eq!(verdict, Verdict::Retry);
        assert!(!record.validation_passed);
        assert_eq!(record.retry_count, 1);
        assert!(record.guidance.as_deref().unwrap().contains("completeness scored 79"));
    }

    #[tokio::test]
    async fn test_missing_criterion_retries() {
        let raw = r#"{"relevance": {"score": 90}, "completeness": {"score": 90}, "accuracy": {"score": 90}}"#;
        let grader = ScriptedModel::new().with_completion(raw);
        let mut record = record_with_draft("draft");
        let verdict = stage(grader, 3).process(&mut record).await;
        assert_eq!(verdict, Verdict::Retry);
        assert_eq!(record.retry_count, 1);
        assert!(record.error.is_none());
        assert!(record.guidance.as_deref().unwrap().contains("consistency scored 0"));
    }

    #[tokio::test]
    async fn test_fail_exhausted_gives_up() {
        let grader = ScriptedModel::new().with_completion(&grade_json([10, 10, 10, 10], None));
        let mut record = record_with_draft("best effort");
        record.retry_count = 3;
        let verdict = stage(grader, 3).process(&mut record).await;
        assert_eq!(verdict, Verdict::GiveUp);
        assert_eq!(record.retry_count, 3);
        assert_eq!(record.final_answer.as_deref(), Some("best effort"));
        assert_eq!(record.error.as_deref(), Some(RETRIES_EXHAUSTED));
        assert!(record.grade.is_some());
    }

    #[tokio::test]
    async fn test_unparseable_grade_gives_up_without_retry() {
        let grader = ScriptedModel::new().with_completion("Looks good to me!");
        let mut record = record_with_draft("draft");
        let verdict = stage(grader, 3).process(&mut record).await;
        assert_eq!(verdict, Verdict::GiveUp);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.final_answer.as_deref(), Some("draft"));
        assert!(record.error.as_deref().unwrap().contains("Could not parse"));
    }

    #[tokio::test]
    async fn test_missing_draft_gives_up() {
        let grader = ScriptedModel::new();
        let mut record = record_with_draft("x");
        record.draft_answer = None;
        let verdict = stage(grader, 3).process(&mut record).await;
        assert_eq!(verdict, Verdict::GiveUp);
        assert_eq!(record.error.as_deref(), Some(NO_DRAFT));
        assert!(record.final_answer.is_none());
    }

    #[tokio::test]
    async fn test_existing_error_is_kept() {
        let grader = ScriptedModel::new().with_completion_failure("HTTP 500: down");
        let mut record = record_with_draft("An error occurred while collecting data: boom");
        record.error = Some("boom".into());
        let verdict = stage(grader, 3).process(&mut record).await;
        assert_eq!(verdict, Verdict::GiveUp);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }
}
