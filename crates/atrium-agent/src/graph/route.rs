use atrium_core::record::{Phase, Verdict, WorkflowRecord};

/// The next transition of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run a collection pass.
    Collect,
    /// Grade the current draft.
    Validate,
    /// Go back to collection after a failing grade.
    Retry,
    /// Build the output through the interface stage.
    Finalize,
    /// The run is over.
    Halt,
}

/// Decide the next step from the record alone.
pub fn next_step(record: &WorkflowRecord, max_retries: u32) -> Step {
    match record.phase {
        Phase::Done => Step::Halt,
        Phase::Collecting => Step::Collect,
        Phase::Validating => match record.verdict {
            None => Step::Validate,
            Some(Verdict::Retry) if record.retry_count <= max_retries => Step::Retry,
            Some(_) => Step::Finalize,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(phase: Phase, verdict: Option<Verdict>, retry_count: u32) -> WorkflowRecord {
        WorkflowRecord {
            phase,
            verdict,
            retry_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_collecting_always_collects() {
        assert_eq!(next_step(&record(Phase::Collecting, None, 0), 3), Step::Collect);
        assert_eq!(
            next_step(&record(Phase::Collecting, Some(Verdict::Retry), 2), 3),
            Step::Collect
        );
    }

    #[test]
    fn test_validating_without_verdict_validates() {
        assert_eq!(next_step(&record(Phase::Validating, None, 1), 3), Step::Validate);
    }

    #[test]
    fn test_verdicts() {
        assert_eq!(
            next_step(&record(Phase::Validating, Some(Verdict::Accept), 0), 3),
            Step::Finalize
        );
        assert_eq!(
            next_step(&record(Phase::Validating, Some(Verdict::GiveUp), 3), 3),
            Step::Finalize
        );
        assert_eq!(
            next_step(&record(Phase::Validating, Some(Verdict::Retry), 3), 3),
            Step::Retry
        );
    }

    #[test]
    fn test_retry_beyond_budget_finalizes() {
        assert_eq!(
            next_step(&record(Phase::Validating, Some(Verdict::Retry), 4), 3),
            Step::Finalize
        );
        assert_eq!(
            next_step(&record(Phase::Validating, Some(Verdict::Retry), 1), 0),
            Step::Finalize
        );
    }

    #[test]
    fn test_done_halts() {
        assert_eq!(next_step(&record(Phase::Done, Some(Verdict::Accept), 0), 3), Step::Halt);
    }
}
