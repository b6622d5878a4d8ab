//! Entry and exit point of every run.
//!
//! `process` decides what an incoming query means for the session's record;
//! `finalize` turns a finished record into the caller-facing output.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use atrium_core::record::{WorkflowOutput, WorkflowRecord};
use atrium_core::Phase;

use crate::entities::{extract_device_id, normalize_query, RoomResolver};

/// What the graph should do with an incoming query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A new query was accepted; run collection.
    Collect,
    /// The query was already answered; return the stored output unchanged.
    Emit,
    /// Nothing to do.
    Passthrough,
}

pub struct InterfaceStage {
    rooms: RoomResolver,
    no_result_text: String,
}

impl InterfaceStage {
    pub fn new(rooms: &BTreeMap<String, String>, no_result_text: impl Into<String>) -> Self {
        Self {
            rooms: RoomResolver::new(rooms),
            no_result_text: no_result_text.into(),
        }
    }

    pub fn process(&self, record: &mut WorkflowRecord, incoming: &str) -> Route {
        let normalized = normalize_query(incoming);

        if normalized.is_empty() {
            if record.is_done() && record.output.is_some() {
                return Route::Emit;
            }
            debug!(session = %record.session_id, "Empty query, nothing to do");
            return Route::Passthrough;
        }

        if record.is_done()
            && record.output.is_some()
            && record.normalized_query.as_deref() == Some(normalized.as_str())
        {
            info!(session = %record.session_id, "Query already answered, re-emitting output");
            return Route::Emit;
        }

        if record.has_started() && !record.is_done() {
            warn!(
                session = %record.session_id,
                phase = ?record.phase,
                "Previous run did not finish, discarding it"
            );
        }

        let room = self.rooms.resolve(&normalized);
        let device = extract_device_id(&normalized);
        info!(
            session = %record.session_id,
            room = room.as_deref().unwrap_or("-"),
            device = device.as_deref().unwrap_or("-"),
            "Accepted new query"
        );
        record.begin(incoming, normalized, room, device);
        Route::Collect
    }

    /// Build the terminal output and mark the record done.
    pub fn finalize(&self, record: &mut WorkflowRecord) {
        if record.final_answer.is_none() {
            record.final_answer = record.draft_answer.clone();
        }
        let answer = record
            .final_answer
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| self.no_result_text.clone());
        record.final_answer = Some(answer.clone());

        record.output = Some(WorkflowOutput {
            answer,
            room: record.extracted_room.clone(),
            device_id: record.extracted_device.clone(),
            error: record.error.clone(),
            validation_passed: record.validation_passed,
            retries: record.retry_count,
            timestamp: Utc::now(),
        });
        record.phase = Phase::Done;
    }
}
