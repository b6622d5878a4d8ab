use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use atrium_core::error::{AtriumError, Result};
use atrium_core::record::{WorkflowOutput, WorkflowRecord};
use atrium_core::types::SessionId;

use crate::graph::WorkflowGraph;

type Slot = Arc<tokio::sync::Mutex<WorkflowRecord>>;

/// One workflow record per session key. Runs on the same session are
/// serialized; different sessions run independently.
pub struct SessionManager {
    graph: Arc<WorkflowGraph>,
    sessions: Mutex<HashMap<String, Slot>>,
}

impl SessionManager {
    pub fn new(graph: Arc<WorkflowGraph>) -> Self {
        Self {
            graph,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, key: &str) -> Slot {
        self.slots()
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(session = %key, "Creating session record");
                Arc::new(tokio::sync::Mutex::new(WorkflowRecord::new(SessionId::from_str(key))))
            })
            .clone()
    }

    /// Run `query` on the session's record and return the terminal output.
    pub async fn ask(&self, key: &str, query: &str) -> Result<WorkflowOutput> {
        let slot = self.slot(key);
        let mut record = slot.lock().await;
        self.graph
            .run(&mut record, query)
            .await
            .ok_or_else(|| AtriumError::Workflow("empty query and no previous answer".into()))
    }

    /// Retire a session's record. Returns false if the session was unknown.
    pub fn end(&self, key: &str) -> bool {
        let removed = self.slots().remove(key).is_some();
        if removed {
            info!(session = %key, "Session ended");
        }
        removed
    }

    /// Active session keys, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.slots().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of a session's record, waiting for any run in progress.
    pub async fn snapshot(&self, key: &str) -> Option<WorkflowRecord> {
        let slot = self.slots().get(key).cloned()?;
        let record = slot.lock().await;
        Some(record.clone())
    }
}
