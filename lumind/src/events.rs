//! Ingestion event broadcast.
//!
//! Every event is serialized once to a JSON line of the form
//! `{"event": ..., "data": ..., "timestamp": ...}` and fanned out to all
//! subscribers. Sending with no subscribers is not an error.

use chrono::Utc;
use lumin_common::{ProjectId, RepoRef};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const MIN_BUFFER: usize = 256;

pub const INGESTION_STARTED: &str = "ingestion_started";
pub const INGESTION_COMPLETED: &str = "ingestion_completed";
pub const INGESTION_FAILED: &str = "ingestion_failed";

/// Payload shared by all ingestion events.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionEvent {
    pub ingestion_id: u64,
    pub project_id: ProjectId,
    pub repo: RepoRef,
    pub commit_sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_index: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    /// Buffers smaller than 256 are raised to 256.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(MIN_BUFFER));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let payload = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(line) => {
                let _ = self.sender.send(line);
            }
            Err(err) => warn!("Failed to serialize event {}: {}", event, err),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(MIN_BUFFER)
    }
}
