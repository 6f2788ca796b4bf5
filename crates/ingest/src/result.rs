use serde::{Deserialize, Serialize};
use uuid::Uuid;

use klaxon_core::StageFault;

/// Counters and correlation output of one ingest call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestResult {
    /// Name of the driver that interpreted the payload.
    pub source: String,
    pub alerts_created: u32,
    pub alerts_updated: u32,
    pub alerts_resolved: u32,
    pub incidents_created: u32,
    pub incidents_updated: u32,
    pub incidents_resolved: u32,
    /// The primary incident touched by this ingest, if any. Downstream
    /// stages read this to attach diagnostics and notifications.
    pub incident_id: Option<Uuid>,
    /// Per-alert failures that did not fail the batch.
    pub errors: Vec<StageFault>,
}

impl IngestResult {
    /// Total alerts that applied successfully.
    #[must_use]
    pub fn alerts_applied(&self) -> u32 {
        self.alerts_created + self.alerts_updated + self.alerts_resolved
    }
}
