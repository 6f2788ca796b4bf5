use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use klaxon_core::Severity;

use crate::error::NotifyError;

/// The formatted message dispatched to operator channels.
///
/// Delivery is at-least-once; `dedup_key` lets receiving systems collapse
/// duplicates from retried stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub dedup_key: String,
    pub trace_id: String,
    pub incident_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Driver acknowledgement for one delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Driver-specific response detail.
    pub detail: serde_json::Value,
}

impl DeliveryReceipt {
    #[must_use]
    pub fn new(detail: serde_json::Value) -> Self {
        Self { detail }
    }
}

/// A notification emitter (email, Slack, PagerDuty, webhook, ...).
///
/// Drivers are opaque to the orchestration core: they receive the formatted
/// message plus the channel's driver-specific config and either deliver or
/// fail with a classified [`NotifyError`].
#[async_trait]
pub trait NotifyDriver: Send + Sync {
    /// Unique driver name (matches `NotificationChannel.driver`).
    fn name(&self) -> &str;

    async fn deliver(
        &self,
        message: &NotificationMessage,
        config: &serde_json::Value,
    ) -> Result<DeliveryReceipt, NotifyError>;
}

/// Process-wide notify driver registry, built at startup and immutable once
/// shared.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn NotifyDriver>>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn NotifyDriver>) {
        self.drivers.insert(driver.name().to_owned(), driver);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn NotifyDriver>> {
        self.drivers.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
