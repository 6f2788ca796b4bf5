//! Test doubles for notify-dependent code.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::driver::{DeliveryReceipt, NotificationMessage, NotifyDriver};
use crate::error::NotifyError;

/// A driver that records every delivered message.
pub struct RecordingDriver {
    name: String,
    deliveries: Mutex<Vec<NotificationMessage>>,
}

impl RecordingDriver {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    /// All messages delivered so far.
    #[must_use]
    pub fn deliveries(&self) -> Vec<NotificationMessage> {
        self.deliveries.lock().expect("mutex poisoned").clone()
    }
}

#[async_trait]
impl NotifyDriver for RecordingDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(
        &self,
        message: &NotificationMessage,
        _config: &serde_json::Value,
    ) -> Result<DeliveryReceipt, NotifyError> {
        self.deliveries
            .lock()
            .expect("mutex poisoned")
            .push(message.clone());
        Ok(DeliveryReceipt::new(serde_json::json!({"recorded": true})))
    }
}

/// A driver that always fails.
pub struct FailingDriver {
    name: String,
    retryable: bool,
}

impl FailingDriver {
    /// Fails with a retryable connection error.
    #[must_use]
    pub fn retryable(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            retryable: true,
        }
    }

    /// Fails with a permanent delivery rejection.
    #[must_use]
    pub fn fatal(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            retryable: false,
        }
    }
}

#[async_trait]
impl NotifyDriver for FailingDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(
        &self,
        _message: &NotificationMessage,
        _config: &serde_json::Value,
    ) -> Result<DeliveryReceipt, NotifyError> {
        if self.retryable {
            Err(NotifyError::Connection(format!("{} unreachable", self.name)))
        } else {
            Err(NotifyError::Delivery(format!("{} rejected message", self.name)))
        }
    }
}

/// A driver that fails the first N deliveries with a transient error, then
/// succeeds.
pub struct FlakyDriver {
    name: String,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl FlakyDriver {
    #[must_use]
    pub fn new(name: &str, failures: u32) -> Self {
        Self {
            name: name.to_owned(),
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotifyDriver for FlakyDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(
        &self,
        _message: &NotificationMessage,
        _config: &serde_json::Value,
    ) -> Result<DeliveryReceipt, NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            Err(NotifyError::Connection(format!(
                "{} transient failure",
                self.name
            )))
        } else {
            Ok(DeliveryReceipt::new(serde_json::json!({"recovered": true})))
        }
    }
}
