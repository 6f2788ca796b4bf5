use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use klaxon_core::NotificationChannel;

use crate::driver::{DriverRegistry, NotificationMessage};

/// Outcome of one delivery attempt to one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub channel: String,
    pub driver: String,
    pub success: bool,
    pub error: Option<String>,
    pub retryable: bool,
    pub detail: Option<serde_json::Value>,
}

/// Filter active channels down to the configured driver set.
///
/// With no driver set configured, every active channel matches. An empty
/// result is a no-op for the notify stage, never an implicit broadcast to
/// unintended channels.
#[must_use]
pub fn resolve_channels(
    active: Vec<NotificationChannel>,
    drivers: Option<&[String]>,
) -> Vec<NotificationChannel> {
    match drivers {
        Some(names) => active
            .into_iter()
            .filter(|channel| names.iter().any(|n| n == &channel.driver))
            .collect(),
        None => active,
    }
}

/// Deliver the message to each channel with bounded parallelism.
///
/// Per-channel failures are captured in the returned records; the caller
/// applies the stage-level success rule.
pub async fn dispatch_to_channels(
    registry: &DriverRegistry,
    channels: &[NotificationChannel],
    message: &NotificationMessage,
    parallelism: usize,
    deadline: Duration,
) -> Vec<ChannelDelivery> {
    let mut deliveries: Vec<ChannelDelivery> = stream::iter(channels.iter().cloned())
        .map(|channel| {
            let driver = registry.get(&channel.driver);
            async move {
                match driver {
                    None => {
                        warn!(channel = %channel.name, driver = %channel.driver, "no such driver");
                        ChannelDelivery {
                            channel: channel.name,
                            driver: channel.driver.clone(),
                            success: false,
                            error: Some(format!("driver {} not registered", channel.driver)),
                            retryable: false,
                            detail: None,
                        }
                    }
                    Some(driver) => {
                        let outcome =
                            tokio::time::timeout(deadline, driver.deliver(message, &channel.config))
                                .await;
                        match outcome {
                            Ok(Ok(receipt)) => {
                                debug!(channel = %channel.name, "delivered");
                                ChannelDelivery {
                                    channel: channel.name,
                                    driver: channel.driver,
                                    success: true,
                                    error: None,
                                    retryable: false,
                                    detail: Some(receipt.detail),
                                }
                            }
                            Ok(Err(e)) => {
                                warn!(channel = %channel.name, error = %e, "delivery failed");
                                ChannelDelivery {
                                    channel: channel.name,
                                    driver: channel.driver,
                                    success: false,
                                    retryable: e.is_retryable(),
                                    error: Some(e.to_string()),
                                    detail: None,
                                }
                            }
                            Err(_) => {
                                warn!(channel = %channel.name, "delivery timed out");
                                ChannelDelivery {
                                    channel: channel.name,
                                    driver: channel.driver,
                                    success: false,
                                    retryable: true,
                                    error: Some(format!("timed out after {deadline:?}")),
                                    detail: None,
                                }
                            }
                        }
                    }
                }
            }
        })
        .buffer_unordered(parallelism.max(1))
        .collect()
        .await;

    // buffer_unordered scrambles completion order; keep reports stable.
    deliveries.sort_by(|a, b| a.channel.cmp(&b.channel));
    deliveries
}

#[cfg(test)]
mod tests {
    use crate::mock::{FailingDriver, RecordingDriver};

    use super::*;

    fn message() -> NotificationMessage {
        NotificationMessage {
            title: "t".into(),
            body: "b".into(),
            severity: klaxon_core::Severity::Warning,
            dedup_key: "k".into(),
            trace_id: "trace".into(),
            incident_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    fn channel(name: &str, driver: &str) -> NotificationChannel {
        NotificationChannel::new(name, driver, serde_json::json!({}))
    }

    #[test]
    fn resolve_filters_by_driver_set() {
        let active = vec![channel("a", "slack"), channel("b", "email"), channel("c", "slack")];
        let drivers = vec!["slack".to_owned()];
        let resolved = resolve_channels(active.clone(), Some(&drivers));
        assert_eq!(resolved.len(), 2);

        // No driver set: everything active matches.
        assert_eq!(resolve_channels(active, None).len(), 3);

        // Nothing matches: empty, not a broadcast.
        let none = resolve_channels(
            vec![channel("a", "slack")],
            Some(&["pagerduty".to_owned()]),
        );
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn partial_failure_is_per_channel() {
        let recording = Arc::new(RecordingDriver::new("slack"));
        let mut registry = DriverRegistry::new();
        registry.register(Arc::clone(&recording) as Arc<dyn crate::NotifyDriver>);
        registry.register(Arc::new(FailingDriver::retryable("email")));

        let channels = vec![channel("ops-slack", "slack"), channel("ops-email", "email")];
        let deliveries = dispatch_to_channels(
            &registry,
            &channels,
            &message(),
            4,
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(deliveries.len(), 2);
        let email = deliveries.iter().find(|d| d.driver == "email").unwrap();
        assert!(!email.success);
        assert!(email.retryable);
        let slack = deliveries.iter().find(|d| d.driver == "slack").unwrap();
        assert!(slack.success);
        assert_eq!(recording.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn unknown_driver_is_fatal_for_channel() {
        let registry = DriverRegistry::new();
        let channels = vec![channel("orphan", "missing")];
        let deliveries = dispatch_to_channels(
            &registry,
            &channels,
            &message(),
            4,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(deliveries.len(), 1);
        assert!(!deliveries[0].success);
        assert!(!deliveries[0].retryable);
    }
}
