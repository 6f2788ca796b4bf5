use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use klaxon_core::{
    Alert, AlertHistory, AlertStatus, ErrorClass, Incident, IncidentStatus, NormalizedAlert,
    StageFault,
};
use klaxon_store::{FingerprintLock, Store};

use crate::driver::SourceRegistry;
use crate::error::IngestError;
use crate::result::IngestResult;

/// Outcome of applying one normalized alert under its fingerprint lock.
enum AlertOutcome {
    Created {
        incident_id: Uuid,
        incident_created: bool,
        incident_updated: bool,
    },
    Updated {
        incident_id: Option<Uuid>,
        incident_updated: bool,
    },
    Resolved {
        incident_id: Option<Uuid>,
        incident_resolved: bool,
    },
    /// A resolve arrived with no matching firing alert. Recorded, not fatal.
    NoMatchingFiring,
}

/// The alert normalizer: turns raw webhook payloads into deduplicated
/// alerts and correlated incidents.
///
/// All work on one fingerprint is serialized through the
/// [`FingerprintLock`]; alerts with different fingerprints proceed
/// independently.
pub struct Normalizer {
    store: Arc<dyn Store>,
    lock: Arc<dyn FingerprintLock>,
    registry: Arc<SourceRegistry>,
    lock_ttl: Duration,
    lock_timeout: Duration,
}

impl Normalizer {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        lock: Arc<dyn FingerprintLock>,
        registry: Arc<SourceRegistry>,
    ) -> Self {
        Self {
            store,
            lock,
            registry,
            lock_ttl: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_lock_timing(mut self, ttl: Duration, timeout: Duration) -> Self {
        self.lock_ttl = ttl;
        self.lock_timeout = timeout;
        self
    }

    /// The source registry this normalizer detects payloads with.
    #[must_use]
    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Ingest one raw payload.
    ///
    /// Per-alert failures attach to the result's `errors`; the whole call
    /// fails only when the payload cannot be interpreted at all or every
    /// alert in the batch failed.
    #[instrument(skip(self, payload))]
    pub async fn ingest(
        &self,
        payload: serde_json::Value,
        source_hint: Option<&str>,
    ) -> Result<IngestResult, IngestError> {
        let driver = match source_hint {
            Some(hint) => self
                .registry
                .get(hint)
                .ok_or_else(|| IngestError::UnknownSource(hint.to_owned()))?,
            None => self.registry.detect(&payload).ok_or_else(|| {
                IngestError::MalformedPayload("no registered source accepts this payload".into())
            })?,
        };

        let normalized = driver.normalize(&payload)?;
        debug!(source = driver.name(), alerts = normalized.len(), "payload normalized");

        let mut result = IngestResult {
            source: driver.name().to_owned(),
            ..IngestResult::default()
        };

        let attempted = normalized.len();
        let mut hard_failures = 0usize;
        let mut any_retryable = false;

        for alert in &normalized {
            match self.apply(alert).await {
                Ok(AlertOutcome::Created {
                    incident_id,
                    incident_created,
                    incident_updated,
                }) => {
                    result.alerts_created += 1;
                    if incident_created {
                        result.incidents_created += 1;
                    }
                    if incident_updated {
                        result.incidents_updated += 1;
                    }
                    result.incident_id.get_or_insert(incident_id);
                }
                Ok(AlertOutcome::Updated {
                    incident_id,
                    incident_updated,
                }) => {
                    result.alerts_updated += 1;
                    if incident_updated {
                        result.incidents_updated += 1;
                    }
                    if let Some(id) = incident_id {
                        result.incident_id.get_or_insert(id);
                    }
                }
                Ok(AlertOutcome::Resolved {
                    incident_id,
                    incident_resolved,
                }) => {
                    result.alerts_resolved += 1;
                    if incident_resolved {
                        result.incidents_resolved += 1;
                    }
                    if let Some(id) = incident_id {
                        result.incident_id.get_or_insert(id);
                    }
                }
                Ok(AlertOutcome::NoMatchingFiring) => {
                    result.errors.push(StageFault::validation(format!(
                        "no firing alert matches resolve for \"{}\"",
                        alert.name
                    )));
                }
                Err(e) => {
                    warn!(alert = %alert.name, error = %e, "alert failed to apply");
                    hard_failures += 1;
                    any_retryable |= e.is_retryable();
                    let class = if e.is_retryable() {
                        ErrorClass::Transient
                    } else {
                        ErrorClass::Validation
                    };
                    result.errors.push(StageFault {
                        class,
                        message: format!("alert \"{}\": {e}", alert.name),
                        retryable: e.is_retryable(),
                    });
                }
            }
        }

        if attempted > 0 && hard_failures == attempted {
            let detail = result
                .errors
                .iter()
                .map(|f| f.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(IngestError::BatchFailed {
                count: attempted,
                detail,
                retryable: any_retryable,
            });
        }

        Ok(result)
    }

    /// Apply one alert under its fingerprint lock.
    async fn apply(&self, alert: &NormalizedAlert) -> Result<AlertOutcome, IngestError> {
        let fingerprint = alert.resolved_fingerprint();
        let lock_name = format!("alert:{fingerprint}");
        let guard = self
            .lock
            .acquire(&lock_name, self.lock_ttl, self.lock_timeout)
            .await?;

        let outcome = self.apply_locked(alert, &fingerprint).await;

        if let Err(e) = guard.release().await {
            warn!(lock = %lock_name, error = %e, "failed to release fingerprint lock");
        }
        outcome
    }

    async fn apply_locked(
        &self,
        alert: &NormalizedAlert,
        fingerprint: &str,
    ) -> Result<AlertOutcome, IngestError> {
        match alert.status {
            AlertStatus::Firing => self.apply_firing(alert, fingerprint).await,
            AlertStatus::Resolved => self.apply_resolved(alert, fingerprint).await,
        }
    }

    async fn apply_firing(
        &self,
        alert: &NormalizedAlert,
        fingerprint: &str,
    ) -> Result<AlertOutcome, IngestError> {
        if let Some(mut existing) = self.store.find_firing_by_fingerprint(fingerprint).await? {
            // Repeated firing observation: update in place, never duplicate.
            let severity_changed = existing.severity != alert.severity;
            existing.name.clone_from(&alert.name);
            existing.severity = alert.severity;
            existing.labels.clone_from(&alert.labels);
            existing.annotations.clone_from(&alert.annotations);
            existing.raw_payload.clone_from(&alert.raw_payload);
            existing.received_at = Utc::now();
            self.store.update_alert(&existing).await?;

            if severity_changed {
                self.store
                    .append_alert_history(&AlertHistory::new(
                        existing.id,
                        AlertStatus::Firing,
                        AlertStatus::Firing,
                        Some(format!("severity changed to {}", alert.severity)),
                    ))
                    .await?;
            }

            let incident_updated = match existing.incident_id {
                Some(incident_id) => self.recompute_incident_severity(incident_id).await?,
                None => false,
            };

            return Ok(AlertOutcome::Updated {
                incident_id: existing.incident_id,
                incident_updated,
            });
        }

        // New firing alert: attach to the open incident for its grouping
        // key, or open a new one. Grouping key defaults to the fingerprint.
        let mut new_alert = Alert::from_normalized(alert, fingerprint.to_owned());
        let (incident_id, incident_created, incident_updated) =
            match self.store.find_open_by_grouping_key(fingerprint).await? {
                Some(mut incident) => {
                    let updated = incident.observe_severity(alert.severity);
                    if updated {
                        self.store.update_incident(&incident).await?;
                    }
                    (incident.id, false, updated)
                }
                None => {
                    let description = alert
                        .annotations
                        .get("description")
                        .or_else(|| alert.annotations.get("summary"))
                        .or_else(|| alert.annotations.get("message"))
                        .cloned()
                        .unwrap_or_default();
                    let incident = Incident::new(
                        alert.name.clone(),
                        description,
                        alert.severity,
                        fingerprint,
                    );
                    self.store.insert_incident(&incident).await?;
                    (incident.id, true, false)
                }
            };

        new_alert.incident_id = Some(incident_id);
        self.store.insert_alert(&new_alert).await?;

        Ok(AlertOutcome::Created {
            incident_id,
            incident_created,
            incident_updated,
        })
    }

    async fn apply_resolved(
        &self,
        alert: &NormalizedAlert,
        fingerprint: &str,
    ) -> Result<AlertOutcome, IngestError> {
        let Some(mut firing) = self.store.find_firing_by_fingerprint(fingerprint).await? else {
            return Ok(AlertOutcome::NoMatchingFiring);
        };

        firing.status = AlertStatus::Resolved;
        firing.ends_at = alert.ends_at.or_else(|| Some(Utc::now()));
        firing.received_at = Utc::now();
        self.store.update_alert(&firing).await?;
        self.store
            .append_alert_history(&AlertHistory::new(
                firing.id,
                AlertStatus::Firing,
                AlertStatus::Resolved,
                None,
            ))
            .await?;

        let mut incident_resolved = false;
        if let Some(incident_id) = firing.incident_id
            && let Some(mut incident) = self.store.get_incident(incident_id).await?
            && matches!(
                incident.status,
                IncidentStatus::Open | IncidentStatus::Acknowledged
            )
        {
            let members = self.store.alerts_for_incident(incident_id).await?;
            if members.iter().all(|a| a.status == AlertStatus::Resolved) {
                // transition() cannot fail from open/acknowledged.
                if incident.transition(IncidentStatus::Resolved).is_ok() {
                    self.store.update_incident(&incident).await?;
                    incident_resolved = true;
                }
            }
        }

        Ok(AlertOutcome::Resolved {
            incident_id: firing.incident_id,
            incident_resolved,
        })
    }

    /// Recompute an incident's severity as the max over member alerts.
    /// Returns whether the incident row changed.
    async fn recompute_incident_severity(
        &self,
        incident_id: Uuid,
    ) -> Result<bool, IngestError> {
        let Some(mut incident) = self.store.get_incident(incident_id).await? else {
            return Ok(false);
        };
        if incident.status.is_terminal() {
            return Ok(false);
        }
        let members = self.store.alerts_for_incident(incident_id).await?;
        let Some(max) = members.iter().map(|a| a.severity).max() else {
            return Ok(false);
        };
        if max == incident.severity {
            return Ok(false);
        }
        incident.severity = max;
        incident.updated_at = Utc::now();
        self.store.update_incident(&incident).await?;
        Ok(true)
    }
}
