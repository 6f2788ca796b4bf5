use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use klaxon_core::{
    Alert, AlertHistory, AlertStatus, AnalysisRun, CheckRun, DefinitionConfig, Incident,
    IncidentStatus, NotificationChannel, PipelineDefinition, PipelineRun, ProviderConfig,
    RunStatus, StageExecution,
};
use klaxon_store::error::StoreError;
use klaxon_store::repo::{
    AlertStore, ChannelStore, DefinitionStore, DiagnosticsStore, IncidentStore, ProviderStore,
    RunStore,
};

/// In-memory [`Store`](klaxon_store::Store) backed by [`DashMap`]s.
///
/// Enforces the same unique constraints the relational backend declares:
/// at most one firing alert per fingerprint, at most one open incident per
/// grouping key, and a unique idempotency key per stage execution. This is
/// the primary backend for the orchestration test suite.
pub struct MemoryStore {
    alerts: DashMap<Uuid, Alert>,
    /// fingerprint -> id of the single firing alert.
    firing_index: DashMap<String, Uuid>,
    alert_history: DashMap<Uuid, Vec<AlertHistory>>,
    incidents: DashMap<Uuid, Incident>,
    /// grouping key -> id of the single open/acknowledged incident.
    open_index: DashMap<String, Uuid>,
    runs: DashMap<String, PipelineRun>,
    executions: DashMap<String, Vec<StageExecution>>,
    idempotency_keys: DashSet<String>,
    blobs: DashMap<String, serde_json::Value>,
    definitions: DashMap<String, PipelineDefinition>,
    channels: std::sync::RwLock<Vec<NotificationChannel>>,
    providers: std::sync::RwLock<Vec<ProviderConfig>>,
    check_runs: std::sync::RwLock<Vec<CheckRun>>,
    analysis_runs: std::sync::RwLock<Vec<AnalysisRun>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            alerts: DashMap::new(),
            firing_index: DashMap::new(),
            alert_history: DashMap::new(),
            incidents: DashMap::new(),
            open_index: DashMap::new(),
            runs: DashMap::new(),
            executions: DashMap::new(),
            idempotency_keys: DashSet::new(),
            blobs: DashMap::new(),
            definitions: DashMap::new(),
            channels: std::sync::RwLock::new(Vec::new()),
            providers: std::sync::RwLock::new(Vec::new()),
            check_runs: std::sync::RwLock::new(Vec::new()),
            analysis_runs: std::sync::RwLock::new(Vec::new()),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("alerts", &self.alerts.len())
            .field("incidents", &self.incidents.len())
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create a new, empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("store lock poisoned".into())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        if alert.status == AlertStatus::Firing {
            // Unique constraint: single firing alert per fingerprint.
            match self.firing_index.entry(alert.fingerprint.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(StoreError::Conflict(format!(
                        "firing alert already exists for fingerprint {}",
                        alert.fingerprint
                    )));
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(alert.id);
                }
            }
        }
        self.alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn update_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        if !self.alerts.contains_key(&alert.id) {
            return Err(StoreError::NotFound(format!("alert {}", alert.id)));
        }
        self.alerts.insert(alert.id, alert.clone());
        if alert.status == AlertStatus::Resolved {
            self.firing_index
                .remove_if(&alert.fingerprint, |_, id| *id == alert.id);
        }
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        Ok(self.alerts.get(&id).map(|a| a.clone()))
    }

    async fn find_firing_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Alert>, StoreError> {
        let Some(id) = self.firing_index.get(fingerprint).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self
            .alerts
            .get(&id)
            .filter(|a| a.status == AlertStatus::Firing)
            .map(|a| a.clone()))
    }

    async fn alerts_for_incident(&self, incident_id: Uuid) -> Result<Vec<Alert>, StoreError> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|entry| entry.value().incident_id == Some(incident_id))
            .map(|entry| entry.value().clone())
            .collect();
        alerts.sort_by_key(|a| a.received_at);
        Ok(alerts)
    }

    async fn append_alert_history(&self, entry: &AlertHistory) -> Result<(), StoreError> {
        self.alert_history
            .entry(entry.alert_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn history_for_alert(&self, alert_id: Uuid) -> Result<Vec<AlertHistory>, StoreError> {
        Ok(self
            .alert_history
            .get(&alert_id)
            .map(|h| h.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn insert_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        if matches!(
            incident.status,
            IncidentStatus::Open | IncidentStatus::Acknowledged
        ) {
            // Unique constraint: single open incident per grouping key.
            match self.open_index.entry(incident.grouping_key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(StoreError::Conflict(format!(
                        "open incident already exists for grouping key {}",
                        incident.grouping_key
                    )));
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(incident.id);
                }
            }
        }
        self.incidents.insert(incident.id, incident.clone());
        Ok(())
    }

    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        if !self.incidents.contains_key(&incident.id) {
            return Err(StoreError::NotFound(format!("incident {}", incident.id)));
        }
        self.incidents.insert(incident.id, incident.clone());
        if matches!(
            incident.status,
            IncidentStatus::Resolved | IncidentStatus::Closed
        ) {
            self.open_index
                .remove_if(&incident.grouping_key, |_, id| *id == incident.id);
        }
        Ok(())
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, StoreError> {
        Ok(self.incidents.get(&id).map(|i| i.clone()))
    }

    async fn find_open_by_grouping_key(
        &self,
        grouping_key: &str,
    ) -> Result<Option<Incident>, StoreError> {
        let Some(id) = self.open_index.get(grouping_key).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.incidents.get(&id).map(|i| i.clone()))
    }

    async fn list_incidents(
        &self,
        status: Option<IncidentStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Incident>, StoreError> {
        let mut incidents: Vec<Incident> = self
            .incidents
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.value().status == s))
            .map(|entry| entry.value().clone())
            .collect();
        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(incidents.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        match self.runs.entry(run.run_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "run {} already exists",
                run.run_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(run.clone());
                Ok(())
            }
        }
    }

    async fn update_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        if !self.runs.contains_key(&run.run_id) {
            return Err(StoreError::NotFound(format!("run {}", run.run_id)));
        }
        self.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.runs.get(run_id).map(|r| r.clone()))
    }

    async fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PipelineRun>, StoreError> {
        let mut runs: Vec<PipelineRun> = self
            .runs
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.value().status == s))
            .map(|entry| entry.value().clone())
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_stage_execution(&self, execution: &StageExecution) -> Result<(), StoreError> {
        // Unique constraint on the idempotency key: replaying the same
        // (run, stage, attempt) triple yields no new row.
        if !self.idempotency_keys.insert(execution.idempotency_key.clone()) {
            return Err(StoreError::Conflict(format!(
                "stage execution already exists for key {}",
                execution.idempotency_key
            )));
        }
        self.executions
            .entry(execution.run_id.clone())
            .or_default()
            .push(execution.clone());
        Ok(())
    }

    async fn update_stage_execution(&self, execution: &StageExecution) -> Result<(), StoreError> {
        let mut rows = self
            .executions
            .get_mut(&execution.run_id)
            .ok_or_else(|| StoreError::NotFound(format!("run {}", execution.run_id)))?;
        let slot = rows
            .iter_mut()
            .find(|row| row.id == execution.id)
            .ok_or_else(|| StoreError::NotFound(format!("stage execution {}", execution.id)))?;
        *slot = execution.clone();
        Ok(())
    }

    async fn stage_executions_for_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<StageExecution>, StoreError> {
        Ok(self
            .executions
            .get(run_id)
            .map(|rows| rows.clone())
            .unwrap_or_default())
    }

    async fn put_output_blob(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.blobs.insert(key.to_owned(), value.clone());
        Ok(())
    }

    async fn get_output_blob(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.blobs.get(key).map(|v| v.clone()))
    }
}

#[async_trait]
impl DefinitionStore for MemoryStore {
    async fn upsert_definition(
        &self,
        name: &str,
        config: DefinitionConfig,
        tags: Vec<String>,
        is_active: bool,
    ) -> Result<PipelineDefinition, StoreError> {
        match self.definitions.entry(name.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                let old = serde_json::to_value(&existing.config)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let new = serde_json::to_value(&config)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                if old != new {
                    existing.version += 1;
                    existing.config = config;
                }
                existing.tags = tags;
                existing.is_active = is_active;
                existing.updated_at = chrono::Utc::now();
                Ok(existing.clone())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let mut definition = PipelineDefinition::new(name, config);
                definition.tags = tags;
                definition.is_active = is_active;
                vacant.insert(definition.clone());
                Ok(definition)
            }
        }
    }

    async fn get_definition(&self, name: &str) -> Result<Option<PipelineDefinition>, StoreError> {
        Ok(self.definitions.get(name).map(|d| d.clone()))
    }

    async fn list_definitions(&self) -> Result<Vec<PipelineDefinition>, StoreError> {
        let mut definitions: Vec<PipelineDefinition> = self
            .definitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn insert_channel(&self, channel: &NotificationChannel) -> Result<(), StoreError> {
        let mut channels = self.channels.write().map_err(|_| Self::poisoned())?;
        if let Some(existing) = channels.iter_mut().find(|c| c.id == channel.id) {
            *existing = channel.clone();
        } else {
            channels.push(channel.clone());
        }
        Ok(())
    }

    async fn list_active_channels(&self) -> Result<Vec<NotificationChannel>, StoreError> {
        let channels = self.channels.read().map_err(|_| Self::poisoned())?;
        Ok(channels.iter().filter(|c| c.is_active).cloned().collect())
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn upsert_provider(&self, provider: &ProviderConfig) -> Result<(), StoreError> {
        let mut providers = self.providers.write().map_err(|_| Self::poisoned())?;
        if provider.is_active {
            for existing in providers.iter_mut() {
                existing.is_active = false;
            }
        }
        if let Some(existing) = providers.iter_mut().find(|p| p.id == provider.id) {
            *existing = provider.clone();
        } else {
            providers.push(provider.clone());
        }
        Ok(())
    }

    async fn active_provider(&self) -> Result<Option<ProviderConfig>, StoreError> {
        let providers = self.providers.read().map_err(|_| Self::poisoned())?;
        Ok(providers.iter().find(|p| p.is_active).cloned())
    }
}

#[async_trait]
impl DiagnosticsStore for MemoryStore {
    async fn insert_check_run(&self, run: &CheckRun) -> Result<(), StoreError> {
        self.check_runs
            .write()
            .map_err(|_| Self::poisoned())?
            .push(run.clone());
        Ok(())
    }

    async fn check_runs_for_trace(&self, trace_id: &str) -> Result<Vec<CheckRun>, StoreError> {
        let runs = self.check_runs.read().map_err(|_| Self::poisoned())?;
        Ok(runs
            .iter()
            .filter(|r| r.trace_id == trace_id)
            .cloned()
            .collect())
    }

    async fn insert_analysis_run(&self, run: &AnalysisRun) -> Result<(), StoreError> {
        self.analysis_runs
            .write()
            .map_err(|_| Self::poisoned())?
            .push(run.clone());
        Ok(())
    }

    async fn analysis_runs_for_incident(
        &self,
        incident_id: Uuid,
    ) -> Result<Vec<AnalysisRun>, StoreError> {
        let runs = self.analysis_runs.read().map_err(|_| Self::poisoned())?;
        Ok(runs
            .iter()
            .filter(|r| r.incident_id == Some(incident_id))
            .cloned()
            .collect())
    }
}
