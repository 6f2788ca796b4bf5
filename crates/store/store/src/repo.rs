use async_trait::async_trait;
use uuid::Uuid;

use klaxon_core::{
    Alert, AlertHistory, AnalysisRun, CheckRun, DefinitionConfig, Incident, IncidentStatus,
    NotificationChannel, PipelineDefinition, PipelineRun, ProviderConfig, RunStatus,
    StageExecution,
};

use crate::error::StoreError;

/// Persistence for alerts and their history.
///
/// Implementations must enforce at most one `firing` alert per fingerprint
/// via a unique constraint; [`insert_alert`](AlertStore::insert_alert)
/// returns [`StoreError::Conflict`] on violation.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    async fn update_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError>;

    /// Find the single firing alert for a fingerprint, if any.
    async fn find_firing_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Alert>, StoreError>;

    async fn alerts_for_incident(&self, incident_id: Uuid) -> Result<Vec<Alert>, StoreError>;

    /// Append to the append-only alert audit trail.
    async fn append_alert_history(&self, entry: &AlertHistory) -> Result<(), StoreError>;

    async fn history_for_alert(&self, alert_id: Uuid) -> Result<Vec<AlertHistory>, StoreError>;
}

/// Persistence for incidents.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn insert_incident(&self, incident: &Incident) -> Result<(), StoreError>;

    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError>;

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, StoreError>;

    /// Find the open (or acknowledged) incident matching a grouping key.
    /// Resolved and closed incidents never match: a new firing alert for a
    /// resolved incident's key opens a new incident.
    async fn find_open_by_grouping_key(
        &self,
        grouping_key: &str,
    ) -> Result<Option<Incident>, StoreError>;

    async fn list_incidents(
        &self,
        status: Option<IncidentStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Incident>, StoreError>;
}

/// Persistence for pipeline runs, stage executions, and stage output blobs.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(&self, run: &PipelineRun) -> Result<(), StoreError>;

    async fn update_run(&self, run: &PipelineRun) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<PipelineRun>, StoreError>;

    async fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PipelineRun>, StoreError>;

    /// Insert a stage execution row. The idempotency key carries a unique
    /// constraint: inserting the same `(run, stage, attempt)` twice returns
    /// [`StoreError::Conflict`] and leaves no second row.
    async fn insert_stage_execution(&self, execution: &StageExecution) -> Result<(), StoreError>;

    async fn update_stage_execution(&self, execution: &StageExecution) -> Result<(), StoreError>;

    /// All execution rows for a run, in insertion order.
    async fn stage_executions_for_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<StageExecution>, StoreError>;

    /// Store a large stage output by reference key.
    async fn put_output_blob(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn get_output_blob(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
}

/// Persistence for pipeline definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Create or update a definition. The stored version increments whenever
    /// the config changes; updates that only touch tags or `is_active` keep
    /// the version. Returns the stored definition.
    async fn upsert_definition(
        &self,
        name: &str,
        config: DefinitionConfig,
        tags: Vec<String>,
        is_active: bool,
    ) -> Result<PipelineDefinition, StoreError>;

    async fn get_definition(&self, name: &str) -> Result<Option<PipelineDefinition>, StoreError>;

    async fn list_definitions(&self) -> Result<Vec<PipelineDefinition>, StoreError>;
}

/// Persistence for notification channel configuration.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn insert_channel(&self, channel: &NotificationChannel) -> Result<(), StoreError>;

    async fn list_active_channels(&self) -> Result<Vec<NotificationChannel>, StoreError>;
}

/// Persistence for intelligence provider configuration.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Insert or replace a provider config. Activating a provider
    /// deactivates every other one: at most one is active.
    async fn upsert_provider(&self, provider: &ProviderConfig) -> Result<(), StoreError>;

    async fn active_provider(&self) -> Result<Option<ProviderConfig>, StoreError>;
}

/// Persistence for diagnostic records (check runs, analysis runs).
#[async_trait]
pub trait DiagnosticsStore: Send + Sync {
    async fn insert_check_run(&self, run: &CheckRun) -> Result<(), StoreError>;

    async fn check_runs_for_trace(&self, trace_id: &str) -> Result<Vec<CheckRun>, StoreError>;

    async fn insert_analysis_run(&self, run: &AnalysisRun) -> Result<(), StoreError>;

    async fn analysis_runs_for_incident(
        &self,
        incident_id: Uuid,
    ) -> Result<Vec<AnalysisRun>, StoreError>;
}

/// The full storage surface the orchestrators depend on.
///
/// Blanket-implemented for any type providing every repository trait, so
/// backends implement the focused traits and callers hold `Arc<dyn Store>`.
pub trait Store:
    AlertStore
    + IncidentStore
    + RunStore
    + DefinitionStore
    + ChannelStore
    + ProviderStore
    + DiagnosticsStore
{
}

impl<T> Store for T where
    T: AlertStore
        + IncidentStore
        + RunStore
        + DefinitionStore
        + ChannelStore
        + ProviderStore
        + DiagnosticsStore
{
}
