use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use klaxon_core::{
    Alert, AlertHistory, AlertStatus, AnalysisRun, AnalysisStatus, CheckRun, CheckStatus,
    DefinitionConfig, Incident, IncidentStatus, NotificationChannel, PipelineDefinition,
    PipelineRun, ProviderConfig, RunStatus, Severity, StageExecution, StageStatus,
};
use klaxon_store::error::StoreError;
use klaxon_store::repo::{
    AlertStore, ChannelStore, DefinitionStore, DiagnosticsStore, IncidentStore, ProviderStore,
    RunStore,
};

use crate::config::PostgresConfig;
use crate::migrations;

/// PostgreSQL-backed implementation of the Klaxon storage surface.
///
/// Uses `sqlx::PgPool` for connection pooling. Multi-row invariants (single
/// firing alert per fingerprint, unique idempotency key, single open incident
/// per grouping key) are enforced by unique indexes; violations surface as
/// [`StoreError::Conflict`].
pub struct PostgresStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresStore {
    /// Connect to PostgreSQL, create the pool, and run migrations.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Self::from_pool(pool, config).await
    }

    /// Create a store from an existing pool (shared with the lock backend).
    /// Runs migrations on creation.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// The underlying pool, for sharing with [`PgFingerprintLock`](crate::PgFingerprintLock).
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self, name: &str) -> String {
        self.config.table(name)
    }
}

fn map_db_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(column)
        .map_err(|e| StoreError::Serialization(format!("column {column}: {e}")))
}

fn parse_enum<T>(value: String) -> Result<T, StoreError>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(StoreError::Serialization)
}

fn string_map(value: Option<serde_json::Value>) -> Result<BTreeMap<String, String>, StoreError> {
    match value {
        None => Ok(BTreeMap::new()),
        Some(v) => serde_json::from_value(v).map_err(|e| StoreError::Serialization(e.to_string())),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn row_to_alert(row: &PgRow) -> Result<Alert, StoreError> {
    Ok(Alert {
        id: get(row, "id")?,
        fingerprint: get(row, "fingerprint")?,
        source: get(row, "source")?,
        name: get(row, "name")?,
        severity: parse_enum::<Severity>(get(row, "severity")?)?,
        status: parse_enum::<AlertStatus>(get(row, "status")?)?,
        labels: string_map(get(row, "labels")?)?,
        annotations: string_map(get(row, "annotations")?)?,
        raw_payload: get::<Option<serde_json::Value>>(row, "raw_payload")?
            .unwrap_or(serde_json::Value::Null),
        incident_id: get(row, "incident_id")?,
        starts_at: get(row, "starts_at")?,
        ends_at: get(row, "ends_at")?,
        received_at: get(row, "received_at")?,
    })
}

fn row_to_incident(row: &PgRow) -> Result<Incident, StoreError> {
    Ok(Incident {
        id: get(row, "id")?,
        title: get(row, "title")?,
        description: get(row, "description")?,
        severity: parse_enum::<Severity>(get(row, "severity")?)?,
        status: parse_enum::<IncidentStatus>(get(row, "status")?)?,
        grouping_key: get(row, "grouping_key")?,
        metadata: get::<Option<serde_json::Value>>(row, "metadata")?
            .unwrap_or(serde_json::Value::Null),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        resolved_at: get(row, "resolved_at")?,
    })
}

fn row_to_run(row: &PgRow) -> Result<PipelineRun, StoreError> {
    Ok(PipelineRun {
        run_id: get(row, "run_id")?,
        trace_id: get(row, "trace_id")?,
        source: get(row, "source")?,
        environment: get(row, "environment")?,
        incident_id: get(row, "incident_id")?,
        status: parse_enum::<RunStatus>(get(row, "status")?)?,
        current_stage: get(row, "current_stage")?,
        total_attempts: to_u32(get(row, "total_attempts")?),
        max_retries: to_u32(get(row, "max_retries")?),
        last_error_type: get(row, "last_error_type")?,
        last_error_message: get(row, "last_error_message")?,
        last_error_retryable: get(row, "last_error_retryable")?,
        created_at: get(row, "created_at")?,
        started_at: get(row, "started_at")?,
        completed_at: get(row, "completed_at")?,
        total_duration_ms: get::<Option<i64>>(row, "total_duration_ms")?.map(to_u64),
    })
}

fn row_to_execution(row: &PgRow) -> Result<StageExecution, StoreError> {
    Ok(StageExecution {
        id: get(row, "id")?,
        run_id: get(row, "run_id")?,
        stage: get(row, "stage")?,
        attempt: to_u32(get(row, "attempt")?),
        idempotency_key: get(row, "idempotency_key")?,
        status: parse_enum::<StageStatus>(get(row, "status")?)?,
        input_ref: get(row, "input_ref")?,
        output_ref: get(row, "output_ref")?,
        output_snapshot: get(row, "output_snapshot")?,
        error_type: get(row, "error_type")?,
        error_message: get(row, "error_message")?,
        error_stack: get(row, "error_stack")?,
        error_retryable: get(row, "error_retryable")?,
        started_at: get(row, "started_at")?,
        completed_at: get(row, "completed_at")?,
        duration_ms: get::<Option<i64>>(row, "duration_ms")?.map(to_u64),
    })
}

fn row_to_definition(row: &PgRow) -> Result<PipelineDefinition, StoreError> {
    let config: serde_json::Value = get(row, "config")?;
    let tags: serde_json::Value = get(row, "tags")?;
    Ok(PipelineDefinition {
        name: get(row, "name")?,
        version: get(row, "version")?,
        config: serde_json::from_value(config)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        tags: serde_json::from_value(tags).map_err(|e| StoreError::Serialization(e.to_string()))?,
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn row_to_channel(row: &PgRow) -> Result<NotificationChannel, StoreError> {
    Ok(NotificationChannel {
        id: get(row, "id")?,
        name: get(row, "name")?,
        driver: get(row, "driver")?,
        config: get::<Option<serde_json::Value>>(row, "config")?
            .unwrap_or(serde_json::Value::Null),
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
    })
}

fn row_to_check_run(row: &PgRow) -> Result<CheckRun, StoreError> {
    Ok(CheckRun {
        id: get(row, "id")?,
        checker_name: get(row, "checker_name")?,
        hostname: get(row, "hostname")?,
        status: parse_enum::<CheckStatus>(get(row, "status")?)?,
        message: get(row, "message")?,
        metrics: match get::<Option<serde_json::Value>>(row, "metrics")? {
            None => BTreeMap::new(),
            Some(v) => {
                serde_json::from_value(v).map_err(|e| StoreError::Serialization(e.to_string()))?
            }
        },
        error: get(row, "error")?,
        trace_id: get(row, "trace_id")?,
        executed_at: get(row, "executed_at")?,
    })
}

fn row_to_analysis_run(row: &PgRow) -> Result<AnalysisRun, StoreError> {
    let recommendations: serde_json::Value = get(row, "recommendations")?;
    Ok(AnalysisRun {
        id: get(row, "id")?,
        trace_id: get(row, "trace_id")?,
        pipeline_run_id: get(row, "pipeline_run_id")?,
        incident_id: get(row, "incident_id")?,
        provider: get(row, "provider")?,
        provider_config: get::<Option<serde_json::Value>>(row, "provider_config")?
            .unwrap_or(serde_json::Value::Null),
        recommendations: serde_json::from_value(recommendations)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        total_tokens: get::<Option<i64>>(row, "total_tokens")?.map(to_u64),
        status: parse_enum::<AnalysisStatus>(get(row, "status")?)?,
        error: get(row, "error")?,
        executed_at: get(row, "executed_at")?,
    })
}

#[async_trait]
impl AlertStore for PostgresStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let table = self.table("alerts");
        let query = format!(
            "INSERT INTO {table} (id, fingerprint, source, name, severity, status, labels, \
             annotations, raw_payload, incident_id, starts_at, ends_at, received_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&query)
            .bind(alert.id)
            .bind(&alert.fingerprint)
            .bind(&alert.source)
            .bind(&alert.name)
            .bind(alert.severity.as_str())
            .bind(alert.status.as_str())
            .bind(to_json(&alert.labels)?)
            .bind(to_json(&alert.annotations)?)
            .bind(&alert.raw_payload)
            .bind(alert.incident_id)
            .bind(alert.starts_at)
            .bind(alert.ends_at)
            .bind(alert.received_at)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn update_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let table = self.table("alerts");
        let query = format!(
            "UPDATE {table} SET severity = $2, status = $3, name = $4, labels = $5, \
             annotations = $6, raw_payload = $7, incident_id = $8, starts_at = $9, \
             ends_at = $10, received_at = $11 WHERE id = $1"
        );
        let result = sqlx::query(&query)
            .bind(alert.id)
            .bind(alert.severity.as_str())
            .bind(alert.status.as_str())
            .bind(&alert.name)
            .bind(to_json(&alert.labels)?)
            .bind(to_json(&alert.annotations)?)
            .bind(&alert.raw_payload)
            .bind(alert.incident_id)
            .bind(alert.starts_at)
            .bind(alert.ends_at)
            .bind(alert.received_at)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("alert {}", alert.id)));
        }
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        let table = self.table("alerts");
        let query = format!("SELECT * FROM {table} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(row_to_alert).transpose()
    }

    async fn find_firing_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Alert>, StoreError> {
        let table = self.table("alerts");
        let query =
            format!("SELECT * FROM {table} WHERE fingerprint = $1 AND status = 'firing'");
        let row = sqlx::query(&query)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(row_to_alert).transpose()
    }

    async fn alerts_for_incident(&self, incident_id: Uuid) -> Result<Vec<Alert>, StoreError> {
        let table = self.table("alerts");
        let query =
            format!("SELECT * FROM {table} WHERE incident_id = $1 ORDER BY received_at ASC");
        let rows = sqlx::query(&query)
            .bind(incident_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(row_to_alert).collect()
    }

    async fn append_alert_history(&self, entry: &AlertHistory) -> Result<(), StoreError> {
        let table = self.table("alert_history");
        let query = format!(
            "INSERT INTO {table} (id, alert_id, previous_status, new_status, details, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6)"
        );
        sqlx::query(&query)
            .bind(entry.id)
            .bind(entry.alert_id)
            .bind(entry.previous_status.as_str())
            .bind(entry.new_status.as_str())
            .bind(&entry.details)
            .bind(entry.recorded_at)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn history_for_alert(&self, alert_id: Uuid) -> Result<Vec<AlertHistory>, StoreError> {
        let table = self.table("alert_history");
        let query =
            format!("SELECT * FROM {table} WHERE alert_id = $1 ORDER BY recorded_at ASC");
        let rows = sqlx::query(&query)
            .bind(alert_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter()
            .map(|row| {
                Ok(AlertHistory {
                    id: get(row, "id")?,
                    alert_id: get(row, "alert_id")?,
                    previous_status: parse_enum::<AlertStatus>(get(row, "previous_status")?)?,
                    new_status: parse_enum::<AlertStatus>(get(row, "new_status")?)?,
                    details: get(row, "details")?,
                    recorded_at: get(row, "recorded_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl IncidentStore for PostgresStore {
    async fn insert_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let table = self.table("incidents");
        let query = format!(
            "INSERT INTO {table} (id, title, description, severity, status, grouping_key, \
             metadata, created_at, updated_at, resolved_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&query)
            .bind(incident.id)
            .bind(&incident.title)
            .bind(&incident.description)
            .bind(incident.severity.as_str())
            .bind(incident.status.as_str())
            .bind(&incident.grouping_key)
            .bind(&incident.metadata)
            .bind(incident.created_at)
            .bind(incident.updated_at)
            .bind(incident.resolved_at)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let table = self.table("incidents");
        let query = format!(
            "UPDATE {table} SET title = $2, description = $3, severity = $4, status = $5, \
             metadata = $6, updated_at = $7, resolved_at = $8 WHERE id = $1"
        );
        let result = sqlx::query(&query)
            .bind(incident.id)
            .bind(&incident.title)
            .bind(&incident.description)
            .bind(incident.severity.as_str())
            .bind(incident.status.as_str())
            .bind(&incident.metadata)
            .bind(incident.updated_at)
            .bind(incident.resolved_at)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("incident {}", incident.id)));
        }
        Ok(())
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, StoreError> {
        let table = self.table("incidents");
        let query = format!("SELECT * FROM {table} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(row_to_incident).transpose()
    }

    async fn find_open_by_grouping_key(
        &self,
        grouping_key: &str,
    ) -> Result<Option<Incident>, StoreError> {
        let table = self.table("incidents");
        let query = format!(
            "SELECT * FROM {table} WHERE grouping_key = $1 \
             AND status IN ('open', 'acknowledged')"
        );
        let row = sqlx::query(&query)
            .bind(grouping_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(row_to_incident).transpose()
    }

    async fn list_incidents(
        &self,
        status: Option<IncidentStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Incident>, StoreError> {
        let table = self.table("incidents");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(0);
        let rows = if let Some(status) = status {
            let query = format!(
                "SELECT * FROM {table} WHERE status = $1 \
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
            );
            sqlx::query(&query)
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
        } else {
            let query = format!(
                "SELECT * FROM {table} ORDER BY created_at DESC LIMIT $1 OFFSET $2"
            );
            sqlx::query(&query)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
        }
        .map_err(map_db_err)?;
        rows.iter().map(row_to_incident).collect()
    }
}

#[async_trait]
impl RunStore for PostgresStore {
    async fn insert_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let table = self.table("pipeline_runs");
        let query = format!(
            "INSERT INTO {table} (run_id, trace_id, source, environment, incident_id, status, \
             current_stage, total_attempts, max_retries, last_error_type, last_error_message, \
             last_error_retryable, created_at, started_at, completed_at, total_duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        );
        sqlx::query(&query)
            .bind(&run.run_id)
            .bind(&run.trace_id)
            .bind(&run.source)
            .bind(&run.environment)
            .bind(run.incident_id)
            .bind(run.status.as_str())
            .bind(&run.current_stage)
            .bind(to_i32(run.total_attempts))
            .bind(to_i32(run.max_retries))
            .bind(&run.last_error_type)
            .bind(&run.last_error_message)
            .bind(run.last_error_retryable)
            .bind(run.created_at)
            .bind(run.started_at)
            .bind(run.completed_at)
            .bind(run.total_duration_ms.map(to_i64))
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn update_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let table = self.table("pipeline_runs");
        let query = format!(
            "UPDATE {table} SET incident_id = $2, status = $3, current_stage = $4, \
             total_attempts = $5, last_error_type = $6, last_error_message = $7, \
             last_error_retryable = $8, started_at = $9, completed_at = $10, \
             total_duration_ms = $11 WHERE run_id = $1"
        );
        let result = sqlx::query(&query)
            .bind(&run.run_id)
            .bind(run.incident_id)
            .bind(run.status.as_str())
            .bind(&run.current_stage)
            .bind(to_i32(run.total_attempts))
            .bind(&run.last_error_type)
            .bind(&run.last_error_message)
            .bind(run.last_error_retryable)
            .bind(run.started_at)
            .bind(run.completed_at)
            .bind(run.total_duration_ms.map(to_i64))
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("run {}", run.run_id)));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<PipelineRun>, StoreError> {
        let table = self.table("pipeline_runs");
        let query = format!("SELECT * FROM {table} WHERE run_id = $1");
        let row = sqlx::query(&query)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PipelineRun>, StoreError> {
        let table = self.table("pipeline_runs");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(0);
        let rows = if let Some(status) = status {
            let query = format!(
                "SELECT * FROM {table} WHERE status = $1 \
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
            );
            sqlx::query(&query)
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
        } else {
            let query = format!(
                "SELECT * FROM {table} ORDER BY created_at DESC LIMIT $1 OFFSET $2"
            );
            sqlx::query(&query)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
        }
        .map_err(map_db_err)?;
        rows.iter().map(row_to_run).collect()
    }

    async fn insert_stage_execution(&self, execution: &StageExecution) -> Result<(), StoreError> {
        let table = self.table("stage_executions");
        let query = format!(
            "INSERT INTO {table} (id, run_id, stage, attempt, idempotency_key, status, \
             input_ref, output_ref, output_snapshot, error_type, error_message, error_stack, \
             error_retryable, started_at, completed_at, duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        );
        sqlx::query(&query)
            .bind(execution.id)
            .bind(&execution.run_id)
            .bind(&execution.stage)
            .bind(to_i32(execution.attempt))
            .bind(&execution.idempotency_key)
            .bind(execution.status.as_str())
            .bind(&execution.input_ref)
            .bind(&execution.output_ref)
            .bind(&execution.output_snapshot)
            .bind(&execution.error_type)
            .bind(&execution.error_message)
            .bind(&execution.error_stack)
            .bind(execution.error_retryable)
            .bind(execution.started_at)
            .bind(execution.completed_at)
            .bind(execution.duration_ms.map(to_i64))
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn update_stage_execution(&self, execution: &StageExecution) -> Result<(), StoreError> {
        let table = self.table("stage_executions");
        let query = format!(
            "UPDATE {table} SET status = $2, output_ref = $3, output_snapshot = $4, \
             error_type = $5, error_message = $6, error_stack = $7, error_retryable = $8, \
             started_at = $9, completed_at = $10, duration_ms = $11 WHERE id = $1"
        );
        let result = sqlx::query(&query)
            .bind(execution.id)
            .bind(execution.status.as_str())
            .bind(&execution.output_ref)
            .bind(&execution.output_snapshot)
            .bind(&execution.error_type)
            .bind(&execution.error_message)
            .bind(&execution.error_stack)
            .bind(execution.error_retryable)
            .bind(execution.started_at)
            .bind(execution.completed_at)
            .bind(execution.duration_ms.map(to_i64))
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "stage execution {}",
                execution.id
            )));
        }
        Ok(())
    }

    async fn stage_executions_for_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<StageExecution>, StoreError> {
        let table = self.table("stage_executions");
        let query =
            format!("SELECT * FROM {table} WHERE run_id = $1 ORDER BY inserted_at ASC");
        let rows = sqlx::query(&query)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(row_to_execution).collect()
    }

    async fn put_output_blob(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let table = self.table("pipeline_blobs");
        let query = format!(
            "INSERT INTO {table} (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value"
        );
        sqlx::query(&query)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_output_blob(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let table = self.table("pipeline_blobs");
        let query = format!("SELECT value FROM {table} WHERE key = $1");
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(|r| get(r, "value")).transpose()
    }
}

#[async_trait]
impl DefinitionStore for PostgresStore {
    async fn upsert_definition(
        &self,
        name: &str,
        config: DefinitionConfig,
        tags: Vec<String>,
        is_active: bool,
    ) -> Result<PipelineDefinition, StoreError> {
        let table = self.table("pipeline_definitions");
        let new_config = to_json(&config)?;
        let tags_json = to_json(&tags)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let select = format!(
            "SELECT version, config, created_at FROM {table} WHERE name = $1 FOR UPDATE"
        );
        let existing = sqlx::query(&select)
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_err)?;

        let definition = match existing {
            Some(row) => {
                let old_version: i64 = get(&row, "version")?;
                let old_config: serde_json::Value = get(&row, "config")?;
                let created_at: DateTime<Utc> = get(&row, "created_at")?;
                let version = if old_config == new_config {
                    old_version
                } else {
                    old_version + 1
                };
                let update = format!(
                    "UPDATE {table} SET version = $2, config = $3, tags = $4, \
                     is_active = $5, updated_at = $6 WHERE name = $1"
                );
                sqlx::query(&update)
                    .bind(name)
                    .bind(version)
                    .bind(&new_config)
                    .bind(&tags_json)
                    .bind(is_active)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_db_err)?;
                PipelineDefinition {
                    name: name.to_owned(),
                    version,
                    config,
                    tags,
                    is_active,
                    created_at,
                    updated_at: now,
                }
            }
            None => {
                let insert = format!(
                    "INSERT INTO {table} (name, version, config, tags, is_active, \
                     created_at, updated_at) VALUES ($1, 1, $2, $3, $4, $5, $5)"
                );
                sqlx::query(&insert)
                    .bind(name)
                    .bind(&new_config)
                    .bind(&tags_json)
                    .bind(is_active)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_db_err)?;
                PipelineDefinition {
                    name: name.to_owned(),
                    version: 1,
                    config,
                    tags,
                    is_active,
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        tx.commit().await.map_err(map_db_err)?;
        Ok(definition)
    }

    async fn get_definition(&self, name: &str) -> Result<Option<PipelineDefinition>, StoreError> {
        let table = self.table("pipeline_definitions");
        let query = format!("SELECT * FROM {table} WHERE name = $1");
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(row_to_definition).transpose()
    }

    async fn list_definitions(&self) -> Result<Vec<PipelineDefinition>, StoreError> {
        let table = self.table("pipeline_definitions");
        let query = format!("SELECT * FROM {table} ORDER BY name ASC");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(row_to_definition).collect()
    }
}

#[async_trait]
impl ChannelStore for PostgresStore {
    async fn insert_channel(&self, channel: &NotificationChannel) -> Result<(), StoreError> {
        let table = self.table("notification_channels");
        let query = format!(
            "INSERT INTO {table} (id, name, driver, config, is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, driver = EXCLUDED.driver, \
             config = EXCLUDED.config, is_active = EXCLUDED.is_active"
        );
        sqlx::query(&query)
            .bind(channel.id)
            .bind(&channel.name)
            .bind(&channel.driver)
            .bind(&channel.config)
            .bind(channel.is_active)
            .bind(channel.created_at)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn list_active_channels(&self) -> Result<Vec<NotificationChannel>, StoreError> {
        let table = self.table("notification_channels");
        let query =
            format!("SELECT * FROM {table} WHERE is_active = TRUE ORDER BY created_at ASC");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(row_to_channel).collect()
    }
}

#[async_trait]
impl ProviderStore for PostgresStore {
    async fn upsert_provider(&self, provider: &ProviderConfig) -> Result<(), StoreError> {
        let table = self.table("intelligence_providers");
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        if provider.is_active {
            let deactivate =
                format!("UPDATE {table} SET is_active = FALSE WHERE id <> $1");
            sqlx::query(&deactivate)
                .bind(provider.id)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
        }

        let upsert = format!(
            "INSERT INTO {table} (id, provider_type, config, is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET provider_type = EXCLUDED.provider_type, \
             config = EXCLUDED.config, is_active = EXCLUDED.is_active"
        );
        sqlx::query(&upsert)
            .bind(provider.id)
            .bind(&provider.provider_type)
            .bind(&provider.config)
            .bind(provider.is_active)
            .bind(provider.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    async fn active_provider(&self) -> Result<Option<ProviderConfig>, StoreError> {
        let table = self.table("intelligence_providers");
        let query = format!("SELECT * FROM {table} WHERE is_active = TRUE LIMIT 1");
        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref()
            .map(|r| {
                Ok(ProviderConfig {
                    id: get(r, "id")?,
                    provider_type: get(r, "provider_type")?,
                    config: get::<Option<serde_json::Value>>(r, "config")?
                        .unwrap_or(serde_json::Value::Null),
                    is_active: get(r, "is_active")?,
                    created_at: get(r, "created_at")?,
                })
            })
            .transpose()
    }
}

#[async_trait]
impl DiagnosticsStore for PostgresStore {
    async fn insert_check_run(&self, run: &CheckRun) -> Result<(), StoreError> {
        let table = self.table("check_runs");
        let query = format!(
            "INSERT INTO {table} (id, checker_name, hostname, status, message, metrics, \
             error, trace_id, executed_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&query)
            .bind(run.id)
            .bind(&run.checker_name)
            .bind(&run.hostname)
            .bind(run.status.as_str())
            .bind(&run.message)
            .bind(to_json(&run.metrics)?)
            .bind(&run.error)
            .bind(&run.trace_id)
            .bind(run.executed_at)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn check_runs_for_trace(&self, trace_id: &str) -> Result<Vec<CheckRun>, StoreError> {
        let table = self.table("check_runs");
        let query =
            format!("SELECT * FROM {table} WHERE trace_id = $1 ORDER BY executed_at ASC");
        let rows = sqlx::query(&query)
            .bind(trace_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(row_to_check_run).collect()
    }

    async fn insert_analysis_run(&self, run: &AnalysisRun) -> Result<(), StoreError> {
        let table = self.table("analysis_runs");
        let query = format!(
            "INSERT INTO {table} (id, trace_id, pipeline_run_id, incident_id, provider, \
             provider_config, recommendations, total_tokens, status, error, executed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        sqlx::query(&query)
            .bind(run.id)
            .bind(&run.trace_id)
            .bind(&run.pipeline_run_id)
            .bind(run.incident_id)
            .bind(&run.provider)
            .bind(&run.provider_config)
            .bind(to_json(&run.recommendations)?)
            .bind(run.total_tokens.map(to_i64))
            .bind(run.status.as_str())
            .bind(&run.error)
            .bind(run.executed_at)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn analysis_runs_for_incident(
        &self,
        incident_id: Uuid,
    ) -> Result<Vec<AnalysisRun>, StoreError> {
        let table = self.table("analysis_runs");
        let query =
            format!("SELECT * FROM {table} WHERE incident_id = $1 ORDER BY executed_at ASC");
        let rows = sqlx::query(&query)
            .bind(incident_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(row_to_analysis_run).collect()
    }
}
