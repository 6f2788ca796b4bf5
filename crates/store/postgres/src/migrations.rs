use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating required tables and indexes if they do
/// not exist.
///
/// Multi-row invariants are enforced here rather than in application code:
/// a partial unique index keeps at most one firing alert per fingerprint and
/// one open incident per grouping key, and the idempotency key is unique
/// across stage executions.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let alerts = config.table("alerts");
    let alert_history = config.table("alert_history");
    let incidents = config.table("incidents");
    let runs = config.table("pipeline_runs");
    let executions = config.table("stage_executions");
    let blobs = config.table("pipeline_blobs");
    let definitions = config.table("pipeline_definitions");
    let channels = config.table("notification_channels");
    let providers = config.table("intelligence_providers");
    let check_runs = config.table("check_runs");
    let analysis_runs = config.table("analysis_runs");

    let statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {alerts} (
                id UUID PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                source TEXT NOT NULL,
                name TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                labels JSONB NOT NULL DEFAULT '{{}}',
                annotations JSONB NOT NULL DEFAULT '{{}}',
                raw_payload JSONB,
                incident_id UUID,
                starts_at TIMESTAMPTZ,
                ends_at TIMESTAMPTZ,
                received_at TIMESTAMPTZ NOT NULL
            )"
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_{alerts}_firing
             ON {alerts} (fingerprint) WHERE status = 'firing'"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_{alerts}_incident ON {alerts} (incident_id)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {alert_history} (
                id UUID PRIMARY KEY,
                alert_id UUID NOT NULL,
                previous_status TEXT NOT NULL,
                new_status TEXT NOT NULL,
                details TEXT,
                recorded_at TIMESTAMPTZ NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {incidents} (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                grouping_key TEXT NOT NULL,
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                resolved_at TIMESTAMPTZ
            )"
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_{incidents}_open
             ON {incidents} (grouping_key) WHERE status IN ('open', 'acknowledged')"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {runs} (
                run_id TEXT PRIMARY KEY,
                trace_id TEXT NOT NULL,
                source TEXT,
                environment TEXT NOT NULL,
                incident_id UUID,
                status TEXT NOT NULL,
                current_stage TEXT,
                total_attempts INT NOT NULL DEFAULT 0,
                max_retries INT NOT NULL DEFAULT 3,
                last_error_type TEXT,
                last_error_message TEXT,
                last_error_retryable BOOLEAN,
                created_at TIMESTAMPTZ NOT NULL,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                total_duration_ms BIGINT
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {executions} (
                id UUID PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES {runs} (run_id) ON DELETE CASCADE,
                stage TEXT NOT NULL,
                attempt INT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                input_ref TEXT,
                output_ref TEXT,
                output_snapshot JSONB,
                error_type TEXT,
                error_message TEXT,
                error_stack TEXT,
                error_retryable BOOLEAN,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                duration_ms BIGINT,
                inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_{executions}_run ON {executions} (run_id)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {blobs} (
                key TEXT PRIMARY KEY,
                value JSONB NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {definitions} (
                name TEXT PRIMARY KEY,
                version BIGINT NOT NULL,
                config JSONB NOT NULL,
                tags JSONB NOT NULL DEFAULT '[]',
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {channels} (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                driver TEXT NOT NULL,
                config JSONB,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {providers} (
                id UUID PRIMARY KEY,
                provider_type TEXT NOT NULL,
                config JSONB,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {check_runs} (
                id UUID PRIMARY KEY,
                checker_name TEXT NOT NULL,
                hostname TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL,
                metrics JSONB,
                error TEXT,
                trace_id TEXT NOT NULL,
                executed_at TIMESTAMPTZ NOT NULL
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_{check_runs}_trace ON {check_runs} (trace_id)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {analysis_runs} (
                id UUID PRIMARY KEY,
                trace_id TEXT NOT NULL,
                pipeline_run_id TEXT NOT NULL,
                incident_id UUID,
                provider TEXT NOT NULL,
                provider_config JSONB,
                recommendations JSONB NOT NULL DEFAULT '[]',
                total_tokens BIGINT,
                status TEXT NOT NULL,
                error TEXT,
                executed_at TIMESTAMPTZ NOT NULL
            )"
        ),
    ];

    for statement in statements {
        sqlx::query(&statement).execute(pool).await?;
    }

    Ok(())
}
