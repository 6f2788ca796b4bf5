use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::error;

use klaxon_core::{PipelineRun, RunStatus, StageExecution};
use klaxon_pipeline::SubmitRequest;

use crate::error::ServerError;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    pub source: Option<String>,
    /// `mode=async` returns `{run_id, trace_id}` immediately; the default is
    /// a synchronous run returning the full result.
    pub mode: Option<String>,
}

fn run_detail(run: &PipelineRun, stages: &[StageExecution]) -> serde_json::Value {
    serde_json::json!({
        "run": run,
        "stages": stages,
    })
}

/// `POST /pipeline/` -- submit a raw alert payload to the fixed engine.
pub async fn submit(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Response, ServerError> {
    let mut request = SubmitRequest::new(payload);
    if let Some(source) = query.source {
        request = request.with_source(source);
    }

    if query.mode.as_deref() == Some("async") {
        let run = state.engine.create_run(&request).await?;
        let engine = Arc::clone(&state.engine);
        let pending = run.clone();
        let payload = request.payload;
        tokio::spawn(async move {
            let run_id = pending.run_id.clone();
            if let Err(e) = engine.drive(pending, payload).await {
                error!(run_id, error = %e, "async run failed to drive");
            }
        });
        let body = serde_json::json!({"run_id": run.run_id, "trace_id": run.trace_id});
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let run = state.engine.submit(request).await?;
    let stages = state.store.stage_executions_for_run(&run.run_id).await?;
    Ok(Json(run_detail(&run, &stages)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// `GET /pipelines/` -- list runs with status filter and pagination.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<RunStatus>)
        .transpose()
        .map_err(ServerError::Validation)?;

    let runs = state
        .store
        .list_runs(status, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(serde_json::json!({"runs": runs})))
}

/// `GET /pipeline/{run_id}/` -- run detail including all stage executions.
pub async fn detail(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let run = state
        .store
        .get_run(&run_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("run {run_id}")))?;
    let stages = state.store.stage_executions_for_run(&run_id).await?;
    Ok(Json(run_detail(&run, &stages)))
}

/// `POST /pipeline/{run_id}/resume/` -- re-enter the state machine at the
/// first non-succeeded stage.
pub async fn resume(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let run = state.engine.resume(&run_id).await?;
    let stages = state.store.stage_executions_for_run(&run.run_id).await?;
    Ok(Json(run_detail(&run, &stages)))
}

/// `POST /pipeline/{run_id}/cancel/` -- request external cancellation.
pub async fn cancel(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    // 404 for runs that never existed; a known-but-idle run reports
    // `cancelled: false`.
    state
        .store
        .get_run(&run_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("run {run_id}")))?;
    let cancelled = state.engine.cancel(&run_id);
    Ok(Json(serde_json::json!({"run_id": run_id, "cancelled": cancelled})))
}
