use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use klaxon_core::{Incident, IncidentStatus};

use crate::error::ServerError;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// `GET /incidents/` -- list incidents with status filter and pagination.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<IncidentStatus>)
        .transpose()
        .map_err(ServerError::Validation)?;

    let incidents = state
        .store
        .list_incidents(status, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(serde_json::json!({"incidents": incidents})))
}

/// `GET /incidents/{id}/` -- incident detail with member alerts.
pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let incident = state
        .store
        .get_incident(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("incident {id}")))?;
    let alerts = state.store.alerts_for_incident(id).await?;
    Ok(Json(serde_json::json!({"incident": incident, "alerts": alerts})))
}

async fn transition(
    state: &AppState,
    id: Uuid,
    next: IncidentStatus,
) -> Result<Incident, ServerError> {
    let mut incident = state
        .store
        .get_incident(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("incident {id}")))?;
    incident
        .transition(next)
        .map_err(|e| ServerError::Conflict(e.to_string()))?;
    state.store.update_incident(&incident).await?;
    Ok(incident)
}

/// `POST /incidents/{id}/ack/` -- operator acknowledgement.
pub async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Incident>, ServerError> {
    Ok(Json(transition(&state, id, IncidentStatus::Acknowledged).await?))
}

/// `POST /incidents/{id}/resolve/` -- operator resolution.
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Incident>, ServerError> {
    Ok(Json(transition(&state, id, IncidentStatus::Resolved).await?))
}

/// `POST /incidents/{id}/close/` -- operator close. Closed incidents are
/// never mutated again.
pub async fn close(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Incident>, ServerError> {
    Ok(Json(transition(&state, id, IncidentStatus::Closed).await?))
}
