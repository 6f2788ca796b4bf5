use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use klaxon_core::DefinitionConfig;
use klaxon_pipeline::{ExecuteRequest, ExecutionReport};

use crate::error::ServerError;

use super::AppState;

/// `GET /definitions/` -- list all definitions.
pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let definitions = state.store.list_definitions().await?;
    Ok(Json(serde_json::json!({"definitions": definitions})))
}

/// `GET /definitions/{name}/` -- definition detail.
pub async fn detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let definition = state
        .store
        .get_definition(&name)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("definition {name}")))?;
    Ok(Json(serde_json::json!(definition)))
}

#[derive(Debug, Deserialize)]
pub struct UpsertBody {
    pub config: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// `PUT /definitions/{name}/` -- create or update a definition. The stored
/// version auto-increments when the config changes; invalid configs are
/// rejected at admission.
pub async fn upsert(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpsertBody>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let config: DefinitionConfig = serde_json::from_value(body.config)
        .map_err(|e| ServerError::Validation(format!("definition config: {e}")))?;

    let errors = state.definitions.validate(&config);
    if !errors.is_empty() {
        return Err(ServerError::Validation(errors.join("; ")));
    }

    let definition = state
        .store
        .upsert_definition(&name, config, body.tags, body.is_active)
        .await?;
    Ok(Json(serde_json::json!(definition)))
}

/// `POST /definitions/{name}/validate/` -- validate a definition config
/// without persisting it. Always 200; the body reports the problems.
pub async fn validate(
    State(state): State<AppState>,
    Path(_name): Path<String>,
    Json(config): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let errors = match serde_json::from_value::<DefinitionConfig>(config) {
        Ok(config) => state.definitions.validate(&config),
        Err(e) => vec![format!("definition config: {e}")],
    };
    Json(serde_json::json!({
        "valid": errors.is_empty(),
        "errors": errors,
    }))
}

/// `POST /definitions/{name}/execute/` -- execute an active definition.
pub async fn execute(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecutionReport>, ServerError> {
    let report = state.definitions.execute(&name, request).await?;
    Ok(Json(report))
}
