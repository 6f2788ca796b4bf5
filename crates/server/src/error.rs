use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use klaxon_pipeline::PipelineError;
use klaxon_store::StoreError;

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServerError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::Pipeline(e) => match e {
                PipelineError::RunNotFound(_) | PipelineError::DefinitionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found")
                }
                PipelineError::NotResumable { .. } | PipelineError::DefinitionInactive(_) => {
                    (StatusCode::CONFLICT, "conflict")
                }
                PipelineError::DefinitionInvalid(_) => (StatusCode::BAD_REQUEST, "validation"),
                PipelineError::Store(inner) => store_status(inner),
                PipelineError::Serialization(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "catastrophic")
                }
            },
            Self::Store(e) => store_status(e),
        }
    }
}

fn store_status(error: &StoreError) -> (StatusCode, &'static str) {
    if error.is_retryable() {
        (StatusCode::SERVICE_UNAVAILABLE, "transient")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "catastrophic")
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        let body = serde_json::json!({
            "status": status.as_u16(),
            "error_type": error_type,
            "error_message": self.to_string(),
            "trace_id": serde_json::Value::Null,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ServerError::Validation("bad".into()).status_and_type().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Pipeline(PipelineError::RunNotFound("r".into()))
                .status_and_type()
                .0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Pipeline(PipelineError::DefinitionInactive("d".into()))
                .status_and_type()
                .0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::Store(StoreError::Unavailable("down".into()))
                .status_and_type()
                .0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServerError::Store(StoreError::Backend("corrupt".into()))
                .status_and_type()
                .0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
