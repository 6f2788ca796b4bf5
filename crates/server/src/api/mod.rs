pub mod definitions;
pub mod health;
pub mod incidents;
pub mod pipeline;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use klaxon_pipeline::{DefinitionEngine, PipelineEngine};
use klaxon_store::Store;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The fixed-topology engine.
    pub engine: Arc<PipelineEngine>,
    /// The definition-driven engine.
    pub definitions: Arc<DefinitionEngine>,
    pub store: Arc<dyn Store>,
}

/// Build the axum router with all API routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        // Fixed-topology pipeline
        .route("/pipeline/", post(pipeline::submit))
        .route("/pipelines/", get(pipeline::list))
        .route("/pipeline/{run_id}/", get(pipeline::detail))
        .route("/pipeline/{run_id}/resume/", post(pipeline::resume))
        .route("/pipeline/{run_id}/cancel/", post(pipeline::cancel))
        // Definition management & execution
        .route("/definitions/", get(definitions::list))
        .route(
            "/definitions/{name}/",
            get(definitions::detail).put(definitions::upsert),
        )
        .route("/definitions/{name}/validate/", post(definitions::validate))
        .route("/definitions/{name}/execute/", post(definitions::execute))
        // Incident operations
        .route("/incidents/", get(incidents::list))
        .route("/incidents/{id}/", get(incidents::detail))
        .route("/incidents/{id}/ack/", post(incidents::acknowledge))
        .route("/incidents/{id}/resolve/", post(incidents::resolve))
        .route("/incidents/{id}/close/", post(incidents::close))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
