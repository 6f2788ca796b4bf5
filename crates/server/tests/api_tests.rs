use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use klaxon_check::CheckerRegistry;
use klaxon_check::mock::StaticChecker;
use klaxon_core::NotificationChannel;
use klaxon_ingest::Normalizer;
use klaxon_intel::ProviderRegistry;
use klaxon_notify::DriverRegistry;
use klaxon_notify::mock::RecordingDriver;
use klaxon_pipeline::{
    AnalyzeStage, CheckStage, DefinitionEngine, EngineConfig, IngestStage, NotifyStage,
    PipelineEngine, RetryPolicy, StageExecutor, nodes,
};
use klaxon_server::api::{self, AppState};
use klaxon_store::Store;
use klaxon_store_memory::{MemoryFingerprintLock, MemoryStore};

// -- Test wiring ----------------------------------------------------------

async fn build_state() -> (AppState, Arc<RecordingDriver>) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let normalizer = Arc::new(Normalizer::new(
        Arc::clone(&store),
        Arc::new(MemoryFingerprintLock::new()),
        Arc::new(klaxon_ingest::default_registry()),
    ));

    let mut checkers = CheckerRegistry::new();
    checkers.register(Arc::new(StaticChecker::ok("cpu")));
    let checkers = Arc::new(checkers);

    let providers = Arc::new(ProviderRegistry::new());

    let recording = Arc::new(RecordingDriver::new("webhook"));
    let mut drivers = DriverRegistry::new();
    drivers.register(Arc::clone(&recording) as Arc<dyn klaxon_notify::NotifyDriver>);
    let drivers = Arc::new(drivers);

    store
        .insert_channel(&NotificationChannel::new(
            "ops",
            "webhook",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let stages: Vec<Arc<dyn StageExecutor>> = vec![
        Arc::new(IngestStage::new(Arc::clone(&normalizer))),
        Arc::new(CheckStage::new(
            Arc::clone(&checkers),
            Arc::clone(&store),
            "test-host",
        )),
        Arc::new(AnalyzeStage::new(
            Arc::clone(&providers),
            Arc::clone(&store),
        )),
        Arc::new(NotifyStage::new(Arc::clone(&drivers), Arc::clone(&store))),
    ];
    let engine = Arc::new(PipelineEngine::new(
        Arc::clone(&store),
        stages,
        EngineConfig {
            environment: "test".to_owned(),
            retry: RetryPolicy::fast(),
            ..EngineConfig::default()
        },
    ));

    let registry = nodes::standard_registry(
        normalizer,
        checkers,
        providers,
        drivers,
        Arc::clone(&store),
        "test-host",
    );
    let definitions = Arc::new(
        DefinitionEngine::new(Arc::clone(&store), Arc::new(registry))
            .with_retry(RetryPolicy::fast())
            .with_environment("test"),
    );

    (
        AppState {
            engine,
            definitions,
            store,
        },
        recording,
    )
}

async fn build_app() -> (axum::Router, AppState, Arc<RecordingDriver>) {
    let (state, recording) = build_state().await;
    (api::router(state.clone()), state, recording)
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

fn alertmanager_firing() -> serde_json::Value {
    serde_json::json!({
        "alerts": [{
            "status": "firing",
            "labels": {"alertname": "HighCPU", "severity": "critical", "instance": "web-01"},
            "annotations": {"description": "CPU>90%"},
            "startsAt": "2026-01-01T00:00:00Z"
        }]
    })
}

fn alertmanager_resolved() -> serde_json::Value {
    serde_json::json!({
        "alerts": [{
            "status": "resolved",
            "labels": {"alertname": "HighCPU", "severity": "critical", "instance": "web-01"}
        }]
    })
}

// -- Tests ----------------------------------------------------------------

#[tokio::test]
async fn health_returns_200() {
    let (app, _state, _recording) = build_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn sync_submission_runs_all_four_stages() {
    let (app, _state, recording) = build_app().await;

    let (status, body) = send(&app, "POST", "/pipeline/", Some(alertmanager_firing())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run"]["status"], "notified");
    assert_eq!(body["stages"].as_array().unwrap().len(), 4);
    for stage in body["stages"].as_array().unwrap() {
        assert_eq!(stage["status"], "succeeded");
    }

    // The run detail endpoint agrees.
    let run_id = body["run"]["run_id"].as_str().unwrap();
    let (status, detail) = send(&app, "GET", &format!("/pipeline/{run_id}/"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["run"]["run_id"], run_id);

    // One incident was opened and one notification delivered.
    let (status, incidents) = send(&app, "GET", "/incidents/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(incidents["incidents"].as_array().unwrap().len(), 1);
    assert_eq!(incidents["incidents"][0]["severity"], "critical");
    assert_eq!(recording.deliveries().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn async_submission_returns_ids_immediately() {
    let (app, _state, _recording) = build_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/pipeline/?mode=async",
        Some(alertmanager_firing()),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["run_id"].as_str().unwrap().to_owned();
    assert!(body["trace_id"].is_string());

    // The run completes in the background.
    let mut last_status = String::new();
    for _ in 0..200 {
        let (_, detail) = send(&app, "GET", &format!("/pipeline/{run_id}/"), None).await;
        last_status = detail["run"]["status"].as_str().unwrap_or("").to_owned();
        if last_status == "notified" || last_status == "failed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(last_status, "notified");
}

#[tokio::test]
async fn duplicate_firing_keeps_one_incident_two_runs() {
    let (app, _state, _recording) = build_app().await;

    send(&app, "POST", "/pipeline/", Some(alertmanager_firing())).await;
    let (_, second) = send(&app, "POST", "/pipeline/", Some(alertmanager_firing())).await;

    // The second run's ingest updated rather than created.
    let ingest = &second["stages"][0];
    assert_eq!(ingest["output_snapshot"]["alerts_updated"], 1);
    assert_eq!(ingest["output_snapshot"]["alerts_created"], 0);

    let (_, incidents) = send(&app, "GET", "/incidents/", None).await;
    assert_eq!(incidents["incidents"].as_array().unwrap().len(), 1);

    let (_, runs) = send(&app, "GET", "/pipelines/", None).await;
    assert_eq!(runs["runs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn resolve_payload_resolves_incident() {
    let (app, _state, _recording) = build_app().await;

    send(&app, "POST", "/pipeline/", Some(alertmanager_firing())).await;
    let (status, _) = send(&app, "POST", "/pipeline/", Some(alertmanager_resolved())).await;
    assert_eq!(status, StatusCode::OK);

    let (_, resolved) = send(&app, "GET", "/incidents/?status=resolved", None).await;
    assert_eq!(resolved["incidents"].as_array().unwrap().len(), 1);
    let (_, open) = send(&app, "GET", "/incidents/?status=open", None).await;
    assert!(open["incidents"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_source_hint_fails_the_run_without_retries() {
    let (app, _state, _recording) = build_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/pipeline/?source=nagios",
        Some(alertmanager_firing()),
    )
    .await;
    // The submission itself is accepted; the run fails in the ingest stage.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run"]["status"], "failed");
    assert_eq!(body["run"]["last_error_type"], "validation");
    assert_eq!(body["stages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn definition_lifecycle_and_versioning() {
    let (app, _state, _recording) = build_app().await;

    let config = serde_json::json!({
        "version": "1.0",
        "nodes": [
            {"id": "ctx", "type": "context", "config": {"include": ["cpu"]}, "next": "n"},
            {"id": "n", "type": "notify", "config": {"drivers": ["webhook"]}}
        ]
    });

    let (status, created) = send(
        &app,
        "PUT",
        "/definitions/triage/",
        Some(serde_json::json!({"config": config})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["version"], 1);
    assert_eq!(created["is_active"], true);

    // Unchanged config keeps the version; a changed config bumps it.
    let (_, same) = send(
        &app,
        "PUT",
        "/definitions/triage/",
        Some(serde_json::json!({"config": config, "tags": ["ops"]})),
    )
    .await;
    assert_eq!(same["version"], 1);

    let mut changed = config.clone();
    changed["description"] = serde_json::json!("updated");
    let (_, bumped) = send(
        &app,
        "PUT",
        "/definitions/triage/",
        Some(serde_json::json!({"config": changed})),
    )
    .await;
    assert_eq!(bumped["version"], 2);

    let (status, listed) = send(&app, "GET", "/definitions/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["definitions"].as_array().unwrap().len(), 1);

    let (status, detail) = send(&app, "GET", "/definitions/triage/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["name"], "triage");

    let (status, _) = send(&app, "GET", "/definitions/ghost/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn definition_validation_endpoint() {
    let (app, _state, _recording) = build_app().await;

    let valid = serde_json::json!({
        "version": "1.0",
        "nodes": [
            {"id": "ctx", "type": "context", "config": {"include": ["cpu"]}, "next": "n"},
            {"id": "n", "type": "notify", "config": {"drivers": ["generic"]}}
        ]
    });
    let (status, body) = send(&app, "POST", "/definitions/x/validate/", Some(valid.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert!(body["errors"].as_array().unwrap().is_empty());

    // An unknown node type is reported, mentioning the offending name.
    let mut invalid = valid;
    invalid["nodes"][0]["type"] = serde_json::json!("nonexistent_type");
    let (status, body) = send(&app, "POST", "/definitions/x/validate/", Some(invalid)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("nonexistent_type"));
}

#[tokio::test]
async fn definition_execution_reports_nodes() {
    let (app, _state, recording) = build_app().await;

    let config = serde_json::json!({
        "version": "1.0",
        "nodes": [
            {"id": "ctx", "type": "context"},
            {"id": "out", "type": "notify", "config": {"drivers": ["webhook"]}}
        ]
    });
    send(
        &app,
        "PUT",
        "/definitions/sweep/",
        Some(serde_json::json!({"config": config})),
    )
    .await;

    let (status, report) = send(
        &app,
        "POST",
        "/definitions/sweep/execute/",
        Some(serde_json::json!({"payload": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "completed");
    assert_eq!(
        report["executed_nodes"],
        serde_json::json!(["ctx", "out"])
    );
    assert_eq!(recording.deliveries().len(), 1);

    let (status, _) = send(
        &app,
        "POST",
        "/definitions/ghost/execute/",
        Some(serde_json::json!({"payload": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn incident_transitions_are_monotonic_over_http() {
    let (app, _state, _recording) = build_app().await;

    send(&app, "POST", "/pipeline/", Some(alertmanager_firing())).await;
    let (_, incidents) = send(&app, "GET", "/incidents/", None).await;
    let id = incidents["incidents"][0]["id"].as_str().unwrap().to_owned();

    let (status, body) = send(&app, "POST", &format!("/incidents/{id}/ack/"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "acknowledged");

    // Repeating the same transition violates monotonicity.
    let (status, body) = send(&app, "POST", &format!("/incidents/{id}/ack/"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_type"], "conflict");

    let (status, _) = send(&app, "POST", &format!("/incidents/{id}/resolve/"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "POST", &format!("/incidents/{id}/close/"), None).await;
    assert_eq!(status, StatusCode::OK);

    // Closed incidents reject everything.
    let (status, _) = send(&app, "POST", &format!("/incidents/{id}/resolve/"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, detail) = send(&app, "GET", &format!("/incidents/{id}/"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["incident"]["status"], "closed");
    assert_eq!(detail["alerts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn resume_and_cancel_edge_cases() {
    let (app, _state, _recording) = build_app().await;

    let (status, _) = send(&app, "POST", "/pipeline/missing/resume/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "POST", "/pipeline/", Some(alertmanager_firing())).await;
    let run_id = body["run"]["run_id"].as_str().unwrap().to_owned();

    // A successfully completed run is not resumable.
    let (status, body) = send(&app, "POST", &format!("/pipeline/{run_id}/resume/"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_type"], "conflict");

    // Cancelling an idle (terminal) run reports false; unknown runs 404.
    let (status, body) = send(&app, "POST", &format!("/pipeline/{run_id}/cancel/"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
    let (status, _) = send(&app, "POST", "/pipeline/missing/cancel/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_status_filter_is_a_client_error() {
    let (app, _state, _recording) = build_app().await;
    let (status, body) = send(&app, "GET", "/pipelines/?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "validation");

    let (status, _) = send(&app, "GET", "/incidents/?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
