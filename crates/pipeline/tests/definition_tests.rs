mod common;

use std::sync::Arc;

use klaxon_core::{DefinitionConfig, RunStatus, StageStatus};
use klaxon_notify::mock::{FailingDriver, FlakyDriver, RecordingDriver};
use klaxon_notify::{DriverRegistry, NotifyDriver};
use klaxon_pipeline::{ExecuteRequest, PipelineError};

use common::{TestHarness, alertmanager_firing};

fn config(value: serde_json::Value) -> DefinitionConfig {
    serde_json::from_value(value).expect("valid definition config")
}

async fn seed_definition(harness: &TestHarness, name: &str, value: serde_json::Value) {
    harness
        .store
        .upsert_definition(name, config(value), vec![], true)
        .await
        .expect("definition upsert");
}

fn request(payload: serde_json::Value) -> ExecuteRequest {
    ExecuteRequest {
        payload,
        source: None,
        trace_id: None,
        environment: None,
        incident_id: None,
    }
}

#[tokio::test]
async fn linear_definition_executes_in_declared_order() {
    let recording = Arc::new(RecordingDriver::new("webhook"));
    let mut drivers = DriverRegistry::new();
    drivers.register(Arc::clone(&recording) as Arc<dyn NotifyDriver>);
    let harness = TestHarness::new(drivers);
    harness.seed_channel("ops", "webhook").await;

    seed_definition(
        &harness,
        "triage",
        serde_json::json!({
            "version": "1.0",
            "nodes": [
                {"id": "in", "type": "ingest", "next": "ctx"},
                {"id": "ctx", "type": "context", "next": "brain"},
                {"id": "brain", "type": "intelligence", "next": "out"},
                {"id": "out", "type": "notify", "config": {"drivers": ["webhook"]}}
            ]
        }),
    )
    .await;

    let engine = harness.definition_engine();
    let report = engine
        .execute("triage", request(alertmanager_firing()))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.executed_nodes, vec!["in", "ctx", "brain", "out"]);
    assert!(report.skipped_nodes.is_empty());
    assert!(report.error.is_none());

    // The ingest node's incident was hoisted onto the run.
    let run = harness.store.get_run(&report.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.incident_id.is_some());

    // Stage rows carry the node type and one succeeded row per node.
    let rows = harness
        .store
        .stage_executions_for_run(&report.run_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);
    let stages: Vec<&str> = rows.iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(stages, vec!["ingest", "context", "intelligence", "notify"]);
    assert!(rows.iter().all(|r| r.status == StageStatus::Succeeded));

    // The notification body was built from the preceding node outputs.
    let delivered = recording.deliveries();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].body.contains("Recommendations:"));
}

#[tokio::test]
async fn non_required_failure_continues_to_completion() {
    // Scenario: [a: context, b: notify required=false with a broken driver].
    let mut drivers = DriverRegistry::new();
    drivers.register(Arc::new(FailingDriver::fatal("broken")));
    let harness = TestHarness::new(drivers);
    harness.seed_channel("broken-ops", "broken").await;

    seed_definition(
        &harness,
        "lenient",
        serde_json::json!({
            "version": "1.0",
            "nodes": [
                {"id": "a", "type": "context"},
                {"id": "b", "type": "notify", "required": false,
                 "config": {"drivers": ["broken"]}}
            ]
        }),
    )
    .await;

    let engine = harness.definition_engine();
    let report = engine
        .execute("lenient", request(serde_json::Value::Null))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.executed_nodes, vec!["a", "b"]);
    assert!(
        report.node_results["b"].has_errors(),
        "failed node reports its errors"
    );
    assert!(report.error.is_none());
}

#[tokio::test]
async fn required_failure_fails_the_run_and_stops() {
    let mut drivers = DriverRegistry::new();
    drivers.register(Arc::new(FailingDriver::fatal("broken")));
    let harness = TestHarness::new(drivers);
    harness.seed_channel("broken-ops", "broken").await;

    seed_definition(
        &harness,
        "strict",
        serde_json::json!({
            "version": "1.0",
            "nodes": [
                {"id": "a", "type": "context"},
                {"id": "b", "type": "transform",
                 "config": {"source_node": "ghost"}},
                {"id": "c", "type": "context"}
            ]
        }),
    )
    .await;

    let engine = harness.definition_engine();
    let report = engine
        .execute("strict", request(serde_json::Value::Null))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.executed_nodes, vec!["a", "b"]);
    assert!(report.error.as_deref().unwrap().contains("required node 'b'"));
    assert!(!report.node_results.contains_key("c"), "c never ran");

    let run = harness.store.get_run(&report.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn skip_policies_watch_prior_errors() {
    let mut drivers = DriverRegistry::new();
    drivers.register(Arc::new(FailingDriver::fatal("broken")));
    let harness = TestHarness::new(drivers);
    harness.seed_channel("broken-ops", "broken").await;

    seed_definition(
        &harness,
        "skippy",
        serde_json::json!({
            "version": "1.0",
            "nodes": [
                {"id": "a", "type": "notify", "required": false,
                 "config": {"drivers": ["broken"]}},
                {"id": "b", "type": "context", "skip_if_errors": ["a"]},
                {"id": "c", "type": "context",
                 "skip_if_condition": "a.has_errors"},
                {"id": "d", "type": "context"}
            ]
        }),
    )
    .await;

    let engine = harness.definition_engine();
    let report = engine
        .execute("skippy", request(serde_json::Value::Null))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.executed_nodes, vec!["a", "d"]);
    assert_eq!(report.skipped_nodes, vec!["b", "c"]);

    let rows = harness
        .store
        .stage_executions_for_run(&report.run_id)
        .await
        .unwrap();
    let skipped: Vec<_> = rows
        .iter()
        .filter(|r| r.status == StageStatus::Skipped)
        .collect();
    assert_eq!(skipped.len(), 2);
    assert!(
        skipped[0].output_snapshot.as_ref().unwrap()["skip_reason"]
            .as_str()
            .unwrap()
            .contains("'a'")
    );
}

#[tokio::test]
async fn per_node_retry_creates_new_rows() {
    let flaky = Arc::new(FlakyDriver::new("webhook", 1));
    let mut drivers = DriverRegistry::new();
    drivers.register(Arc::clone(&flaky) as Arc<dyn NotifyDriver>);
    let harness = TestHarness::new(drivers);
    harness.seed_channel("ops", "webhook").await;

    seed_definition(
        &harness,
        "retrying",
        serde_json::json!({
            "version": "1.0",
            "defaults": {"max_retries": 2},
            "nodes": [
                {"id": "out", "type": "notify", "config": {"drivers": ["webhook"]}}
            ]
        }),
    )
    .await;

    let engine = harness.definition_engine();
    let report = engine
        .execute("retrying", request(serde_json::Value::Null))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(flaky.calls(), 2);

    let rows = harness
        .store
        .stage_executions_for_run(&report.run_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, StageStatus::Failed);
    assert_eq!(rows[1].status, StageStatus::Succeeded);
    assert_eq!(rows[1].attempt, 2);
}

#[tokio::test]
async fn same_type_nodes_do_not_collide() {
    let harness = TestHarness::new(DriverRegistry::new());

    seed_definition(
        &harness,
        "twins",
        serde_json::json!({
            "version": "1.0",
            "nodes": [
                {"id": "ctx1", "type": "context"},
                {"id": "ctx2", "type": "context"}
            ]
        }),
    )
    .await;

    let engine = harness.definition_engine();
    let report = engine
        .execute("twins", request(serde_json::Value::Null))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let rows = harness
        .store
        .stage_executions_for_run(&report.run_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].stage, "context");
    assert_eq!(rows[1].stage, "context");
    assert_ne!(rows[0].idempotency_key, rows[1].idempotency_key);
}

#[tokio::test]
async fn inactive_and_missing_definitions_are_rejected() {
    let harness = TestHarness::new(DriverRegistry::new());
    harness
        .store
        .upsert_definition(
            "dormant",
            config(serde_json::json!({
                "version": "1.0",
                "nodes": [{"id": "a", "type": "context"}]
            })),
            vec![],
            false,
        )
        .await
        .unwrap();

    let engine = harness.definition_engine();

    let err = engine
        .execute("dormant", request(serde_json::Value::Null))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DefinitionInactive(_)));

    let err = engine
        .execute("missing", request(serde_json::Value::Null))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DefinitionNotFound(_)));
}

#[tokio::test]
async fn validate_reports_structural_problems() {
    let harness = TestHarness::new(DriverRegistry::new());
    let engine = harness.definition_engine();

    // The schema example from the docs validates cleanly.
    let valid = config(serde_json::json!({
        "version": "1.0",
        "nodes": [
            {"id": "ctx", "type": "context", "config": {"include": ["cpu"]}, "next": "n"},
            {"id": "n", "type": "notify", "config": {"drivers": ["generic"]}}
        ]
    }));
    assert!(engine.validate(&valid).is_empty());

    let invalid = config(serde_json::json!({
        "version": "",
        "nodes": [
            {"id": "a", "type": "context"},
            {"id": "a", "type": "context", "next": "ghost"}
        ]
    }));
    let errors = engine.validate(&invalid);
    assert!(errors.iter().any(|e| e.contains("version")));
    assert!(errors.iter().any(|e| e.contains("duplicate")));
    assert!(errors.iter().any(|e| e.contains("ghost")));
}
