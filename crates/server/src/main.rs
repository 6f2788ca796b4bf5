use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use klaxon_check::{CheckerRegistry, HeartbeatChecker};
use klaxon_core::NotificationChannel;
use klaxon_ingest::Normalizer;
use klaxon_intel::ProviderRegistry;
use klaxon_notify::DriverRegistry;
use klaxon_pipeline::{
    AnalyzeStage, CheckStage, DefinitionEngine, EngineConfig, IngestStage, NotifyStage,
    PipelineEngine, RetryPolicy, StageExecutor, nodes,
};
use klaxon_server::api::{self, AppState};
use klaxon_server::config::KlaxonConfig;
use klaxon_server::telemetry;
use klaxon_store::{FingerprintLock, Store};
use klaxon_store_memory::{MemoryFingerprintLock, MemoryStore};
use klaxon_store_postgres::{PgFingerprintLock, PostgresConfig, PostgresStore};
use klaxon_webhook::WebhookDriver;

/// Klaxon alert-processing server.
#[derive(Parser, Debug)]
#[command(name = "klaxon-server", about = "HTTP server for the Klaxon alert pipeline")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "klaxon.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = KlaxonConfig::load(&cli.config)?;
    let guard = telemetry::init(&config.telemetry);

    // Storage backend selection.
    let (store, lock): (Arc<dyn Store>, Arc<dyn FingerprintLock>) =
        match config.storage.backend.as_str() {
            "postgres" => {
                let url = config
                    .storage
                    .url
                    .clone()
                    .ok_or("storage.url is required for the postgres backend")?;
                let mut pg_config = PostgresConfig::new(url);
                if let Some(prefix) = &config.storage.table_prefix {
                    pg_config = pg_config.with_table_prefix(prefix);
                }
                let store = PostgresStore::new(pg_config).await?;
                let lock = PgFingerprintLock::new(store.pool().clone());
                (Arc::new(store), Arc::new(lock))
            }
            "memory" => (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryFingerprintLock::new()),
            ),
            other => return Err(format!("unknown storage backend: {other}").into()),
        };
    info!(backend = %config.storage.backend, "storage initialized");

    // Seed notification channels from config.
    for seed in &config.channels {
        store
            .insert_channel(&NotificationChannel::new(
                &seed.name,
                &seed.driver,
                seed.config.clone(),
            ))
            .await?;
        info!(channel = %seed.name, driver = %seed.driver, "channel seeded");
    }

    // Registries, built once at startup and read-only afterwards.
    let sources = Arc::new(klaxon_ingest::default_registry());
    let normalizer = Arc::new(Normalizer::new(
        Arc::clone(&store),
        lock,
        Arc::clone(&sources),
    ));

    let mut checkers = CheckerRegistry::new();
    checkers.register(Arc::new(HeartbeatChecker::new()));
    checkers.set_skip_list(config.pipeline.checker_skip.clone());
    let checkers = Arc::new(checkers);

    let providers = Arc::new(ProviderRegistry::new());

    let mut drivers = DriverRegistry::new();
    drivers.register(Arc::new(WebhookDriver::new()));
    let drivers = Arc::new(drivers);

    // Fixed-topology engine.
    let hostname = config.pipeline.resolved_hostname();
    let mut stage_configs = HashMap::new();
    if let Some(notify_drivers) = &config.pipeline.notify_drivers {
        stage_configs.insert(
            "notify".to_owned(),
            serde_json::json!({"drivers": notify_drivers}),
        );
    }
    let engine_config = EngineConfig {
        environment: config.pipeline.environment.clone(),
        max_retries: config.pipeline.max_retries,
        stage_timeout: Duration::from_secs(config.pipeline.stage_timeout_seconds),
        run_timeout: Duration::from_secs(config.pipeline.run_timeout_seconds),
        retry: RetryPolicy::default(),
        stage_configs,
    };
    let stages: Vec<Arc<dyn StageExecutor>> = vec![
        Arc::new(IngestStage::new(Arc::clone(&normalizer))),
        Arc::new(CheckStage::new(
            Arc::clone(&checkers),
            Arc::clone(&store),
            hostname.clone(),
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
        engine_config,
    ));

    // Definition engine over the standard node registry.
    let node_registry = nodes::standard_registry(
        normalizer,
        checkers,
        providers,
        drivers,
        Arc::clone(&store),
        hostname,
    );
    let definitions = Arc::new(
        DefinitionEngine::new(Arc::clone(&store), Arc::new(node_registry))
            .with_environment(config.pipeline.environment.clone()),
    );

    let state = AppState {
        engine,
        definitions,
        store,
    };
    let app = api::router(state);

    let host = cli.host.unwrap_or(config.server.host);
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");
    info!(%addr, environment = %config.pipeline.environment, "klaxon-server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    guard.shutdown();
    Ok(())
}
