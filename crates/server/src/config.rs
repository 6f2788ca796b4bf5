use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Top-level configuration for the Klaxon server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct KlaxonConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Orchestration defaults.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// OpenTelemetry distributed tracing configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Notification channels seeded into storage at startup.
    ///
    /// ```toml
    /// [[channels]]
    /// name = "ops-webhook"
    /// driver = "webhook"
    /// config = { url = "http://localhost:9999/hook" }
    /// ```
    #[serde(default)]
    pub channels: Vec<ChannelSeed>,
}

impl KlaxonConfig {
    /// Load from a TOML file. A missing file yields the defaults so a bare
    /// `klaxon-server` starts with the in-memory backend.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Io(String, String),
    #[error("failed to parse config {0}: {1}")]
    Parse(String, String),
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// `"memory"` or `"postgres"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Connection URL for the postgres backend.
    pub url: Option<String>,
    /// Table prefix for the postgres backend.
    pub table_prefix: Option<String>,
}

fn default_backend() -> String {
    "memory".to_owned()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            table_prefix: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Hostname stamped on check runs. Defaults to `$HOSTNAME`.
    pub hostname: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: u64,
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,
    /// Checker names excluded from the default enabled set.
    #[serde(default)]
    pub checker_skip: Vec<String>,
    /// Driver set the notify stage matches channels against. Unset means
    /// every active channel.
    pub notify_drivers: Option<Vec<String>>,
}

fn default_environment() -> String {
    "production".to_owned()
}

fn default_max_retries() -> u32 {
    3
}

fn default_stage_timeout() -> u64 {
    30
}

fn default_run_timeout() -> u64 {
    300
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            hostname: None,
            max_retries: default_max_retries(),
            stage_timeout_seconds: default_stage_timeout(),
            run_timeout_seconds: default_run_timeout(),
            checker_skip: Vec::new(),
            notify_drivers: None,
        }
    }
}

impl PipelineConfig {
    /// The hostname stamped on diagnostics: configured value, `$HOSTNAME`,
    /// or `localhost`.
    #[must_use]
    pub fn resolved_hostname(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_owned())
    }
}

/// OpenTelemetry export configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otlp_endpoint")]
    pub endpoint: String,
    /// `"grpc"` or `"http"`.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,
    #[serde(default = "default_export_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_owned()
}

fn default_protocol() -> String {
    "grpc".to_owned()
}

fn default_service_name() -> String {
    "klaxon-server".to_owned()
}

fn default_sample_ratio() -> f64 {
    1.0
}

fn default_export_timeout() -> u64 {
    10
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otlp_endpoint(),
            protocol: default_protocol(),
            service_name: default_service_name(),
            sample_ratio: default_sample_ratio(),
            timeout_seconds: default_export_timeout(),
            resource_attributes: HashMap::new(),
        }
    }
}

/// One notification channel seeded at startup.
#[derive(Debug, Deserialize)]
pub struct ChannelSeed {
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = KlaxonConfig::load("/nonexistent/klaxon.toml").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.pipeline.max_retries, 3);
        assert!(!config.telemetry.enabled);
        assert!(config.channels.is_empty());
    }

    #[test]
    fn parses_full_config() {
        let config: KlaxonConfig = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9090

            [storage]
            backend = "postgres"
            url = "postgres://localhost/klaxon"

            [pipeline]
            environment = "staging"
            max_retries = 5
            checker_skip = ["network"]
            notify_drivers = ["webhook"]

            [telemetry]
            enabled = true
            protocol = "http"

            [[channels]]
            name = "ops-webhook"
            driver = "webhook"
            config = { url = "http://localhost:9999/hook" }
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.storage.backend, "postgres");
        assert_eq!(config.pipeline.environment, "staging");
        assert_eq!(config.pipeline.checker_skip, vec!["network".to_owned()]);
        assert_eq!(config.telemetry.protocol, "http");
        assert_eq!(config.channels.len(), 1);
        assert_eq!(
            config.channels[0].config["url"],
            "http://localhost:9999/hook"
        );
    }
}
