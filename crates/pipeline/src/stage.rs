use async_trait::async_trait;

use klaxon_core::{StageError, StageFault};

use crate::context::StageContext;

/// What a stage hands back to the engine on success.
///
/// Partial sub-failures ride along in `errors` without failing the stage;
/// the engine records them on the execution row and logs them. Skipped
/// stages return `skipped = true` and are persisted with the skip reason.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub output: serde_json::Value,
    pub errors: Vec<StageFault>,
    pub skipped: bool,
    pub skip_reason: Option<String>,
}

impl StageResult {
    #[must_use]
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            output,
            errors: Vec::new(),
            skipped: false,
            skip_reason: None,
        }
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Vec<StageFault>) -> Self {
        self.errors = errors;
        self
    }

    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            output: serde_json::Value::Null,
            errors: Vec::new(),
            skipped: true,
            skip_reason: Some(reason.into()),
        }
    }
}

/// The uniform contract every fixed-topology stage implements.
///
/// Failures must come back as classified [`StageError`]s; stages catch and
/// classify their sub-executor errors instead of letting them escape.
/// Duration is measured by the engine.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// The stage name used in `StageExecution.stage` and run status
    /// transitions (`ingest`, `check`, `analyze`, `notify`).
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult, StageError>;
}
