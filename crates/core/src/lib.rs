pub mod alert;
pub mod analysis;
pub mod channel;
pub mod check;
pub mod definition;
pub mod error;
pub mod fingerprint;
pub mod incident;
pub mod paths;
pub mod run;
pub mod severity;

pub use alert::{Alert, AlertHistory, NormalizedAlert};
pub use analysis::{
    Analysis, AnalysisRun, AnalysisStatus, Recommendation, RecommendationPriority,
};
pub use channel::{NotificationChannel, ProviderConfig};
pub use check::{CheckResult, CheckRun};
pub use definition::{DefinitionConfig, NodeDefaults, NodeKind, NodeSpec, PipelineDefinition};
pub use error::{ErrorClass, InvalidTransition, StageError, StageFault};
pub use fingerprint::{derive_fingerprint, idempotency_key};
pub use incident::Incident;
pub use paths::{extract_path, path_str};
pub use run::{
    DEFAULT_MAX_RETRIES, PipelineRun, RunStatus, StageExecution, StageStatus,
};
pub use severity::{AlertStatus, CheckStatus, IncidentStatus, Severity};
