pub mod context;
pub mod definition_engine;
pub mod engine;
pub mod error;
pub mod node;
pub mod nodes;
pub mod plan;
pub mod retry;
pub mod stage;
pub mod stages;

pub use context::{StageContext, extract_incident_id};
pub use definition_engine::{DefinitionEngine, ExecuteRequest, ExecutionReport};
pub use engine::{EngineConfig, PipelineEngine, SubmitRequest};
pub use error::PipelineError;
pub use node::{NodeContext, NodeHandler, NodeRegistry, NodeResult};
pub use plan::{ExecutionPlan, SkipCondition, compile, validate};
pub use retry::{Jitter, RetryPolicy};
pub use stage::{StageExecutor, StageResult};
pub use stages::{AnalyzeStage, CheckStage, IngestStage, NotifyStage};
