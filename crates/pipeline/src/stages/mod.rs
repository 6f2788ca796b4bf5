mod analyze;
mod check;
mod ingest;
mod notify;

pub use analyze::AnalyzeStage;
pub use check::CheckStage;
pub use ingest::IngestStage;
pub use notify::NotifyStage;

pub(crate) use ingest::classify_ingest;

use klaxon_core::StageError;
use klaxon_store::StoreError;

/// Classify a storage failure at the stage boundary.
pub(crate) fn classify_store(error: &StoreError) -> StageError {
    if error.is_retryable() {
        StageError::transient(error.to_string())
    } else {
        StageError::catastrophic(error.to_string())
    }
}
