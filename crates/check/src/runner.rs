use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use klaxon_core::{CheckResult, CheckRun, CheckStatus, StageFault};
use klaxon_store::{Store, StoreError};

use crate::checker::{Checker, CheckerRegistry};

/// Aggregated outcome of one bounded-parallel checker sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckSummary {
    /// Number of checkers whose probe completed (any status).
    pub checks_run: u32,
    /// Probes that reported `ok`.
    pub checks_passed: u32,
    /// Probes that reported anything other than `ok`.
    pub checks_failed: u32,
    pub ok: u32,
    pub warning: u32,
    pub critical: u32,
    pub unknown: u32,
    /// Per-checker results keyed by checker name.
    pub results: BTreeMap<String, CheckResult>,
    /// Probe-level failures (recorded, never fatal on their own).
    pub errors: Vec<StageFault>,
    /// Number of checkers the resolution selected.
    pub checks_requested: u32,
}

fn probe_checker(
    checker: Arc<dyn Checker>,
    deadline: Duration,
) -> Pin<Box<dyn Future<Output = (String, Result<CheckResult, String>)> + Send>> {
    Box::pin(async move {
        let name = checker.name().to_owned();
        let outcome = match tokio::time::timeout(deadline, checker.run()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("probe timed out after {deadline:?}")),
        };
        (name, outcome)
    })
}

/// Execute the resolved checker set with bounded parallelism, persisting one
/// [`CheckRun`] row per checker.
///
/// An individual probe failure is recorded as a `unknown` result and a fault;
/// it never fails the sweep. Storage failures do: they indicate the platform
/// cannot record diagnostics at all.
pub async fn run_checkers(
    registry: &CheckerRegistry,
    store: &Arc<dyn Store>,
    include: Option<&[String]>,
    parallelism: usize,
    deadline: Duration,
    trace_id: &str,
    hostname: &str,
) -> Result<CheckSummary, StoreError> {
    let checkers = registry.resolve(include);
    let requested = checkers.len();
    debug!(trace_id, requested, "running checkers");

    let probes: Vec<_> = checkers
        .into_iter()
        .map(|checker| probe_checker(checker, deadline))
        .collect();
    let outcomes: Vec<(String, Result<CheckResult, String>)> = stream::iter(probes)
        .buffer_unordered(parallelism.max(1))
        .collect()
        .await;

    let mut summary = CheckSummary {
        checks_requested: u32::try_from(requested).unwrap_or(u32::MAX),
        ..CheckSummary::default()
    };

    for (name, outcome) in outcomes {
        let run = match outcome {
            Ok(result) => {
                match result.status {
                    CheckStatus::Ok => summary.ok += 1,
                    CheckStatus::Warning => summary.warning += 1,
                    CheckStatus::Critical => summary.critical += 1,
                    CheckStatus::Unknown => summary.unknown += 1,
                }
                summary.checks_run += 1;
                summary.results.insert(name.clone(), result.clone());
                CheckRun::from_result(&name, hostname, trace_id, &result)
            }
            Err(error) => {
                warn!(checker = %name, error = %error, "checker failed");
                summary.unknown += 1;
                summary
                    .errors
                    .push(StageFault::partial(format!("checker {name}: {error}")));
                summary.results.insert(
                    name.clone(),
                    CheckResult::new(CheckStatus::Unknown, format!("checker failed: {error}")),
                );
                CheckRun::from_error(&name, hostname, trace_id, error)
            }
        };
        store.insert_check_run(&run).await?;
    }

    summary.checks_passed = summary.ok;
    // Failed = completed probes that did not report ok, plus probes that
    // never produced a result.
    summary.checks_failed = summary.warning + summary.critical + summary.unknown;
    Ok(summary)
}
