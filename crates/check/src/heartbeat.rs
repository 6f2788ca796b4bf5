use async_trait::async_trait;

use klaxon_core::CheckResult;

use crate::checker::Checker;
use crate::error::CheckError;

/// Trivial always-ok checker so a default deployment has at least one probe
/// registered. Reports the process uptime as a metric.
pub struct HeartbeatChecker {
    started: std::time::Instant,
}

impl Default for HeartbeatChecker {
    fn default() -> Self {
        Self {
            started: std::time::Instant::now(),
        }
    }
}

impl HeartbeatChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checker for HeartbeatChecker {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn run(&self) -> Result<CheckResult, CheckError> {
        let uptime = self.started.elapsed().as_secs();
        Ok(CheckResult::ok("heartbeat ok")
            .with_metric("uptime_seconds", serde_json::json!(uptime)))
    }
}
