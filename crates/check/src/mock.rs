//! Test doubles for checker-dependent code.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use klaxon_core::{CheckResult, CheckStatus};

use crate::checker::Checker;
use crate::error::CheckError;

/// A checker that always returns the same result.
pub struct StaticChecker {
    name: String,
    result: CheckResult,
    calls: AtomicU32,
}

impl StaticChecker {
    #[must_use]
    pub fn new(name: &str, result: CheckResult) -> Self {
        Self {
            name: name.to_owned(),
            result,
            calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn ok(name: &str) -> Self {
        Self::new(name, CheckResult::ok(format!("{name} ok")))
    }

    #[must_use]
    pub fn warning(name: &str, message: &str) -> Self {
        Self::new(name, CheckResult::warning(message))
    }

    #[must_use]
    pub fn critical(name: &str, message: &str) -> Self {
        Self::new(name, CheckResult::critical(message))
    }

    /// How many times the probe has run.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Checker for StaticChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<CheckResult, CheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

/// A checker whose probe always fails.
pub struct FailingChecker {
    name: String,
}

impl FailingChecker {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

#[async_trait]
impl Checker for FailingChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<CheckResult, CheckError> {
        Err(CheckError::Probe(format!("{} probe failed", self.name)))
    }
}
