use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::severity::IncidentStatus;

/// Classification of a failure, assigned once at the executor boundary.
///
/// The class determines HTTP mapping and retry behavior; individual errors
/// may still override the default retryability (e.g. a timeout whose stage
/// config marks it fatal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad payload shape, unknown driver/provider, missing config field.
    Validation,
    /// A referenced definition, incident, or run does not exist.
    NotFound,
    /// Downstream credential rejection.
    Auth,
    /// I/O error, upstream 5xx, rate limit. Retryable.
    Transient,
    /// A deadline elapsed. Retryable by default.
    Timeout,
    /// Some subtargets failed while the stage as a whole succeeded.
    PartialFailure,
    /// The run was cancelled externally.
    Cancelled,
    /// Storage unavailable or registry corruption; run state may be
    /// inconsistent until recovery.
    Catastrophic,
}

impl ErrorClass {
    /// Returns the snake_case label persisted in `error_type` columns.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Auth => "auth",
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::PartialFailure => "partial_failure",
            Self::Cancelled => "cancelled",
            Self::Catastrophic => "catastrophic",
        }
    }

    /// Default retryability for this class.
    #[must_use]
    pub fn default_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded sub-failure that did not fail its stage (e.g. one notification
/// channel out of three, one checker probe, one alert in a batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFault {
    pub class: ErrorClass,
    pub message: String,
    pub retryable: bool,
}

impl StageFault {
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            retryable: class.default_retryable(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Validation, message)
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    #[must_use]
    pub fn partial(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::PartialFailure, message)
    }
}

/// A classified stage (or node) failure.
///
/// Executors never let sub-errors escape as language-level panics or
/// untagged errors; every failure is classified into one of these before it
/// reaches the orchestrator.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{class}: {message}")]
pub struct StageError {
    pub class: ErrorClass,
    pub message: String,
    pub retryable: bool,
}

impl StageError {
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            retryable: class.default_retryable(),
        }
    }

    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Validation, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::NotFound, message)
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    #[must_use]
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(ErrorClass::Timeout, format!("deadline exceeded after {after:?}"))
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorClass::Cancelled, "execution cancelled")
    }

    #[must_use]
    pub fn catastrophic(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Catastrophic, message)
    }

    /// Label persisted in the `error_type` column.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        self.class.as_str()
    }
}

/// Rejected incident status transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid incident transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: IncidentStatus,
    pub to: IncidentStatus,
}
