use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use super::provenance::Provenance;
use super::status::PatternStatus;
use super::trace::Trace;

/// Error classes surfaced to callers of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Schema,
    Dependency,
    UnknownCapability,
    Binding,
    Path,
    RecursionLimit,
    Timeout,
    Cancelled,
    CapabilityFailed,
    MissingInput,
    PatternNotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Dependency => "dependency",
            Self::UnknownCapability => "unknown_capability",
            Self::Binding => "binding",
            Self::Path => "path",
            Self::RecursionLimit => "recursion_limit",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::CapabilityFailed => "capability_failed",
            Self::MissingInput => "missing_input",
            Self::PatternNotFound => "pattern_not_found",
            Self::Internal => "internal",
        }
    }
}

/// Serializable description of the error that ended (or degraded) a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step_id: None,
        }
    }

    pub fn at_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step_id) => write!(f, "[{}] step {}: {}", self.kind.as_str(), step_id, self.message),
            None => write!(f, "[{}] {}", self.kind.as_str(), self.message),
        }
    }
}

/// What every run returns, including aborted ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternResult {
    pub pattern_id: String,
    pub trace_id: Uuid,
    pub status: PatternStatus,
    /// Declared outputs present in state when the run ended.
    pub outputs: Map<String, Value>,
    pub trace: Trace,
    pub provenance: Provenance,
    /// Dual-root view of the run's own state, kept for diagnostics.
    pub state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl PatternResult {
    pub fn is_success(&self) -> bool {
        self.status == PatternStatus::Completed && self.error.is_none()
    }

    pub fn is_aborted(&self) -> bool {
        self.status == PatternStatus::Aborted
    }

    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
