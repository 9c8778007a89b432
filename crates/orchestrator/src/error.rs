use pattern_core::{ErrorDetail, ErrorKind};
use thiserror::Error;

use crate::registry::CapabilityError;

/// A template path that could not be walked to the end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot resolve segment '{segment}' (position {position}) of '{{{{{path}}}}}'")]
pub struct PathError {
    /// The full dotted path as written in the template
    pub path: String,
    /// First segment that did not resolve
    pub segment: String,
    /// Zero-based index of `segment` within the path
    pub position: usize,
}

impl PathError {
    pub fn new(path: impl Into<String>, segment: impl Into<String>, position: usize) -> Self {
        Self {
            path: path.into(),
            segment: segment.into(),
            position,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Schema error in {context}: {reason}")]
    Schema { context: String, reason: String },

    #[error("Dependency error in {context}: {reason}")]
    Dependency { context: String, reason: String },

    #[error("Capability {capability} is not registered and legacy handler '{tried}' is unavailable")]
    UnknownCapability { capability: String, tried: String },

    #[error("Cannot bind parameter '{parameter}' of {capability}: no value, alias or default")]
    Binding {
        capability: String,
        parameter: String,
    },

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Recursion limit of {max_depth} exceeded invoking pattern {pattern_id}")]
    RecursionLimit { pattern_id: String, max_depth: u32 },

    #[error("Step timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Capability {capability} failed: {source}")]
    CapabilityFailed {
        capability: String,
        #[source]
        source: CapabilityError,
    },

    #[error("Nested pattern {pattern_id} failed: {detail}")]
    NestedFailed {
        pattern_id: String,
        detail: ErrorDetail,
    },

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn schema(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn dependency(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dependency {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn binding(capability: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self::Binding {
            capability: capability.into(),
            parameter: parameter.into(),
        }
    }

    pub fn capability_failed(capability: impl Into<String>, source: CapabilityError) -> Self {
        Self::CapabilityFailed {
            capability: capability.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema { .. } | Self::Serialization(_) => ErrorKind::Schema,
            Self::Dependency { .. } => ErrorKind::Dependency,
            Self::UnknownCapability { .. } => ErrorKind::UnknownCapability,
            Self::Binding { .. } => ErrorKind::Binding,
            Self::Path(_) => ErrorKind::Path,
            Self::RecursionLimit { .. } => ErrorKind::RecursionLimit,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::CapabilityFailed { .. } => ErrorKind::CapabilityFailed,
            Self::NestedFailed { detail, .. } => detail.kind,
            Self::MissingInput(_) => ErrorKind::MissingInput,
            Self::PatternNotFound(_) => ErrorKind::PatternNotFound,
            Self::InvalidTransition { .. } | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Errors that end the whole invocation regardless of the step's `required` flag.
    pub fn aborts_invocation(&self) -> bool {
        matches!(self.kind(), ErrorKind::RecursionLimit | ErrorKind::Cancelled)
    }

    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail::new(self.kind(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_error_names_segment() {
        let err = PathError::new("step1.value.amount", "value", 1);
        assert_eq!(
            err.to_string(),
            "cannot resolve segment 'value' (position 1) of '{{step1.value.amount}}'"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            OrchestratorError::binding("pricing.quote", "tickers").kind(),
            ErrorKind::Binding
        );
        assert_eq!(
            OrchestratorError::from(PathError::new("a.b", "a", 0)).kind(),
            ErrorKind::Path
        );
        assert_eq!(OrchestratorError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            OrchestratorError::schema("pattern", "missing id").kind(),
            ErrorKind::Schema
        );
    }

    #[test]
    fn test_nested_failure_keeps_child_kind() {
        let err = OrchestratorError::NestedFailed {
            pattern_id: "loop".to_string(),
            detail: ErrorDetail::new(ErrorKind::RecursionLimit, "too deep"),
        };
        assert_eq!(err.kind(), ErrorKind::RecursionLimit);
        assert!(err.aborts_invocation());
        assert!(!OrchestratorError::Timeout { duration_ms: 5 }.aborts_invocation());
    }

    #[test]
    fn test_to_detail() {
        let detail = OrchestratorError::MissingInput("portfolio_id".to_string()).to_detail();
        assert_eq!(detail.kind, ErrorKind::MissingInput);
        assert_eq!(detail.message, "Missing required input: portfolio_id");
        assert!(detail.step_id.is_none());
    }
}
