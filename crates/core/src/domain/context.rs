use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-invocation context, threaded unmodified into every handler call.
///
/// `asof` and `snapshot_id` are opaque to the engine: they pin the reference
/// data a run sees so that repeated runs against the same snapshot reproduce
/// the same results. Only `depth` changes, and only for nested runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionContext {
    pub trace_id: Uuid,
    pub caller: Option<String>,
    pub asof: Option<DateTime<Utc>>,
    pub snapshot_id: Option<String>,
    pub depth: u32,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            caller: None,
            asof: None,
            snapshot_id: None,
            depth: 0,
        }
    }

    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn with_asof(mut self, asof: DateTime<Utc>) -> Self {
        self.asof = Some(asof);
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_id = Some(snapshot_id.into());
        self
    }

    /// Context for a nested invocation: identical except one level deeper.
    pub fn child(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_context_creation() {
        let ctx = ExecutionContext::new();
        assert!(!ctx.trace_id.is_nil());
        assert_eq!(ctx.depth, 0);
        assert!(!ctx.is_nested());
        assert!(ctx.snapshot_id.is_none());
    }

    #[test]
    fn test_child_keeps_pins() {
        let asof = Utc.with_ymd_and_hms(2024, 3, 28, 0, 0, 0).unwrap();
        let ctx = ExecutionContext::new()
            .with_caller("analyst@desk")
            .with_asof(asof)
            .with_snapshot("pricing-2024-03-28");

        let child = ctx.child().child();
        assert_eq!(child.depth, 2);
        assert_eq!(child.trace_id, ctx.trace_id);
        assert_eq!(child.asof, Some(asof));
        assert_eq!(child.snapshot_id.as_deref(), Some("pricing-2024-03-28"));
        assert_eq!(child.caller.as_deref(), Some("analyst@desk"));
        assert!(child.is_nested());
    }
}
