use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::provenance::Provenance;

/// How a step ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure,
    Degraded,
    Timeout,
    Cancelled,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Degraded => "degraded",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "degraded" => Some(Self::Degraded),
            "timeout" => Some(Self::Timeout),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Timeout | Self::Cancelled)
    }
}

/// One step's record in the execution trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    pub step_id: String,
    pub capability: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: StepOutcome,
    /// Provenance of the value written to state, or `Error` when nothing was written.
    pub provenance: Provenance,
    pub resolved_inputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Trace of a nested pattern run started by this step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TraceEntry>,
}

impl TraceEntry {
    pub fn new(step_id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            capability: capability.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            outcome: StepOutcome::Success,
            provenance: Provenance::Real,
            resolved_inputs: Map::new(),
            error: None,
            children: Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_failure()
    }

    /// What this entry contributes to the run's aggregate provenance.
    ///
    /// A step that wrote nothing counts as `Degraded`: the run lost data but
    /// nothing untrustworthy reached its state.
    pub fn aggregate_provenance(&self) -> Provenance {
        if self.outcome != StepOutcome::Success && self.provenance == Provenance::Error {
            Provenance::Degraded
        } else {
            self.provenance
        }
    }
}

/// Append-only, ordered execution log of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraceEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    pub fn get(&self, step_id: &str) -> Option<&TraceEntry> {
        self.entries.iter().find(|e| e.step_id == step_id)
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    /// Weakest aggregate provenance over all entries.
    pub fn provenance(&self) -> Provenance {
        Provenance::weakest(self.entries.iter().map(TraceEntry::aggregate_provenance))
    }

    pub fn into_entries(self) -> Vec<TraceEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a TraceEntry;
    type IntoIter = std::slice::Iter<'a, TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step_id: &str, outcome: StepOutcome, provenance: Provenance) -> TraceEntry {
        TraceEntry {
            outcome,
            provenance,
            ..TraceEntry::new(step_id, "cap.op")
        }
    }

    #[test]
    fn test_outcome_failure_classes() {
        assert!(StepOutcome::Failure.is_failure());
        assert!(StepOutcome::Timeout.is_failure());
        assert!(StepOutcome::Cancelled.is_failure());
        assert!(!StepOutcome::Degraded.is_failure());
        assert!(!StepOutcome::Success.is_failure());
        assert_eq!(StepOutcome::parse("timeout"), Some(StepOutcome::Timeout));
    }

    #[test]
    fn test_trace_is_ordered_and_queryable() {
        let mut trace = Trace::new();
        assert!(trace.is_empty());
        assert_eq!(trace.provenance(), Provenance::Real);

        trace.push(entry("a", StepOutcome::Success, Provenance::Real));
        trace.push(entry("b", StepOutcome::Degraded, Provenance::Degraded));
        trace.push(entry("c", StepOutcome::Success, Provenance::Cached));

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.last().unwrap().step_id, "c");
        assert_eq!(trace.get("b").unwrap().outcome, StepOutcome::Degraded);
        assert_eq!(trace.count(StepOutcome::Success), 2);
        assert_eq!(trace.provenance(), Provenance::Degraded);
        let ids: Vec<_> = trace.iter().map(|e| e.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failed_entries_degrade_the_aggregate() {
        let mut trace = Trace::new();
        trace.push(entry("a", StepOutcome::Success, Provenance::Real));
        trace.push(entry("b", StepOutcome::Failure, Provenance::Error));
        assert_eq!(trace.provenance(), Provenance::Degraded);

        trace.push(entry("c", StepOutcome::Success, Provenance::Stub));
        assert_eq!(trace.provenance(), Provenance::Stub);

        trace.push(entry("d", StepOutcome::Success, Provenance::Error));
        assert_eq!(trace.provenance(), Provenance::Error);
    }

    #[test]
    fn test_trace_serializes_as_list() {
        let mut trace = Trace::new();
        trace.push(entry("a", StepOutcome::Timeout, Provenance::Error));
        let json = serde_json::to_value(&trace).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["outcome"], "timeout");
        assert!(json[0].get("children").is_none());
    }
}
