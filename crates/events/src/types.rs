//! Event types published while patterns run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Emission order within the emitter that produced it
    #[serde(default)]
    pub sequence: u64,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence: 0,
            event,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

/// All events emitted by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A pattern run started (top-level or nested)
    #[serde(rename = "pattern.started")]
    PatternStarted {
        trace_id: Uuid,
        pattern_id: String,
        depth: u32,
    },

    /// A step finished, whatever its outcome
    #[serde(rename = "step.completed")]
    StepCompleted {
        trace_id: Uuid,
        pattern_id: String,
        record: StepRecord,
    },

    /// A step's capability was missing and the fallback layer took over
    #[serde(rename = "capability.fallback")]
    CapabilityFallback {
        trace_id: Uuid,
        capability: String,
        /// Legacy handler the request was routed to, if any
        handler: Option<String>,
    },

    /// A pattern run reached a terminal status
    #[serde(rename = "pattern.finished")]
    PatternFinished {
        trace_id: Uuid,
        pattern_id: String,
        status: String,
        provenance: String,
        steps: usize,
    },

    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

/// Minimal per-step record for observability sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub capability: String,
    pub duration_ms: u64,
    /// One of success, failure, degraded, timeout, cancelled
    pub outcome: String,
}

impl Event {
    /// Get the trace ID associated with this event, if any
    pub fn trace_id(&self) -> Option<Uuid> {
        match self {
            Event::PatternStarted { trace_id, .. } => Some(*trace_id),
            Event::StepCompleted { trace_id, .. } => Some(*trace_id),
            Event::CapabilityFallback { trace_id, .. } => Some(*trace_id),
            Event::PatternFinished { trace_id, .. } => Some(*trace_id),
            Event::Error { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::PatternStarted { .. } => "pattern.started",
            Event::StepCompleted { .. } => "step.completed",
            Event::CapabilityFallback { .. } => "capability.fallback",
            Event::PatternFinished { .. } => "pattern.finished",
            Event::Error { .. } => "error",
        }
    }
}
