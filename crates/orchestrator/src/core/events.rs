//! Ordered event emitter with sequence guarantees.
//!
//! Nested runs share their parent's emitter, so the sequence numbers of one
//! top-level invocation interleave child events in the order they happened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, EventEnvelope};

/// Event emitter with sequence number guarantees.
///
/// Wraps an EventBus and stamps each envelope with a monotonically
/// increasing sequence number.
#[derive(Clone)]
pub struct OrderedEventEmitter {
    bus: EventBus,
    sequence: Arc<AtomicU64>,
}

impl OrderedEventEmitter {
    /// Create a new ordered event emitter wrapping the given bus.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event with the next sequence number.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.bus.publish(EventEnvelope::new(event).with_sequence(seq));
    }

    /// Get the current sequence number (for debugging/testing).
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Get a reference to the underlying event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl std::fmt::Debug for OrderedEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedEventEmitter")
            .field("sequence", &self.current_sequence())
            .finish()
    }
}
