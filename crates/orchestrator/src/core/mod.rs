//! Core abstractions for the orchestrator execution model.
//!
//! - [`Orchestrator`] - Runs patterns step by step, including nested runs
//! - [`OrderedEventEmitter`] - Event emitter with sequence guarantees

mod events;
mod execution;
mod step;

pub use events::OrderedEventEmitter;
pub use execution::Orchestrator;
