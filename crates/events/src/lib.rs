//! Event system for the pattern engine
//!
//! This crate provides the event bus and event types that carry per-step
//! records and run lifecycle notifications to observability sinks.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
