//! Pattern orchestration engine.
//!
//! Patterns are ordered lists of steps. Each step names a `category.operation`
//! capability, binds its inputs from templates over the run's state, and writes
//! its result back under an output key with a provenance tag.

pub mod config;
pub mod core;
pub mod error;
pub mod fallback;
pub mod library;
pub mod loader;
pub mod registry;
pub mod state;
pub mod state_machine;
pub mod template;

pub use config::EngineConfig;
pub use self::core::{OrderedEventEmitter, Orchestrator};
pub use error::{OrchestratorError, PathError, Result};
pub use fallback::{FallbackResult, FallbackRouter};
pub use library::PatternLibrary;
pub use loader::{Advisory, PatternLoader};
pub use registry::{
    CapabilityBinding, CapabilityCall, CapabilityError, CapabilityHandler, CapabilityOutput,
    CapabilityRegistry, FnCapability, LegacyHandler, Parameter,
};
pub use state::ExecutionState;
pub use state_machine::{PatternStateMachine, StepLifecycle, StepStateMachine};
pub use tokio_util::sync::CancellationToken;
