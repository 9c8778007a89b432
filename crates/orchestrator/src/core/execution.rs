//! The pattern run loop.
//!
//! A run seeds state with the caller's inputs, executes steps strictly in
//! declaration order, records every outcome in the trace and always returns
//! a `PatternResult`, aborted or not.

use events::{Event, EventBus, StepRecord};
use futures::future::BoxFuture;
use pattern_core::{
    ErrorDetail, ExecutionContext, Pattern, PatternResult, PatternStatus, Provenance, StepOutcome,
    Trace, TraceEntry,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{OrchestratorError, Result};
use crate::fallback::FallbackRouter;
use crate::library::PatternLibrary;
use crate::loader::PatternLoader;
use crate::registry::CapabilityRegistry;
use crate::state::ExecutionState;
use crate::state_machine::PatternStateMachine;

use super::events::OrderedEventEmitter;

/// Runs patterns against a shared registry and pattern library.
///
/// Cheap to share: the registry and library sit behind `Arc`s and are never
/// mutated once the orchestrator exists. Each run owns its own state and trace.
pub struct Orchestrator {
    pub(super) registry: Arc<CapabilityRegistry>,
    pub(super) library: Arc<PatternLibrary>,
    pub(super) config: EngineConfig,
    pub(super) emitter: Option<OrderedEventEmitter>,
    pub(super) fallback: FallbackRouter,
}

impl Orchestrator {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            library: Arc::new(PatternLibrary::new()),
            config: EngineConfig::default(),
            emitter: None,
            fallback: FallbackRouter::new(),
        }
    }

    /// Build an orchestrator, loading `config.pattern_dir` into its library when set.
    pub async fn bootstrap(registry: Arc<CapabilityRegistry>, config: EngineConfig) -> Result<Self> {
        let library = match &config.pattern_dir {
            Some(dir) => {
                PatternLoader::with_registry(Arc::clone(&registry))
                    .load_dir(dir)
                    .await?
            }
            None => PatternLibrary::new(),
        };
        info!(
            capabilities = registry.len(),
            patterns = library.len(),
            max_depth = config.max_depth,
            "Orchestrator ready"
        );
        Ok(Self::new(registry)
            .with_library(Arc::new(library))
            .with_config(config))
    }

    pub fn with_library(mut self, library: Arc<PatternLibrary>) -> Self {
        self.library = library;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.emitter = Some(OrderedEventEmitter::new(bus));
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn library(&self) -> &PatternLibrary {
        &self.library
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run(
        &self,
        pattern: &Pattern,
        ctx: ExecutionContext,
        inputs: Map<String, Value>,
    ) -> PatternResult {
        self.run_with_cancel(pattern, ctx, inputs, CancellationToken::new())
            .await
    }

    /// Run `pattern`, stopping at the next await point once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        pattern: &Pattern,
        ctx: ExecutionContext,
        inputs: Map<String, Value>,
        cancel: CancellationToken,
    ) -> PatternResult {
        let mut state = ExecutionState::new(ctx);
        state.seed(inputs);
        self.execute(pattern, state, &cancel).await
    }

    /// Run a pattern from the library by id.
    pub async fn run_by_id(
        &self,
        pattern_id: &str,
        ctx: ExecutionContext,
        inputs: Map<String, Value>,
    ) -> Result<PatternResult> {
        let pattern = self
            .library
            .get(pattern_id)
            .ok_or_else(|| OrchestratorError::PatternNotFound(pattern_id.to_string()))?;
        Ok(self.run(&pattern, ctx, inputs).await)
    }

    /// Shared by top-level and nested runs; boxed because nested steps recurse into it.
    ///
    /// `state` arrives seeded. Nested steps share it with the child run by
    /// `Arc`; writes go through `Arc::make_mut` once the child handle is dropped.
    pub(super) fn execute<'a>(
        &'a self,
        pattern: &'a Pattern,
        state: ExecutionState,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, PatternResult> {
        Box::pin(async move {
            let trace_id = state.context().trace_id;
            let depth = state.context().depth;
            let mut status = PatternStatus::Pending;
            let mut state = Arc::new(state);
            let mut trace = Trace::new();

            info!(pattern_id = %pattern.id, trace_id = %trace_id, depth, "Pattern run started");
            self.emit(Event::PatternStarted {
                trace_id,
                pattern_id: pattern.id.clone(),
                depth,
            });

            if let Some(missing) = pattern.inputs.iter().find(|name| !state.contains(name)) {
                let detail = OrchestratorError::MissingInput(missing.clone()).to_detail();
                advance(&pattern.id, &mut status, PatternStatus::Aborted);
                return self.finish(pattern, &state, trace, status, Some(detail));
            }
            advance(&pattern.id, &mut status, PatternStatus::Running);

            let mut failure: Option<ErrorDetail> = None;
            for step in &pattern.steps {
                if cancel.is_cancelled() {
                    let error = OrchestratorError::Cancelled;
                    let mut entry = TraceEntry::new(&step.step_id, &step.capability);
                    entry.outcome = StepOutcome::Cancelled;
                    entry.provenance = Provenance::Error;
                    entry.error = Some(error.to_string());
                    self.push_entry(pattern, trace_id, &mut trace, entry);
                    failure = Some(error.to_detail().at_step(&step.step_id));
                    break;
                }

                let report = self.execute_step(step, &state, cancel).await;
                self.push_entry(pattern, trace_id, &mut trace, report.entry);

                match report.result {
                    Ok(output) => {
                        Arc::make_mut(&mut state).record(
                            &step.output_key,
                            output.value,
                            output.provenance,
                        );
                    }
                    Err(e) if e.aborts_invocation() || step.required => {
                        error!(
                            pattern_id = %pattern.id,
                            step_id = %step.step_id,
                            error = %e,
                            "Step failed, aborting pattern"
                        );
                        failure = Some(e.to_detail().at_step(&step.step_id));
                        break;
                    }
                    Err(e) => {
                        warn!(
                            pattern_id = %pattern.id,
                            step_id = %step.step_id,
                            error = %e,
                            "Non-required step failed, continuing"
                        );
                    }
                }
            }

            let terminal = if failure.is_some() {
                PatternStatus::Aborted
            } else {
                PatternStatus::Completed
            };
            advance(&pattern.id, &mut status, terminal);
            self.finish(pattern, &state, trace, status, failure)
        })
    }

    fn finish(
        &self,
        pattern: &Pattern,
        state: &ExecutionState,
        trace: Trace,
        status: PatternStatus,
        error: Option<ErrorDetail>,
    ) -> PatternResult {
        let trace_id = state.context().trace_id;
        let outputs: Map<String, Value> = pattern
            .outputs
            .iter()
            .filter_map(|key| state.get(key).map(|v| (key.clone(), v.clone())))
            .collect();
        let provenance = if status == PatternStatus::Aborted {
            Provenance::Error
        } else {
            trace.provenance()
        };

        if let Some(detail) = &error {
            self.emit(Event::Error {
                message: detail.to_string(),
                context: Some(pattern.id.clone()),
            });
        }
        self.emit(Event::PatternFinished {
            trace_id,
            pattern_id: pattern.id.clone(),
            status: status.as_str().to_string(),
            provenance: provenance.as_str().to_string(),
            steps: trace.len(),
        });
        info!(
            pattern_id = %pattern.id,
            trace_id = %trace_id,
            status = status.as_str(),
            provenance = %provenance,
            steps = trace.len(),
            "Pattern run finished"
        );

        PatternResult {
            pattern_id: pattern.id.clone(),
            trace_id,
            status,
            outputs,
            trace,
            provenance,
            state: state.snapshot(),
            error,
        }
    }

    fn push_entry(&self, pattern: &Pattern, trace_id: Uuid, trace: &mut Trace, entry: TraceEntry) {
        self.emit(Event::StepCompleted {
            trace_id,
            pattern_id: pattern.id.clone(),
            record: StepRecord {
                step_id: entry.step_id.clone(),
                capability: entry.capability.clone(),
                duration_ms: entry.duration_ms,
                outcome: entry.outcome.as_str().to_string(),
            },
        });
        trace.push(entry);
    }

    pub(super) fn emit(&self, event: Event) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event);
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("patterns", &self.library.ids())
            .field("config", &self.config)
            .finish()
    }
}

fn advance(pattern_id: &str, status: &mut PatternStatus, to: PatternStatus) {
    if let Err(e) = PatternStateMachine::validate_transition(status, &to) {
        error!(pattern_id = %pattern_id, error = %e, "Pattern lifecycle violated");
    }
    *status = to;
}
