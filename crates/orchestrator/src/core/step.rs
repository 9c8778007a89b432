//! Executing a single step: resolve, bind, invoke, tag.

use events::Event;
use pattern_core::{
    ErrorKind, ExecutionContext, Provenance, Step, StepOutcome, StepStatus, TraceEntry,
    EXECUTE_PATTERN,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::registry::{CapabilityCall, CapabilityOutput};
use crate::state::ExecutionState;
use crate::state_machine::StepLifecycle;
use crate::template;

use super::execution::Orchestrator;

/// What one step produced: its trace entry plus the value to record, if any.
pub(super) struct StepReport {
    pub entry: TraceEntry,
    pub result: Result<CapabilityOutput>,
}

struct Attempt {
    output: CapabilityOutput,
    degraded: bool,
}

impl Orchestrator {
    pub(super) async fn execute_step(
        &self,
        step: &Step,
        state: &Arc<ExecutionState>,
        cancel: &CancellationToken,
    ) -> StepReport {
        let started = Instant::now();
        let mut lifecycle = StepLifecycle::new(&step.step_id);
        let mut entry = TraceEntry::new(&step.step_id, &step.capability);

        let attempt = self
            .attempt_step(step, state, cancel, &mut lifecycle, &mut entry)
            .await;
        entry.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match attempt {
            Ok(Attempt { output, degraded }) => {
                entry.provenance = output.provenance;
                if degraded {
                    entry.outcome = StepOutcome::Degraded;
                    lifecycle.finish(StepStatus::Degraded);
                } else {
                    entry.outcome = StepOutcome::Success;
                    lifecycle.finish(StepStatus::Succeeded);
                }
                Ok(output)
            }
            Err(e) => {
                entry.provenance = Provenance::Error;
                entry.error = Some(e.to_string());
                entry.outcome = match e.kind() {
                    ErrorKind::Timeout => StepOutcome::Timeout,
                    ErrorKind::Cancelled => StepOutcome::Cancelled,
                    ErrorKind::UnknownCapability => StepOutcome::Degraded,
                    _ => StepOutcome::Failure,
                };
                if entry.outcome == StepOutcome::Degraded {
                    lifecycle.finish(StepStatus::Degraded);
                } else {
                    lifecycle.finish(StepStatus::Failed);
                }
                Err(e)
            }
        };

        debug!(
            step_id = %step.step_id,
            capability = %step.capability,
            outcome = entry.outcome.as_str(),
            provenance = %entry.provenance,
            duration_ms = entry.duration_ms,
            "Step finished"
        );
        StepReport { entry, result }
    }

    async fn attempt_step(
        &self,
        step: &Step,
        state: &Arc<ExecutionState>,
        cancel: &CancellationToken,
        lifecycle: &mut StepLifecycle,
        entry: &mut TraceEntry,
    ) -> Result<Attempt> {
        lifecycle.advance(StepStatus::Resolving)?;
        let resolved = template::resolve_inputs(&step.inputs, state)?;
        entry.resolved_inputs = resolved.clone();
        let consumed = template::consumed_provenance(&step.inputs, state);

        if step.is_nested() {
            lifecycle.advance(StepStatus::Bound)?;
            lifecycle.advance(StepStatus::Executing)?;
            let (result, children) = self.run_nested(step, &resolved, state, cancel).await;
            entry.children = children;
            return result.map(|output| Attempt {
                output: output.capped(consumed),
                degraded: false,
            });
        }

        let ctx = state.context();
        let Some(binding) = self.registry.resolve(&step.capability) else {
            lifecycle.advance(StepStatus::Bound)?;
            lifecycle.advance(StepStatus::Executing)?;
            let routed = guarded(
                cancel,
                Some(self.config.step_timeout(step.timeout_ms)),
                self.fallback
                    .route(&self.registry, &step.capability, &resolved, ctx),
            )
            .await;
            self.emit(Event::CapabilityFallback {
                trace_id: ctx.trace_id,
                capability: step.capability.clone(),
                handler: routed.as_ref().ok().map(|r| r.handler.to_string()),
            });
            let routed = routed?;
            return Ok(Attempt {
                output: routed.output.capped(consumed),
                degraded: true,
            });
        };

        lifecycle.advance(StepStatus::Bound)?;
        let args = self
            .registry
            .bind_parameters(binding, &binding_context(resolved, ctx))?;

        lifecycle.advance(StepStatus::Executing)?;
        let handler = Arc::clone(&binding.handler);
        let capability = step.capability.clone();
        let call = CapabilityCall {
            capability: capability.clone(),
            args,
            ctx: ctx.clone(),
        };
        let output = guarded(
            cancel,
            Some(self.config.step_timeout(step.timeout_ms)),
            async move {
                handler
                    .call(call)
                    .await
                    .map_err(|e| OrchestratorError::capability_failed(capability, e))
            },
        )
        .await?;

        Ok(Attempt {
            output: output.capped(consumed),
            degraded: false,
        })
    }

    /// Run the pattern an `execute_pattern` step names, one level deeper.
    ///
    /// The child's trace entries are returned even when it fails.
    async fn run_nested(
        &self,
        step: &Step,
        args: &Map<String, Value>,
        state: &Arc<ExecutionState>,
        cancel: &CancellationToken,
    ) -> (Result<CapabilityOutput>, Vec<TraceEntry>) {
        let Some(pattern_id) = args.get("pattern_id").and_then(Value::as_str) else {
            return (
                Err(OrchestratorError::binding(EXECUTE_PATTERN, "pattern_id")),
                Vec::new(),
            );
        };

        let child_ctx = state.context().child();
        if child_ctx.depth > self.config.max_depth {
            return (
                Err(OrchestratorError::RecursionLimit {
                    pattern_id: pattern_id.to_string(),
                    max_depth: self.config.max_depth,
                }),
                Vec::new(),
            );
        }

        let Some(pattern) = self.library.get(pattern_id) else {
            return (
                Err(OrchestratorError::PatternNotFound(pattern_id.to_string())),
                Vec::new(),
            );
        };

        let inputs = match args.get("inputs") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return (
                    Err(OrchestratorError::binding(EXECUTE_PATTERN, "inputs")),
                    Vec::new(),
                )
            }
        };

        let tags = nested_input_tags(step.inputs.get("inputs"), &inputs, state);
        let mut child = ExecutionState::child(Arc::clone(state), child_ctx);
        child.seed_tagged(inputs, &tags);
        let result = self.execute(&pattern, child, cancel).await;
        let children = result.trace.into_entries();

        match result.error {
            Some(detail) => (
                Err(OrchestratorError::NestedFailed {
                    pattern_id: pattern_id.to_string(),
                    detail,
                }),
                children,
            ),
            None => (
                Ok(CapabilityOutput::new(
                    Value::Object(result.outputs),
                    result.provenance,
                )),
                children,
            ),
        }
    }
}

/// Provenance each nested input inherits from the parent values its binding read.
///
/// `binding` is either an object of per-input templates or one template that
/// produced the whole inputs object.
fn nested_input_tags(
    binding: Option<&Value>,
    inputs: &Map<String, Value>,
    state: &ExecutionState,
) -> BTreeMap<String, Provenance> {
    inputs
        .keys()
        .map(|key| {
            let source = match binding {
                Some(Value::Object(fields)) => fields.get(key),
                other => other,
            };
            let tag = source.map_or(Provenance::Real, |v| template::value_provenance(v, state));
            (key.clone(), tag)
        })
        .collect()
}

/// Resolved step inputs plus the context fields handlers commonly ask for.
/// Explicit step inputs win over context values.
fn binding_context(mut resolved: Map<String, Value>, ctx: &ExecutionContext) -> Map<String, Value> {
    let mut add = |key: &str, value: Value| {
        if !resolved.contains_key(key) {
            resolved.insert(key.to_string(), value);
        }
    };
    add("trace_id", Value::String(ctx.trace_id.to_string()));
    if let Some(asof) = &ctx.asof {
        add("asof", Value::String(asof.to_rfc3339()));
    }
    if let Some(snapshot_id) = &ctx.snapshot_id {
        add("snapshot_id", Value::String(snapshot_id.clone()));
    }
    if let Some(caller) = &ctx.caller {
        add("caller", Value::String(caller.clone()));
    }
    resolved
}

/// Race `fut` against cancellation and, when given, a timeout.
async fn guarded<T, F>(cancel: &CancellationToken, timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timed = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(OrchestratorError::Timeout {
                    duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            },
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
        result = timed => result,
    }
}
