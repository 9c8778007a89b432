//! Best-effort routing of unregistered capabilities to legacy handlers.
//!
//! Anything produced here is capped at `Degraded` provenance.

use pattern_core::{ExecutionContext, Provenance};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::registry::{CapabilityOutput, CapabilityRegistry};

pub const DATA_HARVESTER: &str = "data_harvester";
pub const FINANCIAL_ANALYST: &str = "financial_analyst";
pub const DATA_DIGESTER: &str = "data_digester";
pub const GENERALIST: &str = "generalist";

/// Keyword routes, tried in order; a token matches a keyword it starts with.
const ROUTES: &[(&[&str], &str)] = &[
    (&["fetch", "harvest", "get", "load"], DATA_HARVESTER),
    (
        &["calculate", "compute", "analyze", "forecast"],
        FINANCIAL_ANALYST,
    ),
    (&["store", "save", "persist"], DATA_DIGESTER),
];

/// Pick the legacy role most likely to handle `capability`.
pub fn guess_handler(capability: &str) -> &'static str {
    let lowered = capability.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    ROUTES
        .iter()
        .find(|(keywords, _)| {
            tokens
                .iter()
                .any(|token| keywords.iter().any(|kw| token.starts_with(kw)))
        })
        .map(|(_, role)| *role)
        .unwrap_or(GENERALIST)
}

/// Free-text instruction for a legacy handler, e.g.
/// `Execute quote on pricing with symbols=["AAPL"]`.
pub fn synthesize_instruction(capability: &str, args: &Map<String, Value>) -> String {
    let (category, operation) = capability.split_once('.').unwrap_or(("general", capability));
    let mut instruction = format!("Execute {} on {}", operation, category);
    if !args.is_empty() {
        let rendered: Vec<String> = args
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}={}", key, s),
                other => format!("{}={}", key, other),
            })
            .collect();
        instruction.push_str(" with ");
        instruction.push_str(&rendered.join(", "));
    }
    instruction
}

/// What the legacy handler returned and who produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackResult {
    pub handler: &'static str,
    pub instruction: String,
    pub output: CapabilityOutput,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackRouter;

impl FallbackRouter {
    pub fn new() -> Self {
        Self
    }

    /// Route a missing capability to a legacy handler.
    ///
    /// Fails with `UnknownCapability` naming the capability when the guessed
    /// role has no registered handler; never invents a value.
    pub async fn route(
        &self,
        registry: &CapabilityRegistry,
        capability: &str,
        args: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<FallbackResult> {
        let role = guess_handler(capability);
        let Some(handler) = registry.legacy_handler(role) else {
            warn!(capability = %capability, handler = %role, "No legacy handler for missing capability");
            return Err(OrchestratorError::UnknownCapability {
                capability: capability.to_string(),
                tried: role.to_string(),
            });
        };

        let instruction = synthesize_instruction(capability, args);
        info!(capability = %capability, handler = %role, "Routing missing capability to legacy handler");

        let output = handler
            .process_request(&instruction, args, ctx)
            .await
            .map_err(|e| OrchestratorError::capability_failed(capability, e))?;

        Ok(FallbackResult {
            handler: role,
            instruction,
            output: output.capped(Provenance::Degraded),
        })
    }
}
