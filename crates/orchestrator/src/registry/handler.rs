//! Handler contracts for capabilities and legacy agents.

use async_trait::async_trait;
use futures::future::BoxFuture;
use pattern_core::{ExecutionContext, Provenance};
use serde_json::{Map, Value};
use std::future::Future;
use thiserror::Error;

/// Typed failure a handler reports back to the engine.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A parameter a handler declares; drives argument binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Value>,
}

impl Parameter {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
        }
    }
}

/// Bound arguments plus the run context, handed to a handler.
#[derive(Debug, Clone)]
pub struct CapabilityCall {
    pub capability: String,
    pub args: Map<String, Value>,
    pub ctx: ExecutionContext,
}

impl CapabilityCall {
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Value, CapabilityError> {
        self.args
            .get(name)
            .ok_or_else(|| CapabilityError::InvalidArgument(format!("missing '{}'", name)))
    }

    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }
}

/// A handler's value together with how much it can be trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityOutput {
    pub value: Value,
    pub provenance: Provenance,
}

impl CapabilityOutput {
    pub fn new(value: Value, provenance: Provenance) -> Self {
        Self { value, provenance }
    }

    pub fn real(value: Value) -> Self {
        Self::new(value, Provenance::Real)
    }

    pub fn cached(value: Value) -> Self {
        Self::new(value, Provenance::Cached)
    }

    pub fn stub(value: Value) -> Self {
        Self::new(value, Provenance::Stub)
    }

    /// Lower the provenance to at most `ceiling`.
    pub fn capped(mut self, ceiling: Provenance) -> Self {
        self.provenance = self.provenance.combine(ceiling);
        self
    }
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Parameters this handler accepts, in declaration order.
    fn parameters(&self) -> Vec<Parameter>;

    async fn call(&self, call: CapabilityCall) -> Result<CapabilityOutput, CapabilityError>;
}

/// Free-text entry point of a pre-capability agent, used only by the fallback layer.
#[async_trait]
pub trait LegacyHandler: Send + Sync {
    async fn process_request(
        &self,
        instruction: &str,
        args: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<CapabilityOutput, CapabilityError>;
}

type HandlerFn = dyn Fn(CapabilityCall) -> BoxFuture<'static, Result<CapabilityOutput, CapabilityError>>
    + Send
    + Sync;

/// Capability backed by an async closure.
pub struct FnCapability {
    parameters: Vec<Parameter>,
    f: Box<HandlerFn>,
}

impl FnCapability {
    pub fn new<F, Fut>(parameters: Vec<Parameter>, f: F) -> Self
    where
        F: Fn(CapabilityCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CapabilityOutput, CapabilityError>> + Send + 'static,
    {
        Self {
            parameters,
            f: Box::new(move |call| Box::pin(f(call))),
        }
    }
}

#[async_trait]
impl CapabilityHandler for FnCapability {
    fn parameters(&self) -> Vec<Parameter> {
        self.parameters.clone()
    }

    async fn call(&self, call: CapabilityCall) -> Result<CapabilityOutput, CapabilityError> {
        (self.f)(call).await
    }
}

impl std::fmt::Debug for FnCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCapability")
            .field("parameters", &self.parameters)
            .finish()
    }
}
