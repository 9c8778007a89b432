//! Capability registry.
//!
//! Maps `category.operation` names to handlers and role names to legacy
//! handlers. It is populated once at startup and then shared behind an
//! `Arc`; registration takes `&mut self`, so a registry that is being
//! read by running patterns cannot be mutated.

mod binding;
mod handler;

use pattern_core::EXECUTE_PATTERN;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

pub use binding::{aliases_for, bind_parameters};
pub use handler::{
    CapabilityCall, CapabilityError, CapabilityHandler, CapabilityOutput, FnCapability,
    LegacyHandler, Parameter,
};

/// A registered capability: its handler and the parameter schema captured at registration.
#[derive(Clone)]
pub struct CapabilityBinding {
    pub name: String,
    pub handler: Arc<dyn CapabilityHandler>,
    pub parameters: Arc<[Parameter]>,
}

impl std::fmt::Debug for CapabilityBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityBinding")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, CapabilityBinding>,
    legacy: HashMap<String, Arc<dyn LegacyHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`; an existing registration is replaced.
    pub fn register<H>(&mut self, name: &str, handler: H) -> Result<()>
    where
        H: CapabilityHandler + 'static,
    {
        self.register_arc(name, Arc::new(handler))
    }

    pub fn register_arc(&mut self, name: &str, handler: Arc<dyn CapabilityHandler>) -> Result<()> {
        validate_capability_name(name)?;

        let parameters: Arc<[Parameter]> = handler.parameters().into();
        let binding = CapabilityBinding {
            name: name.to_string(),
            handler,
            parameters,
        };

        if self.capabilities.insert(name.to_string(), binding).is_some() {
            warn!(capability = %name, "Capability re-registered, previous handler replaced");
        } else {
            debug!(capability = %name, "Capability registered");
        }
        Ok(())
    }

    /// Register an async closure as a capability.
    pub fn register_fn<F, Fut>(&mut self, name: &str, parameters: Vec<Parameter>, f: F) -> Result<()>
    where
        F: Fn(CapabilityCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<CapabilityOutput, CapabilityError>> + Send + 'static,
    {
        self.register(name, FnCapability::new(parameters, f))
    }

    /// Register a legacy handler under a role name used by the fallback layer.
    pub fn register_legacy<H>(&mut self, role: &str, handler: H)
    where
        H: LegacyHandler + 'static,
    {
        if self
            .legacy
            .insert(role.to_string(), Arc::new(handler))
            .is_some()
        {
            warn!(role = %role, "Legacy handler re-registered, previous handler replaced");
        } else {
            debug!(role = %role, "Legacy handler registered");
        }
    }

    /// Look up a capability; absence is an ordinary outcome.
    pub fn resolve(&self, name: &str) -> Option<&CapabilityBinding> {
        self.capabilities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn legacy_handler(&self, role: &str) -> Option<Arc<dyn LegacyHandler>> {
        self.legacy.get(role).cloned()
    }

    /// Bind arguments from `context` to the parameters `binding` declares.
    pub fn bind_parameters(
        &self,
        binding: &CapabilityBinding,
        context: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        bind_parameters(&binding.name, &binding.parameters, context)
    }

    /// Registered capability names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut roles: Vec<&String> = self.legacy.keys().collect();
        roles.sort();
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .field("legacy_roles", &roles)
            .finish()
    }
}

fn validate_capability_name(name: &str) -> Result<()> {
    if name == EXECUTE_PATTERN {
        return Err(OrchestratorError::schema(
            "capability registration",
            format!("'{}' is reserved for nested patterns", EXECUTE_PATTERN),
        ));
    }
    match name.split_once('.') {
        Some((category, operation)) if !category.is_empty() && !operation.is_empty() => Ok(()),
        _ => Err(OrchestratorError::schema(
            "capability registration",
            format!("'{}' is not of the form category.operation", name),
        )),
    }
}
