//! Working memory of a pattern run.
//!
//! Values live in one canonical store. The flat grammar (`key.path`) and the
//! namespaced grammar (`state.key.path`) both read that store, so the two
//! roots cannot disagree. `snapshot` materializes the dual-root JSON view
//! (`{key: v, "_ns": {key: v}}`) for callers that want to inspect it.

use pattern_core::{ExecutionContext, Provenance, CTX_ROOT, NAMESPACE_KEY};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    value: Value,
    provenance: Provenance,
}

/// Per-run state; a nested run sees its parent read-only.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    ctx: ExecutionContext,
    slots: BTreeMap<String, Slot>,
    parent: Option<Arc<ExecutionState>>,
}

impl ExecutionState {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self {
            ctx,
            slots: BTreeMap::new(),
            parent: None,
        }
    }

    /// State for a nested run. Lookups fall through to `parent`; writes never do.
    pub fn child(parent: Arc<ExecutionState>, ctx: ExecutionContext) -> Self {
        Self {
            ctx,
            slots: BTreeMap::new(),
            parent: Some(parent),
        }
    }

    /// Seed caller-supplied inputs.
    pub(crate) fn seed(&mut self, inputs: Map<String, Value>) {
        self.seed_tagged(inputs, &BTreeMap::new());
    }

    /// Seed inputs derived from other state; keys without a tag are `Real`.
    pub(crate) fn seed_tagged(
        &mut self,
        inputs: Map<String, Value>,
        tags: &BTreeMap<String, Provenance>,
    ) {
        for (key, value) in inputs {
            let provenance = tags.get(&key).copied().unwrap_or(Provenance::Real);
            self.record(&key, value, provenance);
        }
    }

    /// Step-completion write: the only mutation path.
    pub(crate) fn record(&mut self, key: &str, value: Value, provenance: Provenance) {
        self.slots
            .insert(key.to_string(), Slot { value, provenance });
    }

    fn slot(&self, key: &str) -> Option<&Slot> {
        match self.slots.get(key) {
            Some(slot) => Some(slot),
            None => self.parent.as_ref().and_then(|p| p.slot(key)),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// The context as addressed by `{{ctx.*}}` templates.
    pub fn context_value(&self) -> Value {
        serde_json::to_value(&self.ctx).unwrap_or(Value::Null)
    }

    /// `state[key]`
    pub fn flat(&self, key: &str) -> Option<&Value> {
        self.slot(key).map(|s| &s.value)
    }

    /// `state["_ns"][key]`
    pub fn namespaced(&self, key: &str) -> Option<&Value> {
        self.slot(key).map(|s| &s.value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.flat(key)
    }

    pub fn provenance_of(&self, key: &str) -> Option<Provenance> {
        self.slot(key).map(|s| s.provenance)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slot(key).is_some()
    }

    /// Keys written to this run's own store, excluding the parent's.
    pub fn own_keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Every key visible to this run, child keys shadowing parent keys.
    pub fn visible(&self) -> Map<String, Value> {
        let mut map = match &self.parent {
            Some(parent) => parent.visible(),
            None => Map::new(),
        };
        for (key, slot) in &self.slots {
            map.insert(key.clone(), slot.value.clone());
        }
        map
    }

    /// Weakest provenance among every visible value, ignoring shadowed parent keys.
    pub fn weakest_visible(&self) -> Provenance {
        let mut keys = BTreeSet::new();
        self.collect_keys(&mut keys);
        Provenance::weakest(keys.into_iter().filter_map(|key| self.provenance_of(key)))
    }

    fn collect_keys<'a>(&'a self, keys: &mut BTreeSet<&'a str>) {
        if let Some(parent) = &self.parent {
            parent.collect_keys(keys);
        }
        keys.extend(self.slots.keys().map(String::as_str));
    }

    /// Dual-root JSON view of this run's own values plus its context.
    pub fn snapshot(&self) -> Value {
        let mut root = Map::new();
        let mut namespaced = Map::new();
        for (key, slot) in &self.slots {
            root.insert(key.clone(), slot.value.clone());
            namespaced.insert(key.clone(), slot.value.clone());
        }
        root.insert(NAMESPACE_KEY.to_string(), Value::Object(namespaced));
        root.insert(CTX_ROOT.to_string(), self.context_value());
        Value::Object(root)
    }
}
