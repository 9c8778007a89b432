//! `{{ dot.separated.path }}` resolution against execution state.
//!
//! A path starts at one of three roots:
//! - a bare key (`step1.value`), the flat root
//! - `state` followed by a key (`state.step1.value`), the namespaced root
//! - `ctx` (`ctx.snapshot_id`), the execution context
//!
//! Each following segment is tried as a mapping key, then as an attribute:
//! an array index, or `len` on arrays, objects and strings.

use pattern_core::{Provenance, CTX_ROOT, STATE_ROOT};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::PathError;
use crate::state::ExecutionState;

static TEMPLATE_RE: OnceLock<Regex> = OnceLock::new();

fn template_re() -> &'static Regex {
    TEMPLATE_RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("template regex"))
}

/// Where a template path starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateRoot<'a> {
    Context,
    /// `state` on its own, or `state.<key>...`
    Namespace(Option<&'a str>),
    Key(&'a str),
}

/// A parsed dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePath {
    raw: String,
    segments: Vec<String>,
}

impl TemplatePath {
    /// Parse the text between the braces; `None` if any segment is empty.
    pub fn parse(path: &str) -> Option<Self> {
        let raw = path.trim();
        if raw.is_empty() {
            return None;
        }
        let segments: Vec<String> = raw.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn root(&self) -> TemplateRoot<'_> {
        match self.segments[0].as_str() {
            CTX_ROOT => TemplateRoot::Context,
            STATE_ROOT => TemplateRoot::Namespace(self.segments.get(1).map(String::as_str)),
            key => TemplateRoot::Key(key),
        }
    }

    /// The state key this path reads, if it reads one.
    pub fn state_key(&self) -> Option<&str> {
        match self.root() {
            TemplateRoot::Context => None,
            TemplateRoot::Namespace(key) => key,
            TemplateRoot::Key(key) => Some(key),
        }
    }
}

/// If `expr` is exactly one template (surrounding whitespace allowed), its raw path.
pub fn whole_template(expr: &str) -> Option<&str> {
    let trimmed = expr.trim();
    let caps = template_re().captures(trimmed)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == trimmed.len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

pub fn contains_template(expr: &str) -> bool {
    template_re().is_match(expr)
}

/// Raw paths of every template inside `value`, in document order.
pub fn collect_paths(value: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    scan(value, &mut paths);
    paths
}

fn scan(value: &Value, paths: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in template_re().captures_iter(s) {
                if let Some(m) = caps.get(1) {
                    paths.push(m.as_str().to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| scan(v, paths)),
        Value::Object(map) => map.values().for_each(|v| scan(v, paths)),
        _ => {}
    }
}

/// Resolve a single expression.
///
/// A whole-template expression yields the referenced value with its JSON
/// type intact; templates embedded in other text are interpolated into a
/// string; anything else is returned as a string literal.
pub fn resolve(expr: &str, state: &ExecutionState) -> Result<Value, PathError> {
    if let Some(path) = whole_template(expr) {
        return resolve_path(path, state);
    }
    if contains_template(expr) {
        return interpolate(expr, state).map(Value::String);
    }
    Ok(Value::String(expr.to_string()))
}

/// Resolve every template inside `value`, recursing through arrays and objects.
pub fn resolve_value(value: &Value, state: &ExecutionState) -> Result<Value, PathError> {
    match value {
        Value::String(s) => resolve(s, state),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(v, state))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                out.insert(key.clone(), resolve_value(v, state)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve a step's input bindings.
pub fn resolve_inputs(
    inputs: &BTreeMap<String, Value>,
    state: &ExecutionState,
) -> Result<Map<String, Value>, PathError> {
    let mut resolved = Map::new();
    for (name, binding) in inputs {
        resolved.insert(name.clone(), resolve_value(binding, state)?);
    }
    Ok(resolved)
}

/// Weakest provenance among the state keys `inputs` reads.
pub fn consumed_provenance(inputs: &BTreeMap<String, Value>, state: &ExecutionState) -> Provenance {
    Provenance::weakest(inputs.values().map(|binding| value_provenance(binding, state)))
}

/// Weakest provenance among the state values the templates in `value` read.
///
/// The bare `{{state}}` root reads everything visible, parents included.
pub fn value_provenance(value: &Value, state: &ExecutionState) -> Provenance {
    let tags = collect_paths(value)
        .into_iter()
        .filter_map(|raw| TemplatePath::parse(&raw))
        .filter_map(|path| match path.root() {
            TemplateRoot::Context => None,
            TemplateRoot::Namespace(None) => Some(state.weakest_visible()),
            TemplateRoot::Namespace(Some(key)) | TemplateRoot::Key(key) => state.provenance_of(key),
        });
    Provenance::weakest(tags)
}

/// Walk a raw dotted path against `state`.
pub fn resolve_path(raw: &str, state: &ExecutionState) -> Result<Value, PathError> {
    let path = TemplatePath::parse(raw).ok_or_else(|| PathError::new(raw.trim(), "", 0))?;
    let segments = path.segments();
    let missing = |position: usize| PathError::new(path.as_str(), &segments[position], position);

    match path.root() {
        TemplateRoot::Context => walk(&state.context_value(), &segments[1..], 1, &path),
        TemplateRoot::Namespace(None) => walk(&Value::Object(state.visible()), &[], 1, &path),
        TemplateRoot::Namespace(Some(key)) => {
            let base = state.namespaced(key).ok_or_else(|| missing(1))?;
            walk(base, &segments[2..], 2, &path)
        }
        TemplateRoot::Key(key) => {
            let base = state.flat(key).ok_or_else(|| missing(0))?;
            walk(base, &segments[1..], 1, &path)
        }
    }
}

fn walk(
    base: &Value,
    rest: &[String],
    offset: usize,
    path: &TemplatePath,
) -> Result<Value, PathError> {
    let mut current = base;
    for (i, segment) in rest.iter().enumerate() {
        if let Some(next) = step_into(current, segment) {
            current = next;
            continue;
        }
        if segment == "len" {
            if let Some(len) = length_of(current) {
                return walk(&Value::from(len), &rest[i + 1..], offset + i + 1, path);
            }
        }
        return Err(PathError::new(path.as_str(), segment, offset + i));
    }
    Ok(current.clone())
}

fn step_into<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        Value::String(s) => Some(s.chars().count()),
        _ => None,
    }
}

fn interpolate(expr: &str, state: &ExecutionState) -> Result<String, PathError> {
    let mut out = String::with_capacity(expr.len());
    let mut last = 0;
    for caps in template_re().captures_iter(expr) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&expr[last..whole.start()]);
        match resolve_path(inner.as_str(), state)? {
            Value::String(s) => out.push_str(&s),
            other => out.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    out.push_str(&expr[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pattern_core::ExecutionContext;
    use serde_json::json;
    use std::sync::Arc;

    fn state() -> ExecutionState {
        let mut state = ExecutionState::new(
            ExecutionContext::new()
                .with_caller("tester")
                .with_snapshot("snap-7"),
        );
        state.record("step1", json!({"value": 42, "items": [{"sym": "AAPL"}, {"sym": "MSFT"}]}), Provenance::Real);
        state.record("name", json!("Growth"), Provenance::Cached);
        state
    }

    #[test]
    fn test_whole_template_detection() {
        assert_eq!(whole_template("{{ step1.value }}"), Some("step1.value"));
        assert_eq!(whole_template("  {{x}} "), Some("x"));
        assert_eq!(whole_template("total: {{x}}"), None);
        assert_eq!(whole_template("{{a}}{{b}}"), None);
        assert_eq!(whole_template("plain"), None);
    }

    #[test]
    fn test_flat_and_namespaced_resolve_identically() {
        let state = state();
        assert_eq!(resolve("{{step1.value}}", &state).unwrap(), json!(42));
        assert_eq!(resolve("{{state.step1.value}}", &state).unwrap(), json!(42));
        assert_eq!(
            resolve("{{step1.items}}", &state).unwrap(),
            resolve("{{ state.step1.items }}", &state).unwrap()
        );
    }

    #[test]
    fn test_attribute_lookup() {
        let state = state();
        assert_eq!(resolve("{{step1.items.1.sym}}", &state).unwrap(), json!("MSFT"));
        assert_eq!(resolve("{{step1.items.len}}", &state).unwrap(), json!(2));
        assert_eq!(resolve("{{name.len}}", &state).unwrap(), json!(6));
    }

    #[test]
    fn test_mapping_key_wins_over_attribute() {
        let mut state = state();
        state.record("odd", json!({"len": "key"}), Provenance::Real);
        assert_eq!(resolve("{{odd.len}}", &state).unwrap(), json!("key"));
    }

    #[test]
    fn test_path_error_names_first_unresolved_segment() {
        let state = state();

        let err = resolve("{{missing.value}}", &state).unwrap_err();
        assert_eq!((err.segment.as_str(), err.position), ("missing", 0));

        let err = resolve("{{step1.nope.deeper}}", &state).unwrap_err();
        assert_eq!((err.segment.as_str(), err.position), ("nope", 1));

        let err = resolve("{{state.missing}}", &state).unwrap_err();
        assert_eq!((err.segment.as_str(), err.position), ("missing", 1));

        let err = resolve("{{step1.items.9}}", &state).unwrap_err();
        assert_eq!(err.segment, "9");

        let err = resolve("{{step1.value.len.x}}", &state).unwrap_err();
        assert_eq!(err.segment, "len");
    }

    #[test]
    fn test_context_root() {
        let state = state();
        assert_eq!(resolve("{{ctx.snapshot_id}}", &state).unwrap(), json!("snap-7"));
        assert_eq!(resolve("{{ctx.depth}}", &state).unwrap(), json!(0));
        assert_eq!(resolve("{{ctx.caller}}", &state).unwrap(), json!("tester"));
    }

    #[test]
    fn test_interpolation_and_literals() {
        let state = state();
        assert_eq!(
            resolve("{{name}} has {{step1.value}} units", &state).unwrap(),
            json!("Growth has 42 units")
        );
        assert_eq!(resolve("no templates", &state).unwrap(), json!("no templates"));
    }

    #[test]
    fn test_resolve_value_recurses() {
        let state = state();
        let binding = json!({"first": "{{step1.items.0.sym}}", "list": ["{{name}}", 3], "flag": true});
        assert_eq!(
            resolve_value(&binding, &state).unwrap(),
            json!({"first": "AAPL", "list": ["Growth", 3], "flag": true})
        );
    }

    #[test]
    fn test_collect_paths_and_roots() {
        let paths = collect_paths(&json!({"a": "{{x.y}}", "b": ["pre {{state.z}} post", "{{ctx.asof}}"]}));
        assert_eq!(paths, vec!["x.y", "state.z", "ctx.asof"]);

        let keys: Vec<_> = paths
            .iter()
            .filter_map(|p| TemplatePath::parse(p))
            .map(|p| p.state_key().map(str::to_string))
            .collect();
        assert_eq!(keys, vec![Some("x".to_string()), Some("z".to_string()), None]);
        assert!(TemplatePath::parse("a..b").is_none());
        assert!(TemplatePath::parse("  ").is_none());
    }

    #[test]
    fn test_consumed_provenance_is_weakest_input() {
        let state = state();
        let mut inputs = BTreeMap::new();
        inputs.insert("a".to_string(), json!("{{step1.value}}"));
        assert_eq!(consumed_provenance(&inputs, &state), Provenance::Real);

        inputs.insert("b".to_string(), json!("label {{state.name}}"));
        assert_eq!(consumed_provenance(&inputs, &state), Provenance::Cached);
    }

    #[test]
    fn test_bare_state_root_consumes_every_visible_value() {
        let mut parent = ExecutionState::new(ExecutionContext::new());
        parent.record("stubbed", json!({"n": 1}), Provenance::Stub);
        let mut child = ExecutionState::child(Arc::new(parent), ExecutionContext::new());
        child.record("fresh", json!(2), Provenance::Real);

        let mut inputs = BTreeMap::new();
        inputs.insert("value".to_string(), json!("{{state}}"));
        assert_eq!(consumed_provenance(&inputs, &child), Provenance::Stub);
        assert_eq!(value_provenance(&json!("{{ctx.trace_id}}"), &child), Provenance::Real);
    }

    #[test]
    fn test_bare_state_root_sees_parent_values() {
        let parent = Arc::new(state());
        let child = ExecutionState::child(Arc::clone(&parent), parent.context().child());
        let all = resolve("{{state}}", &child).unwrap();
        assert_eq!(all["name"], json!("Growth"));
        assert_eq!(resolve("{{step1.value}}", &child).unwrap(), json!(42));
    }
}
