//! Pattern definition loading and validation.
//!
//! A definition is checked structurally first (`SchemaError`), then for data
//! flow (`DependencyError`): every template must address a declared input,
//! the output of a strictly earlier step, or the `ctx` root. Capabilities
//! missing from the registry only produce an advisory, since handlers may
//! register after patterns load.

use pattern_core::{is_reserved_key, Pattern, Step, EXECUTE_PATTERN};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::library::PatternLibrary;
use crate::registry::CapabilityRegistry;
use crate::template::{self, TemplatePath, TemplateRoot};

/// A non-fatal finding produced while validating a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    UnknownCapability { step_id: String, capability: String },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCapability {
                step_id,
                capability,
            } => write!(
                f,
                "step {} uses capability {} which is not registered",
                step_id, capability
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatternLoader {
    registry: Option<Arc<CapabilityRegistry>>,
}

impl PatternLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check capabilities against `registry` and report unknown ones as advisories.
    pub fn with_registry(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry: Some(registry),
        }
    }

    pub fn validate(&self, def: &Value) -> Result<Pattern> {
        let (pattern, advisories) = self.validate_with_advisories(def)?;
        for advisory in &advisories {
            warn!(pattern_id = %pattern.id, advisory = %advisory, "Pattern advisory");
        }
        Ok(pattern)
    }

    pub fn validate_with_advisories(&self, def: &Value) -> Result<(Pattern, Vec<Advisory>)> {
        let pattern = parse_structure(def)?;
        check_dependencies(&pattern)?;

        let advisories = match &self.registry {
            Some(registry) => pattern
                .steps
                .iter()
                .filter(|s| !s.is_nested() && !registry.contains(&s.capability))
                .map(|s| Advisory::UnknownCapability {
                    step_id: s.step_id.clone(),
                    capability: s.capability.clone(),
                })
                .collect(),
            None => Vec::new(),
        };

        debug!(
            pattern_id = %pattern.id,
            steps = pattern.steps.len(),
            advisories = advisories.len(),
            "Pattern validated"
        );
        Ok((pattern, advisories))
    }

    pub fn parse_str(&self, content: &str) -> Result<Pattern> {
        let def: Value = serde_json::from_str(content)?;
        self.validate(&def)
    }

    pub async fn load_file(&self, path: &Path) -> Result<Pattern> {
        let content = fs::read_to_string(path).await?;
        let pattern = self.parse_str(&content).map_err(|e| match e {
            OrchestratorError::Serialization(inner) => OrchestratorError::schema(
                path.display().to_string(),
                inner.to_string(),
            ),
            other => other,
        })?;
        debug!(path = %path.display(), pattern_id = %pattern.id, "Pattern loaded");
        Ok(pattern)
    }

    /// Load every `*.json` file in `dir`, in file-name order.
    pub async fn load_dir(&self, dir: &Path) -> Result<PatternLibrary> {
        let mut paths: Vec<PathBuf> = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut library = PatternLibrary::new();
        for path in &paths {
            library.insert(self.load_file(path).await?)?;
        }

        info!(dir = %dir.display(), patterns = library.len(), "Pattern library loaded");
        Ok(library)
    }
}

fn parse_structure(def: &Value) -> Result<Pattern> {
    let obj = def
        .as_object()
        .ok_or_else(|| OrchestratorError::schema("pattern", "definition must be a JSON object"))?;

    let id = required_str(obj, "id", "pattern")?;
    if id.is_empty() {
        return Err(OrchestratorError::schema("pattern", "'id' must not be empty"));
    }
    let context = format!("pattern {}", id);

    let version = required_str(obj, "version", &context)?.to_string();
    let description = optional_str(obj, "description", &context)?.map(str::to_string);

    let inputs = string_list(obj, "inputs", &context)?;
    for name in &inputs {
        if is_reserved_key(name) {
            return Err(OrchestratorError::schema(
                &context,
                format!("input name '{}' is reserved", name),
            ));
        }
    }

    let outputs = if obj.contains_key("outputs") {
        string_list(obj, "outputs", &context)?
    } else {
        string_list(obj, "declared_outputs", &context)?
    };

    let raw_steps = match obj.get("steps") {
        Some(Value::Array(steps)) if !steps.is_empty() => steps,
        Some(Value::Array(_)) => {
            return Err(OrchestratorError::schema(&context, "'steps' must not be empty"))
        }
        Some(_) => return Err(OrchestratorError::schema(&context, "'steps' must be an array")),
        None => return Err(OrchestratorError::schema(&context, "missing field 'steps'")),
    };

    let mut steps = Vec::with_capacity(raw_steps.len());
    let mut step_ids = HashSet::new();
    let mut output_keys = HashSet::new();
    for (index, raw) in raw_steps.iter().enumerate() {
        let step = parse_step(raw, index, &context)?;
        if !step_ids.insert(step.step_id.clone()) {
            return Err(OrchestratorError::schema(
                &context,
                format!("duplicate step id '{}'", step.step_id),
            ));
        }
        if !output_keys.insert(step.output_key.clone()) {
            return Err(OrchestratorError::schema(
                &context,
                format!("duplicate output key '{}'", step.output_key),
            ));
        }
        steps.push(step);
    }

    Ok(Pattern {
        id: id.to_string(),
        version,
        description,
        inputs,
        steps,
        outputs,
    })
}

fn parse_step(raw: &Value, index: usize, pattern_context: &str) -> Result<Step> {
    let obj = raw.as_object().ok_or_else(|| {
        OrchestratorError::schema(pattern_context, format!("step {} must be an object", index))
    })?;

    let step_id = required_str(obj, "step_id", &format!("{} step {}", pattern_context, index))?;
    let context = format!("{} step {}", pattern_context, step_id);
    if step_id.is_empty() {
        return Err(OrchestratorError::schema(&context, "'step_id' must not be empty"));
    }

    let capability = required_str(obj, "capability", &context)?;
    if capability != EXECUTE_PATTERN {
        match capability.split_once('.') {
            Some((category, operation)) if !category.is_empty() && !operation.is_empty() => {}
            _ => {
                return Err(OrchestratorError::schema(
                    &context,
                    format!("capability '{}' is not of the form category.operation", capability),
                ))
            }
        }
    }

    let output_key = required_str(obj, "output_key", &context)?;
    if output_key.is_empty() {
        return Err(OrchestratorError::schema(&context, "'output_key' must not be empty"));
    }
    if is_reserved_key(output_key) {
        return Err(OrchestratorError::schema(
            &context,
            format!("output key '{}' is reserved", output_key),
        ));
    }

    let inputs: BTreeMap<String, Value> = match obj.get("inputs") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Some(_) => return Err(OrchestratorError::schema(&context, "'inputs' must be an object")),
    };

    let required = match obj.get("required") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(OrchestratorError::schema(&context, "'required' must be a boolean")),
    };

    let timeout_ms = match obj.get("timeout_ms") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64().filter(|ms| *ms > 0).ok_or_else(|| {
            OrchestratorError::schema(&context, "'timeout_ms' must be a positive integer")
        })?),
    };

    if capability == EXECUTE_PATTERN {
        check_nested_arguments(&inputs, &context)?;
    }

    Ok(Step {
        step_id: step_id.to_string(),
        capability: capability.to_string(),
        inputs,
        output_key: output_key.to_string(),
        required,
        timeout_ms,
    })
}

fn check_nested_arguments(inputs: &BTreeMap<String, Value>, context: &str) -> Result<()> {
    match inputs.get("pattern_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {}
        Some(_) => {
            return Err(OrchestratorError::schema(
                context,
                "'pattern_id' must be a non-empty string",
            ))
        }
        None => {
            return Err(OrchestratorError::schema(
                context,
                format!("{} requires a 'pattern_id' input", EXECUTE_PATTERN),
            ))
        }
    }
    match inputs.get("inputs") {
        None | Some(Value::Object(_)) => Ok(()),
        Some(Value::String(s)) if template::whole_template(s).is_some() => Ok(()),
        Some(_) => Err(OrchestratorError::schema(
            context,
            "nested 'inputs' must be an object or a single template",
        )),
    }
}

fn check_dependencies(pattern: &Pattern) -> Result<()> {
    let mut available: HashSet<&str> = pattern.inputs.iter().map(String::as_str).collect();

    for step in &pattern.steps {
        let context = format!("pattern {} step {}", pattern.id, step.step_id);
        for binding in step.inputs.values() {
            for raw in template::collect_paths(binding) {
                let path = TemplatePath::parse(&raw).ok_or_else(|| {
                    OrchestratorError::schema(&context, format!("malformed template '{{{{{}}}}}'", raw))
                })?;
                match path.root() {
                    TemplateRoot::Context | TemplateRoot::Namespace(None) => {}
                    TemplateRoot::Namespace(Some(key)) | TemplateRoot::Key(key) => {
                        if !available.contains(key) {
                            return Err(OrchestratorError::dependency(
                                &context,
                                format!(
                                    "'{{{{{}}}}}' references '{}', which is neither a declared input nor an earlier output",
                                    raw, key
                                ),
                            ));
                        }
                    }
                }
            }
        }
        available.insert(step.output_key.as_str());
    }

    for output in &pattern.outputs {
        if !available.contains(output.as_str()) {
            return Err(OrchestratorError::dependency(
                format!("pattern {}", pattern.id),
                format!("declared output '{}' is never produced", output),
            ));
        }
    }
    Ok(())
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &str, context: &str) -> Result<&'a str> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(OrchestratorError::schema(
            context,
            format!("'{}' must be a string", field),
        )),
        None => Err(OrchestratorError::schema(
            context,
            format!("missing field '{}'", field),
        )),
    }
}

fn optional_str<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
    context: &str,
) -> Result<Option<&'a str>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(OrchestratorError::schema(
            context,
            format!("'{}' must be a string", field),
        )),
    }
}

fn string_list(obj: &Map<String, Value>, field: &str, context: &str) -> Result<Vec<String>> {
    let items = match obj.get(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(OrchestratorError::schema(
                context,
                format!("'{}' must be an array of strings", field),
            ))
        }
    };
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                OrchestratorError::schema(context, format!("'{}' must be an array of strings", field))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CapabilityOutput;
    use serde_json::json;

    fn definition() -> Value {
        json!({
            "id": "portfolio_overview",
            "version": "1.0.0",
            "inputs": ["portfolio_id"],
            "steps": [
                {
                    "step_id": "positions",
                    "capability": "ledger.positions",
                    "inputs": {"portfolio_id": "{{portfolio_id}}", "asof": "{{ctx.asof}}"},
                    "output_key": "positions",
                    "required": true
                },
                {
                    "step_id": "prices",
                    "capability": "pricing.quote",
                    "inputs": {"tickers": "{{state.positions.symbols}}"},
                    "output_key": "prices",
                    "timeout_ms": 500
                }
            ],
            "outputs": ["positions", "prices"]
        })
    }

    fn with(mut def: Value, pointer: &str, value: Value) -> Value {
        *def.pointer_mut(pointer).unwrap() = value;
        def
    }

    fn kind(def: &Value) -> pattern_core::ErrorKind {
        PatternLoader::new().validate(def).unwrap_err().kind()
    }

    #[test]
    fn test_valid_definition() {
        let pattern = PatternLoader::new().validate(&definition()).unwrap();
        assert_eq!(pattern.id, "portfolio_overview");
        assert_eq!(pattern.steps.len(), 2);
        assert!(pattern.steps[0].required);
        assert!(!pattern.steps[1].required);
        assert_eq!(pattern.steps[1].timeout_ms, Some(500));
        assert_eq!(pattern.outputs, vec!["positions", "prices"]);
    }

    #[test]
    fn test_steps_keep_declaration_order() {
        let pattern = PatternLoader::new().validate(&definition()).unwrap();
        let ids: Vec<_> = pattern.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["positions", "prices"]);
    }

    #[test]
    fn test_schema_errors() {
        use pattern_core::ErrorKind::Schema;

        let mut no_id = definition();
        no_id.as_object_mut().unwrap().remove("id");
        assert_eq!(kind(&no_id), Schema);

        assert_eq!(kind(&with(definition(), "/version", json!(1))), Schema);
        assert_eq!(kind(&with(definition(), "/steps", json!([]))), Schema);
        assert_eq!(kind(&with(definition(), "/steps/0/required", json!("yes"))), Schema);
        assert_eq!(kind(&with(definition(), "/steps/1/timeout_ms", json!(-3))), Schema);
        assert_eq!(kind(&with(definition(), "/steps/1/step_id", json!("positions"))), Schema);
        assert_eq!(kind(&with(definition(), "/steps/1/output_key", json!("positions"))), Schema);
        assert_eq!(kind(&with(definition(), "/steps/1/output_key", json!("state"))), Schema);
        assert_eq!(kind(&with(definition(), "/steps/1/capability", json!("nodot"))), Schema);
        assert_eq!(kind(&with(definition(), "/inputs", json!(["ctx"]))), Schema);
        assert_eq!(kind(&json!([1, 2])), Schema);
    }

    #[test]
    fn test_forward_reference_is_dependency_error() {
        let def = with(
            definition(),
            "/steps/0/inputs/portfolio_id",
            json!("{{prices.total}}"),
        );
        let err = PatternLoader::new().validate(&def).unwrap_err();
        assert!(matches!(err, OrchestratorError::Dependency { .. }));
    }

    #[test]
    fn test_undeclared_input_is_dependency_error() {
        let def = with(definition(), "/inputs", json!([]));
        assert_eq!(kind(&def), pattern_core::ErrorKind::Dependency);
    }

    #[test]
    fn test_unproduced_output_is_dependency_error() {
        let def = with(definition(), "/outputs", json!(["positions", "risk"]));
        assert_eq!(kind(&def), pattern_core::ErrorKind::Dependency);
    }

    #[test]
    fn test_declared_outputs_alias_accepted() {
        let mut def = definition();
        let outputs = def.as_object_mut().unwrap().remove("outputs").unwrap();
        def["declared_outputs"] = outputs;
        let pattern = PatternLoader::new().validate(&def).unwrap();
        assert_eq!(pattern.outputs.len(), 2);
    }

    #[test]
    fn test_nested_step_requires_pattern_id() {
        let def = json!({
            "id": "outer",
            "version": "1",
            "steps": [{"step_id": "n", "capability": "execute_pattern", "inputs": {}, "output_key": "n"}]
        });
        assert_eq!(kind(&def), pattern_core::ErrorKind::Schema);

        let def = with(def, "/steps/0/inputs", json!({"pattern_id": "inner", "inputs": {"x": 1}}));
        let pattern = PatternLoader::new().validate(&def).unwrap();
        assert!(pattern.is_composite());
    }

    #[test]
    fn test_unknown_capability_is_advisory() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register_fn("ledger.positions", Vec::new(), |_call| async {
                Ok(CapabilityOutput::real(json!([])))
            })
            .unwrap();
        let loader = PatternLoader::with_registry(Arc::new(registry));

        let (pattern, advisories) = loader.validate_with_advisories(&definition()).unwrap();
        assert_eq!(pattern.steps.len(), 2);
        assert_eq!(
            advisories,
            vec![Advisory::UnknownCapability {
                step_id: "prices".to_string(),
                capability: "pricing.quote".to_string(),
            }]
        );
    }

    #[test]
    fn test_validation_is_idempotent() {
        let loader = PatternLoader::new();
        let a = serde_json::to_vec(&loader.validate(&definition()).unwrap()).unwrap();
        let b = serde_json::to_vec(&loader.validate(&definition()).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_malformed_json_is_schema_error() {
        let err = PatternLoader::new().parse_str("{ nope").unwrap_err();
        assert_eq!(err.kind(), pattern_core::ErrorKind::Schema);
    }
}
