use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Capability name reserved for nested pattern invocation.
pub const EXECUTE_PATTERN: &str = "execute_pattern";

/// Root segment addressing the namespaced state root.
pub const STATE_ROOT: &str = "state";

/// Root segment addressing the execution context.
pub const CTX_ROOT: &str = "ctx";

/// Key under which the namespaced root is materialized in state snapshots.
pub const NAMESPACE_KEY: &str = "_ns";

/// Keys a pattern may not use as an input name or output key.
pub const RESERVED_KEYS: [&str; 3] = [STATE_ROOT, CTX_ROOT, NAMESPACE_KEY];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// A validated, immutable workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pattern {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Inputs the caller must supply (or a parent run must expose).
    #[serde(default)]
    pub inputs: Vec<String>,
    pub steps: Vec<Step>,
    /// Keys copied from state into `PatternResult::outputs`.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl Pattern {
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Distinct capability names used by this pattern, in first-use order.
    pub fn capabilities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !names.contains(&step.capability.as_str()) {
                names.push(step.capability.as_str());
            }
        }
        names
    }

    /// Whether any step recurses into another pattern.
    pub fn is_composite(&self) -> bool {
        self.steps.iter().any(Step::is_nested)
    }
}

/// One unit of work within a pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub step_id: String,
    pub capability: String,
    /// Parameter name to literal value or template expression.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    pub output_key: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Step {
    pub fn new(
        step_id: impl Into<String>,
        capability: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            capability: capability.into(),
            inputs: BTreeMap::new(),
            output_key: output_key.into(),
            required: false,
            timeout_ms: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn is_nested(&self) -> bool {
        self.capability == EXECUTE_PATTERN
    }

    /// Splits `category.operation`; `None` when the name has no dot.
    pub fn category_and_operation(&self) -> Option<(&str, &str)> {
        self.capability.split_once('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Pattern {
        Pattern {
            id: "portfolio_overview".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            inputs: vec!["portfolio_id".to_string()],
            steps: vec![
                Step::new("positions", "ledger.positions", "positions")
                    .with_input("portfolio_id", json!("{{portfolio_id}}"))
                    .required(),
                Step::new("prices", "pricing.apply", "valued")
                    .with_input("positions", json!("{{positions.items}}")),
                Step::new("again", "ledger.positions", "positions_again"),
            ],
            outputs: vec!["valued".to_string()],
        }
    }

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved_key("state"));
        assert!(is_reserved_key("ctx"));
        assert!(is_reserved_key("_ns"));
        assert!(!is_reserved_key("positions"));
    }

    #[test]
    fn test_pattern_capabilities_deduplicated() {
        let pattern = sample();
        assert_eq!(pattern.capabilities(), vec!["ledger.positions", "pricing.apply"]);
        assert!(!pattern.is_composite());
    }

    #[test]
    fn test_step_lookup_and_split() {
        let pattern = sample();
        let step = pattern.step("prices").unwrap();
        assert_eq!(step.category_and_operation(), Some(("pricing", "apply")));
        assert!(pattern.step("missing").is_none());
        assert!(Step::new("n", EXECUTE_PATTERN, "out").is_nested());
    }

    #[test]
    fn test_pattern_serde_defaults() {
        let json = r#"{"id":"p","version":"1","steps":[{"step_id":"a","capability":"x.y","output_key":"a"}]}"#;
        let pattern: Pattern = serde_json::from_str(json).unwrap();
        assert!(pattern.inputs.is_empty());
        assert!(pattern.outputs.is_empty());
        assert!(!pattern.steps[0].required);
        assert!(pattern.steps[0].inputs.is_empty());
    }
}
