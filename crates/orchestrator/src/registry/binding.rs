//! Argument binding against a handler's declared parameters.

use serde_json::{Map, Value};

use super::handler::Parameter;
use crate::error::{OrchestratorError, Result};

/// Interchangeable parameter names, matched in both directions.
const PARAMETER_ALIASES: &[(&str, &str)] = &[
    ("tickers", "symbols"),
    ("portfolio_id", "portfolio"),
    ("asof", "as_of"),
];

/// Names `name` may also appear under in the binding context.
pub fn aliases_for(name: &str) -> impl Iterator<Item = &'static str> + '_ {
    PARAMETER_ALIASES.iter().filter_map(move |(a, b)| {
        if *a == name {
            Some(*b)
        } else if *b == name {
            Some(*a)
        } else {
            None
        }
    })
}

/// Build the argument map for a handler.
///
/// Each declared parameter takes, in order: the context value of the same
/// name, the value of an alias, or its declared default. Context keys no
/// parameter asks for are dropped.
pub fn bind_parameters(
    capability: &str,
    parameters: &[Parameter],
    context: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut bound = Map::new();
    for param in parameters {
        let value = context
            .get(&param.name)
            .or_else(|| aliases_for(&param.name).find_map(|alias| context.get(alias)))
            .or(param.default.as_ref())
            .cloned()
            .ok_or_else(|| OrchestratorError::binding(capability, &param.name))?;
        bound.insert(param.name.clone(), value);
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_exact_match_wins_over_alias() {
        let params = vec![Parameter::required("tickers")];
        let ctx = context(&[("tickers", json!(["AAPL"])), ("symbols", json!(["MSFT"]))]);
        let bound = bind_parameters("pricing.quote", &params, &ctx).unwrap();
        assert_eq!(bound["tickers"], json!(["AAPL"]));
    }

    #[test]
    fn test_alias_both_directions() {
        let ctx = context(&[("symbols", json!(["AAPL"])), ("tickers", json!(["TSLA"]))]);
        let bound = bind_parameters("a.b", &[Parameter::required("symbols")], &ctx).unwrap();
        assert_eq!(bound["symbols"], json!(["AAPL"]));

        let ctx = context(&[("symbols", json!(["AAPL"]))]);
        let bound = bind_parameters("a.b", &[Parameter::required("tickers")], &ctx).unwrap();
        assert_eq!(bound["tickers"], json!(["AAPL"]));

        let ctx = context(&[("portfolio", json!("P-1"))]);
        let bound = bind_parameters("a.b", &[Parameter::required("portfolio_id")], &ctx).unwrap();
        assert_eq!(bound["portfolio_id"], json!("P-1"));
    }

    #[test]
    fn test_default_used_when_unmatched() {
        let params = vec![Parameter::optional("lookback_days", json!(252))];
        let bound = bind_parameters("risk.var", &params, &Map::new()).unwrap();
        assert_eq!(bound["lookback_days"], json!(252));
    }

    #[test]
    fn test_missing_parameter_is_binding_error() {
        let params = vec![Parameter::required("tickers")];
        let err = bind_parameters("pricing.quote", &params, &Map::new()).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Binding { ref parameter, .. } if parameter == "tickers"
        ));
    }

    #[test]
    fn test_undeclared_keys_are_dropped() {
        let ctx = context(&[("a", json!(1)), ("b", json!(2))]);
        let bound = bind_parameters("x.y", &[Parameter::required("a")], &ctx).unwrap();
        assert_eq!(bound.len(), 1);
        assert!(bound.get("b").is_none());
    }

    #[test]
    fn test_aliases_for_unknown_name_is_empty() {
        assert_eq!(aliases_for("weights").count(), 0);
        assert_eq!(aliases_for("as_of").collect::<Vec<_>>(), vec!["asof"]);
    }
}
