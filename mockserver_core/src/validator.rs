//! Rule validator (`§4.2`).
//!
//! A single pure entry point, applied before any repository write. Rejects
//! with [`Error::InvalidRule`] naming the offending field; never performs
//! I/O.

use crate::model::{AssertionKind, Rule, Strategy, Variable, VariableKind};
use crate::Error;
use std::collections::HashSet;

/// Check every invariant in `§3` against `rule`. Returns the first
/// violation found.
pub fn validate(rule: &Rule) -> Result<(), Error> {
    if !rule.path.starts_with('/') {
        return Err(Error::invalid_rule(format!(
            "path must begin with '/': {}",
            rule.path
        )));
    }

    if rule.responses.is_empty() {
        return Err(Error::invalid_rule("responses must not be empty"));
    }

    for response in &rule.responses {
        if !(200..=599).contains(&response.http_status) {
            return Err(Error::invalid_rule(format!(
                "response http_status {} is out of range [200, 599]",
                response.http_status
            )));
        }
    }

    let mut seen_names = HashSet::new();
    for variable in &rule.variables {
        if !seen_names.insert(variable.name.as_str()) {
            return Err(Error::invalid_rule(format!(
                "duplicate variable name: {}",
                variable.name
            )));
        }
        validate_variable(variable)?;
    }

    if rule.strategy == Strategy::Scene
        && !rule
            .variables
            .iter()
            .any(|v| v.name == "scene")
    {
        return Err(Error::invalid_rule(
            "strategy 'scene' requires a variable named 'scene'",
        ));
    }

    Ok(())
}

fn validate_variable(variable: &Variable) -> Result<(), Error> {
    let key = variable.kind.key();
    match &variable.kind {
        VariableKind::Body { .. }
        | VariableKind::Header { .. }
        | VariableKind::Query { .. }
        | VariableKind::Path { .. } => {
            if key.map_or(true, |k| k.is_empty()) {
                return Err(Error::invalid_rule(format!(
                    "variable '{}' of type '{}' requires a non-empty key",
                    variable.name,
                    variable.kind.type_name(),
                )));
            }
        }
        VariableKind::Random | VariableKind::Hash => {}
    }

    if let VariableKind::Body { key } = &variable.kind {
        if jsonpath_lib::Selector::new().str_path(key).is_err() {
            return Err(Error::invalid_rule(format!(
                "variable '{}' has an invalid JSONPath key: {}",
                variable.name, key,
            )));
        }
    }

    for assertion in &variable.assertions {
        match &assertion.kind {
            AssertionKind::Equals { value } if value.is_empty() => {
                return Err(Error::invalid_rule(format!(
                    "variable '{}': assertion 'equals' requires a non-empty value",
                    variable.name,
                )));
            }
            AssertionKind::Range { min, max } if !(min < max) => {
                return Err(Error::invalid_rule(format!(
                    "variable '{}': assertion 'range' requires min < max",
                    variable.name,
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Method, Response, RuleStatus};

    fn base_rule() -> Rule {
        Rule {
            key: None,
            group: String::new(),
            name: "r".into(),
            path: "/ping".into(),
            strategy: Strategy::Normal,
            method: Method::Get,
            status: RuleStatus::Enabled,
            responses: vec![Response {
                body: "pong".into(),
                content_type: "text/plain".into(),
                http_status: 200,
                delay: 0,
                scene: None,
            }],
            variables: vec![],
            next_response_index: 0,
        }
    }

    #[test]
    fn rejects_path_without_leading_slash() {
        let mut rule = base_rule();
        rule.path = "ping".into();
        assert!(matches!(validate(&rule), Err(Error::InvalidRule(_))));
    }

    #[test]
    fn rejects_empty_responses() {
        let mut rule = base_rule();
        rule.responses.clear();
        assert!(validate(&rule).is_err());
    }

    #[test]
    fn rejects_http_status_out_of_range() {
        let mut rule = base_rule();
        rule.responses[0].http_status = 700;
        assert!(validate(&rule).is_err());
    }

    #[test]
    fn scene_strategy_requires_scene_variable() {
        let mut rule = base_rule();
        rule.strategy = Strategy::Scene;
        assert!(validate(&rule).is_err());

        rule.variables.push(Variable {
            kind: VariableKind::Body {
                key: "$.type".into(),
            },
            name: "scene".into(),
            assertions: vec![],
        });
        assert!(validate(&rule).is_ok());
    }

    #[test]
    fn rejects_duplicate_variable_names() {
        let mut rule = base_rule();
        rule.variables.push(Variable {
            kind: VariableKind::Header { key: "X-A".into() },
            name: "dup".into(),
            assertions: vec![],
        });
        rule.variables.push(Variable {
            kind: VariableKind::Header { key: "X-B".into() },
            name: "dup".into(),
            assertions: vec![],
        });
        assert!(validate(&rule).is_err());
    }
}
