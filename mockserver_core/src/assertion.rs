//! Assertion engine (`§4.6`).
//!
//! Applies every assertion attached to a variable and classifies the
//! overall result as fatal or soft. The response selector and renderer see
//! the extracted values regardless of a soft failure.

use crate::extractor::ResolvedVariable;
use crate::model::{AssertionKind, Variable};

/// The outcome of running every assertion declared on the rule's variables.
#[derive(Clone, Debug, Default)]
pub struct AssertionOutcome {
    /// Whether at least one failing assertion had `fail_on_error = true`.
    pub fatal: bool,
    /// Every failure message, fatal or soft, in evaluation order.
    pub messages: Vec<String>,
}

/// Evaluate every assertion on every declared variable against its
/// resolved value.
pub fn check(
    variables: &[Variable],
    resolved: &[ResolvedVariable],
) -> AssertionOutcome {
    let mut outcome = AssertionOutcome::default();
    for variable in variables {
        let value = resolved
            .iter()
            .find(|r| r.name == variable.name)
            .map(|r| r.value.as_str())
            .unwrap_or("");
        for assertion in &variable.assertions {
            if let Some(message) = evaluate(&assertion.kind, &variable.name, value) {
                outcome.fatal = outcome.fatal || assertion.fail_on_error;
                outcome.messages.push(message);
            }
        }
    }
    outcome
}

/// Evaluate a single assertion; `None` means it passed.
fn evaluate(kind: &AssertionKind, name: &str, value: &str) -> Option<String> {
    match kind {
        AssertionKind::Present => {
            if value.trim().is_empty() {
                Some(format!("variable '{}' is not present in request", name))
            } else {
                None
            }
        }
        AssertionKind::String => {
            if is_number(value.trim()) {
                Some(format!("variable '{}' is not a valid string", name))
            } else {
                None
            }
        }
        AssertionKind::Number => {
            if !is_number(value.trim_matches('"')) {
                Some(format!("variable '{}' is not a valid number", name))
            } else {
                None
            }
        }
        AssertionKind::Equals { value: expected } => {
            if value.trim() != expected.trim() {
                Some(format!(
                    "variable '{}' value is '{}' but expected was '{}'",
                    name,
                    value.trim(),
                    expected.trim(),
                ))
            } else {
                None
            }
        }
        AssertionKind::Range { min, max } => match value.trim().parse::<f64>() {
            Ok(v) if v >= *min && v <= *max => None,
            Ok(_) => Some(format!(
                "variable '{}' is not in a valid number range",
                name
            )),
            Err(_) => Some(format!("variable '{}' is not a valid number", name)),
        },
    }
}

fn is_number(value: &str) -> bool {
    value.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Assertion, VariableKind};

    fn resolved(name: &str, value: &str) -> Vec<ResolvedVariable> {
        vec![ResolvedVariable {
            name: name.to_string(),
            value: value.to_string(),
        }]
    }

    fn variable(name: &str, assertion: AssertionKind, fail_on_error: bool) -> Vec<Variable> {
        vec![Variable {
            kind: VariableKind::Header { key: "X".into() },
            name: name.to_string(),
            assertions: vec![Assertion {
                kind: assertion,
                fail_on_error,
            }],
        }]
    }

    #[test]
    fn range_failure_message_matches_scenario_4() {
        let vars = variable("uid", AssertionKind::Range { min: 0.0, max: 100.0 }, true);
        let outcome = check(&vars, &resolved("uid", "500"));
        assert!(outcome.fatal);
        assert_eq!(
            outcome.messages,
            vec!["variable 'uid' is not in a valid number range"]
        );
    }

    #[test]
    fn soft_failure_is_not_fatal() {
        let vars = variable("uid", AssertionKind::Present, false);
        let outcome = check(&vars, &resolved("uid", ""));
        assert!(!outcome.fatal);
        assert_eq!(outcome.messages.len(), 1);
    }

    #[test]
    fn number_assertion_strips_quotes() {
        let vars = variable("n", AssertionKind::Number, true);
        let outcome = check(&vars, &resolved("n", "\"42\""));
        assert!(!outcome.fatal);
        assert!(outcome.messages.is_empty());
    }

    #[test]
    fn string_assertion_rejects_numbers() {
        let vars = variable("s", AssertionKind::String, true);
        let outcome = check(&vars, &resolved("s", "42"));
        assert!(outcome.fatal);
    }

    #[test]
    fn equals_trims_both_sides() {
        let vars = variable(
            "e",
            AssertionKind::Equals {
                value: " expected ".into(),
            },
            true,
        );
        let outcome = check(&vars, &resolved("e", "expected"));
        assert!(outcome.messages.is_empty());
    }
}
