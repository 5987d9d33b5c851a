//! Variable extractor (`§4.5`).
//!
//! Resolves every variable declared on the matched rule into a string
//! value, from the request or from freshly generated entropy.

use crate::model::{Rule, Variable, VariableKind};
use crate::random;
use crate::request::MockRequest;
use crate::Error;

/// A variable resolved to its string value, in the rule's declaration
/// order.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedVariable {
    pub name: String,
    pub value: String,
}

/// Resolve every variable `rule` declares against `request`.
pub fn extract(
    rule: &Rule,
    request: &MockRequest,
) -> Result<Vec<ResolvedVariable>, Error> {
    rule.variables
        .iter()
        .map(|variable| resolve_one(rule, variable, request))
        .collect()
}

fn resolve_one(
    rule: &Rule,
    variable: &Variable,
    request: &MockRequest,
) -> Result<ResolvedVariable, Error> {
    let value = match &variable.kind {
        VariableKind::Header { key } => {
            request.header(key).unwrap_or("").to_string()
        }
        VariableKind::Body { key } => resolve_body(variable, key, request)?,
        VariableKind::Query { key } => resolve_query(variable, key, request)?,
        VariableKind::Path { key } => resolve_path(variable, key, rule, request)?,
        VariableKind::Random => random::random_digits().to_string(),
        VariableKind::Hash => random::random_hash(),
    };
    Ok(ResolvedVariable {
        name: variable.name.clone(),
        value,
    })
}

fn resolve_body(
    variable: &Variable,
    key: &str,
    request: &MockRequest,
) -> Result<String, Error> {
    let json: serde_json::Value = serde_json::from_slice(&request.body)
        .map_err(|e| {
            Error::bad_request(format!(
                "variable '{}': request body is not valid JSON: {}",
                variable.name, e
            ))
        })?;

    let mut selector = jsonpath_lib::Selector::new();
    selector.str_path(key).map_err(|e| {
        Error::invalid_rule(format!(
            "variable '{}': invalid JSONPath '{}': {}",
            variable.name, key, e
        ))
    })?;
    let found = selector
        .value(&json)
        .select()
        .map_err(|e| {
            Error::invalid_rule(format!(
                "variable '{}': JSONPath '{}' evaluation failed: {}",
                variable.name, key, e
            ))
        })?;

    let value = found.first().copied().unwrap_or(&serde_json::Value::Null);
    Ok(serde_json::to_string(value).unwrap())
}

fn resolve_query(
    variable: &Variable,
    key: &str,
    request: &MockRequest,
) -> Result<String, Error> {
    url::form_urlencoded::parse(request.query.as_bytes())
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| {
            Error::invalid_rule(format!(
                "variable '{}': no query param found with key {}",
                variable.name, key
            ))
        })
}

fn resolve_path(
    variable: &Variable,
    key: &str,
    rule: &Rule,
    request: &MockRequest,
) -> Result<String, Error> {
    let template_segments: Vec<&str> = rule.path.split('/').collect();
    let concrete_segments: Vec<&str> = request.path.split('/').collect();

    for (template_segment, concrete_segment) in
        template_segments.iter().zip(concrete_segments.iter())
    {
        if let Some(name) = template_segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
        {
            if name == key {
                return Ok((*concrete_segment).to_string());
            }
        }
    }

    Err(Error::invalid_rule(format!(
        "variable '{}': no path parameter found with key {}",
        variable.name, key
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Method, Response, RuleStatus, Strategy};

    fn rule_with(path: &str, variables: Vec<Variable>) -> Rule {
        Rule {
            key: Some("k".into()),
            group: String::new(),
            name: "r".into(),
            path: path.into(),
            strategy: Strategy::Normal,
            method: Method::Get,
            status: RuleStatus::Enabled,
            responses: vec![Response {
                body: String::new(),
                content_type: "text/plain".into(),
                http_status: 200,
                delay: 0,
                scene: None,
            }],
            variables,
            next_response_index: 0,
        }
    }

    #[test]
    fn resolves_path_variable() {
        let rule = rule_with(
            "/users/{id}",
            vec![Variable {
                kind: VariableKind::Path { key: "id".into() },
                name: "uid".into(),
                assertions: vec![],
            }],
        );
        let request = MockRequest {
            method: "GET".into(),
            path: "/users/42".into(),
            ..Default::default()
        };
        let resolved = extract(&rule, &request).unwrap();
        assert_eq!(resolved[0].value, "42");
    }

    #[test]
    fn resolves_header_variable_case_insensitively() {
        let rule = rule_with(
            "/ping",
            vec![Variable {
                kind: VariableKind::Header {
                    key: "X-Trace".into(),
                },
                name: "tid".into(),
                assertions: vec![],
            }],
        );
        let request = MockRequest {
            headers: vec![("x-trace".into(), "abc".into())],
            ..Default::default()
        };
        let resolved = extract(&rule, &request).unwrap();
        assert_eq!(resolved[0].value, "abc");
    }

    #[test]
    fn resolves_body_variable_via_jsonpath() {
        let rule = rule_with(
            "/scene",
            vec![Variable {
                kind: VariableKind::Body {
                    key: "$.type".into(),
                },
                name: "scene".into(),
                assertions: vec![],
            }],
        );
        let request = MockRequest {
            body: br#"{"type":"rejected"}"#.to_vec(),
            ..Default::default()
        };
        let resolved = extract(&rule, &request).unwrap();
        assert_eq!(resolved[0].value, "\"rejected\"");
    }

    #[test]
    fn unparseable_body_is_bad_request() {
        let rule = rule_with(
            "/scene",
            vec![Variable {
                kind: VariableKind::Body {
                    key: "$.type".into(),
                },
                name: "scene".into(),
                assertions: vec![],
            }],
        );
        let request = MockRequest {
            body: b"not json".to_vec(),
            ..Default::default()
        };
        assert!(matches!(
            extract(&rule, &request),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn missing_query_param_is_fatal() {
        let rule = rule_with(
            "/ping",
            vec![Variable {
                kind: VariableKind::Query { key: "q".into() },
                name: "q".into(),
                assertions: vec![],
            }],
        );
        let request = MockRequest::default();
        assert!(matches!(
            extract(&rule, &request),
            Err(Error::InvalidRule(_))
        ));
    }
}
