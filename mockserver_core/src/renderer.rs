//! Template renderer (`§4.8`).
//!
//! Substitutes `{name}` placeholders in a response body with resolved
//! variable values. Replacement is a single left-to-right scan over the
//! original body: placeholders do not nest, are not escaped, and a value
//! containing another variable's `{name}` is never re-expanded, because the
//! scan never revisits text it has already emitted.

use crate::extractor::ResolvedVariable;

/// Render `body`, replacing every `{name}` occurrence for each variable in
/// `resolved`. Ties at the same position are resolved in declaration
/// order, though distinct variable names never overlap in practice.
pub fn render(body: &str, resolved: &[ResolvedVariable]) -> String {
    let placeholders: Vec<(String, &str)> = resolved
        .iter()
        .map(|v| (format!("{{{}}}", v.name), v.value.as_str()))
        .collect();

    let mut rendered = String::with_capacity(body.len());
    let mut rest = body;
    'outer: while !rest.is_empty() {
        for (placeholder, value) in &placeholders {
            if let Some(tail) = rest.strip_prefix(placeholder.as_str()) {
                rendered.push_str(value);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.char_indices();
        chars.next();
        let next = chars.next().map(|(i, _)| i).unwrap_or(rest.len());
        rendered.push_str(&rest[..next]);
        rest = &rest[next..];
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, value: &str) -> ResolvedVariable {
        ResolvedVariable {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn substitutes_all_occurrences() {
        let body = "{user} says hi to {user}";
        let rendered = render(body, &[var("user", "alice")]);
        assert_eq!(rendered, "alice says hi to alice");
    }

    #[test]
    fn idempotent_with_no_placeholders() {
        let body = "plain body, no braces here";
        assert_eq!(render(body, &[var("x", "y")]), body);
    }

    #[test]
    fn does_not_re_expand_a_value_containing_another_placeholder() {
        // §4.8: a variable value containing another variable's `{name}`
        // must not be re-expanded. "a"'s value is the literal text "{b}",
        // which must survive untouched even though "b" is also declared.
        let body = "{a}{b}";
        let rendered = render(body, &[var("a", "{b}"), var("b", "REAL")]);
        assert_eq!(rendered, "{b}REAL");
    }

    #[test]
    fn plain_json_number_interpolation() {
        let rendered = render(r#"{"user":{uid}}"#, &[var("uid", "42")]);
        assert_eq!(rendered, r#"{"user":42}"#);
    }

    #[test]
    fn unicode_body_is_handled_safely() {
        let rendered = render("héllo {name}", &[var("name", "wörld")]);
        assert_eq!(rendered, "héllo wörld");
    }
}
