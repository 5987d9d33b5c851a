//! Path-template compiler (`§4.1`).
//!
//! Converts `/a/{x}/b/{y}` into an anchored regex and the ordered list of
//! parameter names it captures. The compiler never rejects input -- it
//! simply produces a regex, however unlikely it is to ever match anything.

use regex::Regex;

/// A compiled path template: the anchored regex and the parameter names in
/// the order they occur in the template.
#[derive(Clone, Debug)]
pub struct CompiledPattern {
    pub regex: Regex,
    pub params: Vec<String>,
}

/// Compile `path` per `§4.1`: any `{name}/` becomes `[^/]+?/` (non-greedy,
/// does not cross a slash), any trailing `{name}` becomes `[^/]+`, and the
/// whole thing is anchored with `^...$`.
pub fn compile(path: &str) -> CompiledPattern {
    let params = param_names(path);

    let segment_with_slash = Regex::new(r"\{.+?\}/").unwrap();
    let expr = segment_with_slash.replace_all(path, "[^/]+?/");

    let trailing_segment = Regex::new(r"\{.+?\}").unwrap();
    let expr = trailing_segment.replace_all(&expr, "[^/]+");

    let anchored = format!("^{}$", expr);
    // The substitutions above only ever introduce valid regex metachars, so
    // this can't fail for any input `path` can produce.
    let regex = Regex::new(&anchored).unwrap();

    CompiledPattern { regex, params }
}

/// Parameter names in `{...}` tokens, left to right.
fn param_names(path: &str) -> Vec<String> {
    let token = Regex::new(r"\{(.+?)\}").unwrap();
    token
        .captures_iter(path)
        .map(|c| c[1].to_string())
        .collect()
}
