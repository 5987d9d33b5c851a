//! Matcher (`§4.4`).
//!
//! A pure pipeline step: normalises the method, delegates to the
//! repository, and forwards `RuleNotFound` unchanged.

use crate::model::Rule;
use crate::repository::RuleStore;
use crate::Error;

/// Resolve `(method, path)` to the single enabled rule whose compiled
/// pattern matches, via `store`.
pub fn match_request(
    store: &RuleStore,
    method: &str,
    path: &str,
) -> Result<Rule, Error> {
    store.match_by_method_path(&method.to_ascii_uppercase(), path)
}
