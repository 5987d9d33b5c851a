//! Response selector (`§4.7`).
//!
//! Chooses one response from the matched rule according to its strategy.
//! Sequential selection persists the advanced cursor through the
//! repository; the others are pure.

use crate::extractor::ResolvedVariable;
use crate::model::{Response, Rule, Strategy};
use crate::repository::RuleStore;
use crate::Error;
use rand::Rng;

/// Select the response `rule` should answer with, given its strategy and
/// the request's resolved variables. For `sequential`, also advances and
/// persists the cursor via `store`.
pub fn select(
    rule: &Rule,
    resolved: &[ResolvedVariable],
    store: &RuleStore,
) -> Result<Response, Error> {
    match rule.strategy {
        Strategy::Normal => rule
            .responses
            .first()
            .cloned()
            .ok_or_else(|| Error::invalid_rule("rule has no responses")),
        Strategy::Random => {
            let index = rand::thread_rng().gen_range(0..rule.responses.len());
            Ok(rule.responses[index].clone())
        }
        Strategy::Sequential => select_sequential(rule, store),
        Strategy::Scene => select_scene(rule, resolved),
    }
}

fn select_sequential(rule: &Rule, store: &RuleStore) -> Result<Response, Error> {
    let key = rule
        .key
        .as_deref()
        .ok_or_else(|| Error::invalid_rule("rule has no key"))?;
    let len = rule.responses.len();
    // `advance_cursor` is the single, lock-serialized source of truth for
    // the cursor (repository.rs) -- under concurrent dispatch, many callers
    // may hold the same stale `rule.next_response_index` snapshot, so the
    // index actually served must come from its returned value, not from
    // `rule` itself, or concurrent requests collide on one response.
    let new_index = store.advance_cursor(key, len)?;
    let index = (new_index + len - 1) % len;
    Ok(rule.responses[index].clone())
}

fn select_scene(
    rule: &Rule,
    resolved: &[ResolvedVariable],
) -> Result<Response, Error> {
    let scene_value = resolved
        .iter()
        .find(|v| v.name == "scene")
        .map(|v| v.value.as_str())
        .ok_or_else(|| {
            Error::invalid_rule("strategy 'scene' requires a variable named 'scene'")
        })?;

    // Strip surrounding double quotes only when *both* endpoints are `"`,
    // normalising JSON string output from body extraction -- this
    // asymmetry (not stripping when only one side has a quote) is
    // intentional, see §9.
    let scene_value = {
        let bytes = scene_value.as_bytes();
        if bytes.len() >= 2
            && bytes.first() == Some(&b'"')
            && bytes.last() == Some(&b'"')
        {
            &scene_value[1..scene_value.len() - 1]
        } else {
            scene_value
        }
    };

    if let Some(response) = rule.responses.iter().find(|r| {
        r.scene.as_deref().map_or(false, |s| s == scene_value)
    }) {
        return Ok(response.clone());
    }

    if let Some(response) = rule.responses.iter().find(|r| {
        r.scene
            .as_deref()
            .map_or(false, |s| s.eq_ignore_ascii_case("default"))
    }) {
        return Ok(response.clone());
    }

    Err(Error::invalid_rule(format!(
        "no response with scene '{}' and no default scene",
        scene_value
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Method, RuleStatus};
    use std::sync::{Arc, Mutex};

    fn rule_with_responses(
        strategy: Strategy,
        responses: Vec<Response>,
    ) -> Rule {
        Rule {
            key: Some("k".into()),
            group: String::new(),
            name: "r".into(),
            path: "/p".into(),
            strategy,
            method: Method::Get,
            status: RuleStatus::Enabled,
            responses,
            variables: vec![],
            next_response_index: 0,
        }
    }

    fn response(body: &str, scene: Option<&str>) -> Response {
        Response {
            body: body.into(),
            content_type: "text/plain".into(),
            http_status: 200,
            delay: 0,
            scene: scene.map(String::from),
        }
    }

    struct NullRepo;
    impl crate::repository::RuleRepository for NullRepo {
        fn create(&self, rule: Rule) -> Result<Rule, Error> { Ok(rule) }
        fn update(&self, rule: Rule) -> Result<Rule, Error> { Ok(rule) }
        fn get(&self, _key: &str) -> Result<Rule, Error> {
            Err(Error::rule_not_found("n/a"))
        }
        fn delete(&self, _key: &str) -> Result<(), Error> { Ok(()) }
        fn search(
            &self,
            _filter: &crate::model::RuleFilter,
            _offset: i32,
            _limit: i32,
        ) -> Result<crate::model::RulePage, Error> {
            unimplemented!()
        }
        fn match_by_method_path(
            &self,
            _method: &str,
            _path: &str,
        ) -> Result<Rule, Error> {
            unimplemented!()
        }
        fn advance_cursor(
            &self,
            _key: &str,
            response_count: usize,
        ) -> Result<usize, Error> {
            Ok((CURSOR.lock().unwrap().wrapping_add(1)) % response_count)
        }
    }

    static CURSOR: Mutex<usize> = Mutex::new(0);

    fn store() -> RuleStore {
        RuleStore::new(Arc::new(NullRepo))
    }

    #[test]
    fn normal_picks_first() {
        let rule = rule_with_responses(
            Strategy::Normal,
            vec![response("a", None), response("b", None)],
        );
        let picked = select(&rule, &[], &store()).unwrap();
        assert_eq!(picked.body, "a");
    }

    #[test]
    fn scene_picks_matching_and_falls_back_to_default() {
        let rule = rule_with_responses(
            Strategy::Scene,
            vec![
                response("approved-body", Some("approved")),
                response("rejected-body", Some("rejected")),
                response("default-body", Some("default")),
            ],
        );
        let resolved = vec![ResolvedVariable {
            name: "scene".into(),
            value: "\"rejected\"".into(),
        }];
        assert_eq!(select(&rule, &resolved, &store()).unwrap().body, "rejected-body");

        let resolved = vec![ResolvedVariable {
            name: "scene".into(),
            value: "\"other\"".into(),
        }];
        assert_eq!(select(&rule, &resolved, &store()).unwrap().body, "default-body");
    }

    #[test]
    fn scene_only_strips_quotes_when_both_sides_present() {
        let rule = rule_with_responses(
            Strategy::Scene,
            vec![response("match", Some("\"half"))],
        );
        let resolved = vec![ResolvedVariable {
            name: "scene".into(),
            value: "\"half".into(),
        }];
        assert_eq!(select(&rule, &resolved, &store()).unwrap().body, "match");
    }
}
