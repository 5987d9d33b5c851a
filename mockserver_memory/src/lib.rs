//! In-memory / file rule repository (`§4.3 In-memory / file backend`).
//!
//! Holds the full rule list behind a single writer lock; the entire list is
//! flushed to a JSON file after every write, matching the persisted file
//! format in `§6`. If the file is absent at startup an empty one is
//! created; any other open error is fatal.
//!
//! Unknown `RuleFilter` keys can't reach this backend at all -- `search()`
//! takes the already-typed filter, so "unrecognised filter key" is a
//! concern for whatever builds a `RuleFilter` from admin query parameters,
//! not for this backend (see `DESIGN.md`).

use mockserver_core::model::{Rule, RuleFilter, RulePage, RuleStatus};
use mockserver_core::{Error, RuleRepository};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// One entry in the per-method pattern index: a compiled regex and every
/// rule key whose path template compiles to the exact same expression
/// (`§3 Pattern index`).
struct PatternEntry {
    regex: Regex,
    keys: Vec<String>,
}

struct Inner {
    rules: Vec<Rule>,
    /// method -> pattern entries, in first-insertion order, for
    /// deterministic tie-breaking (`§4.3 MatchByMethodPath semantics`).
    patterns: Vec<(String, Vec<PatternEntry>)>,
}

impl Inner {
    fn rebuild_patterns(&mut self) {
        self.patterns.clear();
        for rule in &self.rules {
            let method = rule.method.as_str().to_string();
            let expr = mockserver_core::pattern::compile(&rule.path);
            let key = rule.key.clone().unwrap_or_default();

            let method_entries = match self
                .patterns
                .iter_mut()
                .find(|(m, _)| *m == method)
            {
                Some((_, entries)) => entries,
                None => {
                    self.patterns.push((method.clone(), Vec::new()));
                    &mut self.patterns.last_mut().unwrap().1
                }
            };

            match method_entries
                .iter_mut()
                .find(|e| e.regex.as_str() == expr.regex.as_str())
            {
                Some(entry) => entry.keys.push(key),
                None => method_entries.push(PatternEntry {
                    regex: expr.regex,
                    keys: vec![key],
                }),
            }
        }
    }

    fn find_mut(&mut self, key: &str) -> Option<&mut Rule> {
        self.rules.iter_mut().find(|r| r.key.as_deref() == Some(key))
    }
}

/// A rule repository backed by an in-memory list, optionally persisted to
/// a JSON file after every write.
pub struct MemoryRuleRepository {
    inner: RwLock<Inner>,
    file_path: Option<PathBuf>,
}

impl MemoryRuleRepository {
    /// An empty, non-persisted repository (useful for tests).
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner {
                rules: Vec::new(),
                patterns: Vec::new(),
            }),
            file_path: None,
        }
    }

    /// Load rules from `file_path`, creating an empty file if it doesn't
    /// exist yet. Any other I/O error opening the file is fatal.
    pub fn open_file(file_path: impl AsRef<Path>) -> Result<Self, Error> {
        let file_path = file_path.as_ref().to_path_buf();

        let rules = match fs::read(&file_path) {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::backend(format!(
                    "error unmarshaling rule file {}: {}",
                    file_path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::write(&file_path, b"[]").map_err(|e| {
                    Error::backend(format!(
                        "error creating rule file {}: {}",
                        file_path.display(),
                        e
                    ))
                })?;
                Vec::new()
            }
            Err(e) => {
                return Err(Error::backend(format!(
                    "error reading rule file {}: {}",
                    file_path.display(),
                    e
                )))
            }
        };

        let mut inner = Inner {
            rules,
            patterns: Vec::new(),
        };
        inner.rebuild_patterns();

        Ok(Self {
            inner: RwLock::new(inner),
            file_path: Some(file_path),
        })
    }

    /// Overwrite the backing file (if any) with the current rule list.
    /// Writes to a temp file in the same directory and renames it into
    /// place so a crash mid-write never leaves a truncated file.
    fn flush(&self, inner: &Inner) -> Result<(), Error> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let content = serde_json::to_vec(&inner.rules)
            .map_err(|e| Error::backend(format!("error marshaling rules: {}", e)))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::backend(format!("error creating temp file: {}", e)))?;
        io::Write::write_all(&mut tmp, &content)
            .map_err(|e| Error::backend(format!("error writing rule file: {}", e)))?;
        tmp.persist(path)
            .map_err(|e| Error::backend(format!("error saving rule file: {}", e)))?;
        Ok(())
    }
}

impl RuleRepository for MemoryRuleRepository {
    fn create(&self, mut rule: Rule) -> Result<Rule, Error> {
        mockserver_core::validator::validate(&rule)?;
        rule.key = Some(uuid::Uuid::new_v4().to_string());

        let mut inner = self.inner.write().unwrap();
        inner.rules.push(rule.clone());
        inner.rebuild_patterns();
        self.flush(&inner)?;
        tracing::debug!(rule.key = ?rule.key, "created rule");
        Ok(rule)
    }

    fn update(&self, rule: Rule) -> Result<Rule, Error> {
        mockserver_core::validator::validate(&rule)?;
        let key = rule
            .key
            .clone()
            .ok_or_else(|| Error::invalid_rule("rule has no key to update"))?;

        let mut inner = self.inner.write().unwrap();
        let slot = inner
            .find_mut(&key)
            .ok_or_else(|| Error::rule_not_found(format!("no rule found with key: {}", key)))?;
        *slot = rule.clone();
        inner.rebuild_patterns();
        self.flush(&inner)?;
        Ok(rule)
    }

    fn get(&self, key: &str) -> Result<Rule, Error> {
        let inner = self.inner.read().unwrap();
        inner
            .rules
            .iter()
            .find(|r| r.key.as_deref() == Some(key))
            .cloned()
            .ok_or_else(|| Error::rule_not_found(format!("no rule found with key: {}", key)))
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        inner.rules.retain(|r| r.key.as_deref() != Some(key));
        inner.rebuild_patterns();
        self.flush(&inner)
    }

    fn search(
        &self,
        filter: &RuleFilter,
        offset: i32,
        limit: i32,
    ) -> Result<RulePage, Error> {
        let inner = self.inner.read().unwrap();
        let filtered: Vec<Rule> = inner
            .rules
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        let total = filtered.len() as i64;
        let start = (offset.max(0) as usize).min(filtered.len());
        let end = start.saturating_add(limit.max(0) as usize).min(filtered.len());

        Ok(RulePage {
            paging: mockserver_core::model::Paging {
                total,
                limit,
                offset,
            },
            results: filtered[start..end].to_vec(),
        })
    }

    fn match_by_method_path(&self, method: &str, path: &str) -> Result<Rule, Error> {
        let inner = self.inner.read().unwrap();
        let Some((_, entries)) = inner.patterns.iter().find(|(m, _)| m == method) else {
            return Err(Error::rule_not_found(format!(
                "no rule found for path: {} and method {}",
                path, method
            )));
        };

        for entry in entries {
            if !entry.regex.is_match(path) {
                continue;
            }
            // An orphaned key (no matching rule.key) is skipped rather than
            // treated as an error -- same tolerance the document-store
            // backend needs for its separate patterns document (§9).
            for key in &entry.keys {
                if let Some(rule) = inner
                    .rules
                    .iter()
                    .find(|r| r.key.as_deref() == Some(key.as_str()))
                {
                    if rule.status == RuleStatus::Enabled {
                        return Ok(rule.clone());
                    }
                }
            }
        }

        Err(Error::rule_not_found(format!(
            "no rule found for path: {} and method {}",
            path, method
        )))
    }

    fn advance_cursor(&self, key: &str, response_count: usize) -> Result<usize, Error> {
        let mut inner = self.inner.write().unwrap();
        let new_index = {
            let rule = inner
                .find_mut(key)
                .ok_or_else(|| Error::rule_not_found(format!("no rule found with key: {}", key)))?;
            rule.next_response_index = (rule.next_response_index + 1) % response_count.max(1);
            rule.next_response_index
        };
        self.flush(&inner)?;
        Ok(new_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockserver_core::model::{Method, Response, Strategy};

    fn rule(path: &str, method: Method) -> Rule {
        Rule {
            key: None,
            group: "g".into(),
            name: "n".into(),
            path: path.into(),
            strategy: Strategy::Normal,
            method,
            status: RuleStatus::Enabled,
            responses: vec![Response {
                body: "ok".into(),
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
    fn create_then_get_round_trips() {
        let repo = MemoryRuleRepository::in_memory();
        let created = repo.create(rule("/ping", Method::Get)).unwrap();
        let fetched = repo.get(created.key.as_ref().unwrap()).unwrap();
        assert_eq!(fetched.path, "/ping");
    }

    #[test]
    fn match_by_method_path_skips_disabled() {
        let repo = MemoryRuleRepository::in_memory();
        let mut disabled = rule("/ping", Method::Get);
        disabled.status = RuleStatus::Disabled;
        repo.create(disabled).unwrap();
        repo.create(rule("/ping", Method::Get)).unwrap();

        let found = repo.match_by_method_path("GET", "/ping").unwrap();
        assert_eq!(found.status, RuleStatus::Enabled);
    }

    #[test]
    fn disabled_only_rule_is_not_found() {
        let repo = MemoryRuleRepository::in_memory();
        let mut disabled = rule("/ping", Method::Get);
        disabled.status = RuleStatus::Disabled;
        repo.create(disabled).unwrap();

        assert!(matches!(
            repo.match_by_method_path("GET", "/ping"),
            Err(Error::RuleNotFound(_))
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let repo = MemoryRuleRepository::in_memory();
        let created = repo.create(rule("/ping", Method::Get)).unwrap();
        let key = created.key.unwrap();
        repo.delete(&key).unwrap();
        repo.delete(&key).unwrap();
    }

    #[test]
    fn file_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");

        {
            let repo = MemoryRuleRepository::open_file(&path).unwrap();
            repo.create(rule("/ping", Method::Get)).unwrap();
        }

        let repo = MemoryRuleRepository::open_file(&path).unwrap();
        let found = repo.match_by_method_path("GET", "/ping").unwrap();
        assert_eq!(found.path, "/ping");
    }

    #[test]
    fn sequential_cursor_advances_monotonically() {
        let repo = MemoryRuleRepository::in_memory();
        let mut r = rule("/seq", Method::Get);
        r.strategy = Strategy::Sequential;
        r.responses.push(Response {
            body: "second".into(),
            content_type: "text/plain".into(),
            http_status: 200,
            delay: 0,
            scene: None,
        });
        let created = repo.create(r).unwrap();
        let key = created.key.unwrap();

        assert_eq!(repo.advance_cursor(&key, 2).unwrap(), 1);
        assert_eq!(repo.advance_cursor(&key, 2).unwrap(), 0);
    }

    /// §8 scenario 5: 30 concurrent requests against a 3-response
    /// sequential rule must distribute exactly 10 outcomes per response.
    /// Exercises the full pipeline, not just `advance_cursor`, so it would
    /// have caught the selector reading the matched rule's own
    /// `next_response_index` snapshot instead of the value `advance_cursor`
    /// returns.
    #[test]
    fn sequential_under_concurrency_scenario_5() {
        let mut r = rule("/seq", Method::Get);
        r.strategy = Strategy::Sequential;
        r.responses = vec![
            Response {
                body: "a".into(),
                content_type: "text/plain".into(),
                http_status: 200,
                delay: 0,
                scene: None,
            },
            Response {
                body: "b".into(),
                content_type: "text/plain".into(),
                http_status: 200,
                delay: 0,
                scene: None,
            },
            Response {
                body: "c".into(),
                content_type: "text/plain".into(),
                http_status: 200,
                delay: 0,
                scene: None,
            },
        ];

        let repo = MemoryRuleRepository::in_memory();
        repo.create(r).unwrap();
        let store = mockserver_core::RuleStore::new(std::sync::Arc::new(repo));

        let handles: Vec<_> = (0..30)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let request = mockserver_core::MockRequest {
                        method: "GET".into(),
                        path: "/seq".into(),
                        ..Default::default()
                    };
                    mockserver_core::execute(
                        &store,
                        &request,
                        &mockserver_core::CancellationToken::new(),
                    )
                    .unwrap()
                    .body
                })
            })
            .collect();

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            *counts.entry(handle.join().unwrap()).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 3);
        for count in counts.values() {
            assert_eq!(*count, 10);
        }
    }
}
