//! Relational rule repository backed by PostgreSQL (`§4.3`).
//!
//! A rule is split across three tables -- `rules`, `rule_responses` and
//! `rule_variables` -- written inside one transaction so a half-written
//! rule is never observable. Assertions ride along as a JSON-encoded text
//! column on `rule_variables` rather than a fourth table: they're small,
//! opaque to SQL, and never queried on their own.
//!
//! Mirrors `PgConn`'s habit of driving every `tokio-postgres` call through
//! `futures::executor::block_on`, so the trait stays synchronous for
//! callers that never touch an async runtime.

use futures::executor::block_on;
use mockserver_core::model::{
    Assertion, Method, Response, Rule, RuleFilter, RulePage, RuleStatus, Strategy, Variable,
    VariableKind,
};
use mockserver_core::{Error, RuleRepository};
use std::sync::Mutex;
use tokio_postgres::Client;

/// The DDL for the three tables this repository owns. Callers run this
/// once against a fresh database; it is idempotent.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rules (
    ordinal             SERIAL PRIMARY KEY,
    key                 TEXT UNIQUE NOT NULL,
    grp                 TEXT NOT NULL DEFAULT '',
    name                TEXT NOT NULL,
    path                TEXT NOT NULL,
    strategy            TEXT NOT NULL,
    method              TEXT NOT NULL,
    status              TEXT NOT NULL,
    next_response_index INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS rule_responses (
    rule_key     TEXT NOT NULL REFERENCES rules(key) ON DELETE CASCADE,
    idx          INTEGER NOT NULL,
    body         TEXT NOT NULL,
    content_type TEXT NOT NULL,
    http_status  INTEGER NOT NULL,
    delay        BIGINT NOT NULL DEFAULT 0,
    scene        TEXT,
    PRIMARY KEY (rule_key, idx)
);
CREATE TABLE IF NOT EXISTS rule_variables (
    rule_key   TEXT NOT NULL REFERENCES rules(key) ON DELETE CASCADE,
    idx        INTEGER NOT NULL,
    kind       TEXT NOT NULL,
    var_key    TEXT NOT NULL DEFAULT '',
    name       TEXT NOT NULL,
    assertions TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (rule_key, idx)
);
";

/// A wrapping of `tokio_postgres::Client` that implements
/// `mockserver_core::RuleRepository`. The client sits behind a `Mutex`
/// because `Client::transaction` needs `&mut self` -- writes serialize on
/// one connection rather than each borrowing it independently.
pub struct PgRuleRepository(Mutex<Client>);

impl PgRuleRepository {
    pub fn new(client: Client) -> Self {
        Self(Mutex::new(client))
    }

    /// Create the repository's tables if they don't already exist.
    pub fn ensure_schema(&self) -> Result<(), Error> {
        let client = self.0.lock().unwrap();
        block_on(client.batch_execute(SCHEMA))
            .map_err(|e| Error::backend(format!("error creating schema: {}", e)))
    }

    fn strategy_name(strategy: Strategy) -> &'static str {
        match strategy {
            Strategy::Normal => "normal",
            Strategy::Sequential => "sequential",
            Strategy::Random => "random",
            Strategy::Scene => "scene",
        }
    }

    fn strategy_parse(raw: &str) -> Result<Strategy, Error> {
        match raw {
            "normal" => Ok(Strategy::Normal),
            "sequential" => Ok(Strategy::Sequential),
            "random" => Ok(Strategy::Random),
            "scene" => Ok(Strategy::Scene),
            other => Err(Error::backend(format!("unknown strategy in database row: {}", other))),
        }
    }

    fn status_name(status: RuleStatus) -> &'static str {
        match status {
            RuleStatus::Enabled => "enabled",
            RuleStatus::Disabled => "disabled",
        }
    }

    fn status_parse(raw: &str) -> Result<RuleStatus, Error> {
        match raw {
            "enabled" => Ok(RuleStatus::Enabled),
            "disabled" => Ok(RuleStatus::Disabled),
            other => Err(Error::backend(format!("unknown status in database row: {}", other))),
        }
    }

    fn variable_kind(kind: &VariableKind) -> (&'static str, &str) {
        match kind {
            VariableKind::Body { key } => ("body", key.as_str()),
            VariableKind::Header { key } => ("header", key.as_str()),
            VariableKind::Query { key } => ("query", key.as_str()),
            VariableKind::Path { key } => ("path", key.as_str()),
            VariableKind::Random => ("random", ""),
            VariableKind::Hash => ("hash", ""),
        }
    }

    fn parse_variable_kind(kind: &str, key: String) -> Result<VariableKind, Error> {
        match kind {
            "body" => Ok(VariableKind::Body { key }),
            "header" => Ok(VariableKind::Header { key }),
            "query" => Ok(VariableKind::Query { key }),
            "path" => Ok(VariableKind::Path { key }),
            "random" => Ok(VariableKind::Random),
            "hash" => Ok(VariableKind::Hash),
            other => Err(Error::backend(format!("unknown variable type in database row: {}", other))),
        }
    }

    /// Assemble a full `Rule` from its three rows, already fetched.
    fn assemble(
        key: String,
        grp: String,
        name: String,
        path: String,
        strategy: String,
        method: String,
        status: String,
        next_response_index: i32,
        response_rows: Vec<tokio_postgres::Row>,
        variable_rows: Vec<tokio_postgres::Row>,
    ) -> Result<Rule, Error> {
        let mut responses = Vec::with_capacity(response_rows.len());
        for row in response_rows {
            let http_status: i32 = row.get("http_status");
            let delay: i64 = row.get("delay");
            responses.push(Response {
                body: row.get("body"),
                content_type: row.get("content_type"),
                http_status: http_status as u16,
                delay: delay as u64,
                scene: row.get("scene"),
            });
        }

        let mut variables = Vec::with_capacity(variable_rows.len());
        for row in variable_rows {
            let kind: String = row.get("kind");
            let var_key: String = row.get("var_key");
            let assertions_json: String = row.get("assertions");
            let assertions: Vec<Assertion> = serde_json::from_str(&assertions_json)
                .map_err(|e| Error::backend(format!("corrupt assertions column: {}", e)))?;
            variables.push(Variable {
                kind: Self::parse_variable_kind(&kind, var_key)?,
                name: row.get("name"),
                assertions,
            });
        }

        Ok(Rule {
            key: Some(key),
            group: grp,
            name,
            path,
            strategy: Self::strategy_parse(&strategy)?,
            method: Method::parse(&method)
                .ok_or_else(|| Error::backend(format!("unknown method in database row: {}", method)))?,
            status: Self::status_parse(&status)?,
            responses,
            variables,
            next_response_index: next_response_index as usize,
        })
    }
}

impl RuleRepository for PgRuleRepository {
    fn create(&self, mut rule: Rule) -> Result<Rule, Error> {
        mockserver_core::validator::validate(&rule)?;
        rule.key = Some(uuid::Uuid::new_v4().to_string());

        let mut client = self.0.lock().unwrap();
        block_on(write_rule(&mut client, &rule, true))?;
        tracing::debug!(rule.key = ?rule.key, "created rule");
        Ok(rule)
    }

    fn update(&self, rule: Rule) -> Result<Rule, Error> {
        mockserver_core::validator::validate(&rule)?;
        if rule.key.is_none() {
            return Err(Error::invalid_rule("rule has no key to update"));
        }
        let mut client = self.0.lock().unwrap();
        block_on(write_rule(&mut client, &rule, false))?;
        Ok(rule)
    }

    fn get(&self, key: &str) -> Result<Rule, Error> {
        let client = self.0.lock().unwrap();
        block_on(async {
            let row = client
                .query_opt("SELECT * FROM rules WHERE key = $1", &[&key])
                .await
                .map_err(|e| Error::backend(e.to_string()))?
                .ok_or_else(|| Error::rule_not_found(format!("no rule found with key: {}", key)))?;

            let responses = client
                .query(
                    "SELECT * FROM rule_responses WHERE rule_key = $1 ORDER BY idx",
                    &[&key],
                )
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            let variables = client
                .query(
                    "SELECT * FROM rule_variables WHERE rule_key = $1 ORDER BY idx",
                    &[&key],
                )
                .await
                .map_err(|e| Error::backend(e.to_string()))?;

            Self::assemble(
                row.get("key"),
                row.get("grp"),
                row.get("name"),
                row.get("path"),
                row.get("strategy"),
                row.get("method"),
                row.get("status"),
                row.get("next_response_index"),
                responses,
                variables,
            )
        })
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        let client = self.0.lock().unwrap();
        block_on(async {
            client
                .execute("DELETE FROM rules WHERE key = $1", &[&key])
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            Ok(())
        })
    }

    fn search(&self, filter: &RuleFilter, offset: i32, limit: i32) -> Result<RulePage, Error> {
        let client = self.0.lock().unwrap();
        block_on(async {
            let (where_clause, patterns) = build_search_clause(filter);
            let params: Vec<&(dyn postgres_types::ToSql + Sync)> =
                patterns.iter().map(|p| p as &(dyn postgres_types::ToSql + Sync)).collect();

            let count_sql = format!("SELECT COUNT(*) FROM rules {}", where_clause);
            let total: i64 = client
                .query_one(&count_sql, &params[..])
                .await
                .map_err(|e| Error::backend(e.to_string()))?
                .get(0);

            let page_sql = format!(
                "SELECT * FROM rules {} ORDER BY ordinal OFFSET {} LIMIT {}",
                where_clause,
                offset.max(0),
                limit.max(0)
            );
            let rows = client
                .query(&page_sql, &params[..])
                .await
                .map_err(|e| Error::backend(e.to_string()))?;

            let mut results = Vec::with_capacity(rows.len());
            for row in rows {
                let key: String = row.get("key");
                let responses = client
                    .query(
                        "SELECT * FROM rule_responses WHERE rule_key = $1 ORDER BY idx",
                        &[&key],
                    )
                    .await
                    .map_err(|e| Error::backend(e.to_string()))?;
                let variables = client
                    .query(
                        "SELECT * FROM rule_variables WHERE rule_key = $1 ORDER BY idx",
                        &[&key],
                    )
                    .await
                    .map_err(|e| Error::backend(e.to_string()))?;
                results.push(Self::assemble(
                    row.get("key"),
                    row.get("grp"),
                    row.get("name"),
                    row.get("path"),
                    row.get("strategy"),
                    row.get("method"),
                    row.get("status"),
                    row.get("next_response_index"),
                    responses,
                    variables,
                )?);
            }

            Ok(RulePage {
                paging: mockserver_core::model::Paging {
                    total,
                    limit,
                    offset,
                },
                results,
            })
        })
    }

    fn match_by_method_path(&self, method: &str, path: &str) -> Result<Rule, Error> {
        let client = self.0.lock().unwrap();
        block_on(async {
            let rows = client
                .query(
                    "SELECT * FROM rules WHERE method = $1 AND status = 'enabled' ORDER BY ordinal",
                    &[&method],
                )
                .await
                .map_err(|e| Error::backend(e.to_string()))?;

            for row in rows {
                let row_path: String = row.get("path");
                let compiled = mockserver_core::pattern::compile(&row_path);
                if !compiled.regex.is_match(path) {
                    continue;
                }
                let key: String = row.get("key");
                let responses = client
                    .query(
                        "SELECT * FROM rule_responses WHERE rule_key = $1 ORDER BY idx",
                        &[&key],
                    )
                    .await
                    .map_err(|e| Error::backend(e.to_string()))?;
                let variables = client
                    .query(
                        "SELECT * FROM rule_variables WHERE rule_key = $1 ORDER BY idx",
                        &[&key],
                    )
                    .await
                    .map_err(|e| Error::backend(e.to_string()))?;
                return Self::assemble(
                    row.get("key"),
                    row.get("grp"),
                    row.get("name"),
                    row.get("path"),
                    row.get("strategy"),
                    row.get("method"),
                    row.get("status"),
                    row.get("next_response_index"),
                    responses,
                    variables,
                );
            }

            Err(Error::rule_not_found(format!(
                "no rule found for path: {} and method {}",
                path, method
            )))
        })
    }

    fn advance_cursor(&self, key: &str, response_count: usize) -> Result<usize, Error> {
        let client = self.0.lock().unwrap();
        block_on(async {
            let row = client
                .query_opt(
                    "UPDATE rules SET next_response_index = (next_response_index + 1) % $2 \
                     WHERE key = $1 RETURNING next_response_index",
                    &[&key, &(response_count.max(1) as i32)],
                )
                .await
                .map_err(|e| Error::backend(e.to_string()))?
                .ok_or_else(|| Error::rule_not_found(format!("no rule found with key: {}", key)))?;
            let next: i32 = row.get(0);
            Ok(next as usize)
        })
    }
}

/// Build the `WHERE ... ILIKE` clause `search` runs, and the `%pattern%`
/// values to bind to it in order -- split out from `search` so the clause
/// construction is testable without a live connection.
fn build_search_clause(filter: &RuleFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut patterns: Vec<String> = Vec::new();

    macro_rules! push_filter {
        ($column:literal, $field:expr) => {
            if let Some(v) = $field {
                patterns.push(format!("%{}%", v));
                clauses.push(format!("{} ILIKE ${}", $column, patterns.len()));
            }
        };
    }
    push_filter!("grp", &filter.group);
    push_filter!("name", &filter.name);
    push_filter!("key", &filter.key);
    push_filter!("status", &filter.status);
    push_filter!("method", &filter.method);
    push_filter!("strategy", &filter.strategy);
    push_filter!("path", &filter.path);

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_clause, patterns)
}

/// Write `rule` transactionally: replace the `rules` row (inserting it if
/// `is_new`) and fully replace its child rows. A failure at any step rolls
/// the whole write back, so a rule is never left with a stale response or
/// variable set.
async fn write_rule(client: &mut Client, rule: &Rule, is_new: bool) -> Result<(), Error> {
    let key = rule.key.as_deref().expect("key assigned by caller");
    let txn = client
        .transaction()
        .await
        .map_err(|e| Error::backend(e.to_string()))?;

    let strategy = PgRuleRepository::strategy_name(rule.strategy);
    let status = PgRuleRepository::status_name(rule.status);
    let next_index = rule.next_response_index as i32;

    if is_new {
        txn.execute(
            "INSERT INTO rules (key, grp, name, path, strategy, method, status, next_response_index) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &key,
                &rule.group,
                &rule.name,
                &rule.path,
                &strategy,
                &rule.method.as_str(),
                &status,
                &next_index,
            ],
        )
        .await
        .map_err(|e| Error::backend(e.to_string()))?;
    } else {
        let updated = txn
            .execute(
                "UPDATE rules SET grp = $2, name = $3, path = $4, strategy = $5, method = $6, \
                 status = $7 WHERE key = $1",
                &[
                    &key,
                    &rule.group,
                    &rule.name,
                    &rule.path,
                    &strategy,
                    &rule.method.as_str(),
                    &status,
                ],
            )
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        if updated == 0 {
            return Err(Error::rule_not_found(format!("no rule found with key: {}", key)));
        }
        txn.execute("DELETE FROM rule_responses WHERE rule_key = $1", &[&key])
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        txn.execute("DELETE FROM rule_variables WHERE rule_key = $1", &[&key])
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
    }

    for (idx, response) in rule.responses.iter().enumerate() {
        let idx = idx as i32;
        let http_status = response.http_status as i32;
        let delay = response.delay as i64;
        txn.execute(
            "INSERT INTO rule_responses (rule_key, idx, body, content_type, http_status, delay, scene) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &key,
                &idx,
                &response.body,
                &response.content_type,
                &http_status,
                &delay,
                &response.scene,
            ],
        )
        .await
        .map_err(|e| Error::backend(e.to_string()))?;
    }

    for (idx, variable) in rule.variables.iter().enumerate() {
        let idx = idx as i32;
        let (kind, var_key) = PgRuleRepository::variable_kind(&variable.kind);
        let assertions_json = serde_json::to_string(&variable.assertions)
            .map_err(|e| Error::backend(format!("error marshaling assertions: {}", e)))?;
        txn.execute(
            "INSERT INTO rule_variables (rule_key, idx, kind, var_key, name, assertions) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[&key, &idx, &kind, &var_key, &variable.name, &assertions_json],
        )
        .await
        .map_err(|e| Error::backend(e.to_string()))?;
    }

    txn.commit().await.map_err(|e| Error::backend(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_name_and_parse_round_trip() {
        for strategy in [
            Strategy::Normal,
            Strategy::Sequential,
            Strategy::Random,
            Strategy::Scene,
        ] {
            let name = PgRuleRepository::strategy_name(strategy);
            assert_eq!(PgRuleRepository::strategy_parse(name).unwrap(), strategy);
        }
    }

    #[test]
    fn strategy_parse_rejects_unknown_value() {
        assert!(matches!(
            PgRuleRepository::strategy_parse("bogus"),
            Err(Error::Backend(_))
        ));
    }

    #[test]
    fn status_name_and_parse_round_trip() {
        for status in [RuleStatus::Enabled, RuleStatus::Disabled] {
            let name = PgRuleRepository::status_name(status);
            assert_eq!(PgRuleRepository::status_parse(name).unwrap(), status);
        }
    }

    #[test]
    fn variable_kind_and_parse_round_trip() {
        let cases = [
            VariableKind::Body { key: "$.a".into() },
            VariableKind::Header { key: "X-Trace".into() },
            VariableKind::Query { key: "q".into() },
            VariableKind::Path { key: "id".into() },
            VariableKind::Random,
            VariableKind::Hash,
        ];
        for kind in cases {
            let (name, key) = PgRuleRepository::variable_kind(&kind);
            assert_eq!(
                PgRuleRepository::parse_variable_kind(name, key.to_string()).unwrap(),
                kind
            );
        }
    }

    #[test]
    fn parse_variable_kind_rejects_unknown_value() {
        assert!(matches!(
            PgRuleRepository::parse_variable_kind("bogus", String::new()),
            Err(Error::Backend(_))
        ));
    }

    #[test]
    fn search_clause_is_empty_with_no_filters() {
        let (clause, patterns) = build_search_clause(&RuleFilter::default());
        assert_eq!(clause, "");
        assert!(patterns.is_empty());
    }

    #[test]
    fn search_clause_combines_filters_with_and() {
        let filter = RuleFilter {
            method: Some("GET".into()),
            group: Some("billing".into()),
            ..Default::default()
        };
        let (clause, patterns) = build_search_clause(&filter);
        assert_eq!(clause, "WHERE grp ILIKE $1 AND method ILIKE $2");
        assert_eq!(patterns, vec!["%billing%", "%GET%"]);
    }
}
