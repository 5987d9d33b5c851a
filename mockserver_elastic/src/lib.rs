//! Document-store rule repository backed by Elasticsearch (`§4.3`).
//!
//! Each rule is a single document, keyed by its `key`, in one index. A
//! search translates `RuleFilter` into a `bool`/`wildcard` query instead of
//! a SQL `WHERE` clause, and `advance_cursor` uses a Painless update script
//! so the increment happens server-side without a read-modify-write race.
//! `MatchByMethodPath` mirrors the Go model's `ESRule`/`ESSearchResult`
//! wrapping: Elasticsearch can narrow candidates by `method` and `status`,
//! but the path-template match itself still runs through
//! `mockserver_core::pattern`, the same as every other backend.
//!
//! `ensure_index` declares `method`, `status` and the other filterable
//! fields as `keyword` explicitly -- left to dynamic mapping they'd come in
//! as analyzed `text`, which lowercases and tokenizes "GET" at index time
//! and silently breaks every exact `term` query this backend relies on.
//! The index is also pinned to a single shard so `_seq_no`, which
//! Elasticsearch assigns per shard in write order, can stand in for the
//! insertion-order tie-break `§4.3` requires without a separate ordinal
//! field on the document.

use elasticsearch::http::transport::Transport;
use elasticsearch::{
    DeleteParts, Elasticsearch, GetParts, IndexParts, IndicesCreateParts, IndicesExistsParts,
    SearchParts, UpdateParts,
};
use mockserver_core::model::{Rule, RuleFilter, RulePage, RuleStatus};
use mockserver_core::{Error, RuleRepository};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

/// A rule repository backed by an Elasticsearch index. Every call drives
/// its own `tokio` runtime synchronously, the same boundary shape the
/// relational and in-memory backends present to `RuleStore`.
pub struct ElasticRuleRepository {
    client: Elasticsearch,
    index: String,
    rt: Runtime,
}

impl ElasticRuleRepository {
    /// Connect to `url` (e.g. `http://localhost:9200`) and use `index` as
    /// the rule document store.
    pub fn new(url: &str, index: impl Into<String>) -> Result<Self, Error> {
        let transport = Transport::single_node(url)
            .map_err(|e| Error::backend(format!("error connecting to elasticsearch: {}", e)))?;
        let rt = Runtime::new()
            .map_err(|e| Error::backend(format!("error starting async runtime: {}", e)))?;
        Ok(Self {
            client: Elasticsearch::new(transport),
            index: index.into(),
            rt,
        })
    }

    fn rule_from_source(value: Value) -> Result<Rule, Error> {
        serde_json::from_value(value)
            .map_err(|e| Error::backend(format!("corrupt rule document: {}", e)))
    }

    /// Create the backing index with an explicit mapping, if it doesn't
    /// already exist. Idempotent, same contract as
    /// `PgRuleRepository::ensure_schema`.
    pub fn ensure_index(&self) -> Result<(), Error> {
        self.rt.block_on(async {
            let exists = self
                .client
                .indices()
                .exists(IndicesExistsParts::Index(&[&self.index]))
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            if exists.status_code().as_u16() == 200 {
                return Ok(());
            }

            self.client
                .indices()
                .create(IndicesCreateParts::Index(&self.index))
                .body(index_mapping())
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?
                .error_for_status_code()
                .map_err(|e| Error::backend(e.to_string()))?;
            Ok(())
        })
    }
}

/// Index settings and mapping `ensure_index` creates the backing index
/// with: a single shard (so `_seq_no` order matches write order) and the
/// filterable/matchable `Rule` fields mapped as `keyword`, not the
/// dynamically-mapped analyzed `text` they'd otherwise default to.
fn index_mapping() -> Value {
    json!({
        "settings": { "number_of_shards": 1 },
        "mappings": {
            "properties": {
                "key": { "type": "keyword" },
                "group": { "type": "keyword" },
                "name": { "type": "keyword" },
                "path": { "type": "keyword" },
                "strategy": { "type": "keyword" },
                "method": { "type": "keyword" },
                "status": { "type": "keyword" }
            }
        }
    })
}

/// Translate `filter` into a `bool`/`wildcard` query, or `match_all` if no
/// field is set (`§4.3 Search`).
fn build_search_query(filter: &RuleFilter) -> Value {
    let mut must = Vec::new();
    let mut push = |field: &str, value: &Option<String>| {
        if let Some(v) = value {
            must.push(json!({ "wildcard": { field: { "value": format!("*{}*", v), "case_insensitive": true } } }));
        }
    };
    push("group", &filter.group);
    push("name", &filter.name);
    push("key", &filter.key);
    push("status", &filter.status);
    push("method", &filter.method);
    push("strategy", &filter.strategy);
    push("path", &filter.path);

    if must.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "must": must } })
    }
}

/// The candidate query for `MatchByMethodPath`: every enabled rule for
/// `method`, sorted by `_seq_no` so iteration below replays index write
/// order (`§4.3` tie-breaking), same as the memory backend's `Vec` order
/// and the relational backend's `ordinal` column.
fn build_match_query(method: &str) -> Value {
    json!({
        "query": {
            "bool": {
                "must": [
                    { "term": { "method": method } },
                    { "term": { "status": "enabled" } },
                ]
            }
        },
        "sort": [{ "_seq_no": { "order": "asc" } }]
    })
}

impl RuleRepository for ElasticRuleRepository {
    fn create(&self, mut rule: Rule) -> Result<Rule, Error> {
        mockserver_core::validator::validate(&rule)?;
        rule.key = Some(uuid::Uuid::new_v4().to_string());
        let key = rule.key.clone().unwrap();

        self.rt.block_on(async {
            self.client
                .index(IndexParts::IndexId(&self.index, &key))
                .body(&rule)
                .refresh(elasticsearch::params::Refresh::WaitFor)
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?
                .error_for_status_code()
                .map_err(|e| Error::backend(e.to_string()))?;
            Ok(())
        })?;
        tracing::debug!(rule.key = ?rule.key, "indexed rule");
        Ok(rule)
    }

    fn update(&self, rule: Rule) -> Result<Rule, Error> {
        mockserver_core::validator::validate(&rule)?;
        let key = rule
            .key
            .clone()
            .ok_or_else(|| Error::invalid_rule("rule has no key to update"))?;

        self.rt.block_on(async {
            let exists = self
                .client
                .get(GetParts::IndexId(&self.index, &key))
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            if !exists.status_code().is_success() {
                return Err(Error::rule_not_found(format!("no rule found with key: {}", key)));
            }
            self.client
                .index(IndexParts::IndexId(&self.index, &key))
                .body(&rule)
                .refresh(elasticsearch::params::Refresh::WaitFor)
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?
                .error_for_status_code()
                .map_err(|e| Error::backend(e.to_string()))?;
            Ok(())
        })?;
        Ok(rule)
    }

    fn get(&self, key: &str) -> Result<Rule, Error> {
        self.rt.block_on(async {
            let response = self
                .client
                .get(GetParts::IndexId(&self.index, key))
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            if !response.status_code().is_success() {
                return Err(Error::rule_not_found(format!("no rule found with key: {}", key)));
            }
            let body: Value = response
                .json()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            let source = body
                .get("_source")
                .cloned()
                .ok_or_else(|| Error::backend("elasticsearch document missing _source"))?;
            Self::rule_from_source(source)
        })
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        self.rt.block_on(async {
            // 404 on an already-absent document is not an error (§4.3
            // Delete is idempotent).
            let response = self
                .client
                .delete(DeleteParts::IndexId(&self.index, key))
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            if !response.status_code().is_success() && response.status_code().as_u16() != 404 {
                return Err(Error::backend(format!(
                    "elasticsearch delete failed with status {}",
                    response.status_code()
                )));
            }
            Ok(())
        })
    }

    fn search(&self, filter: &RuleFilter, offset: i32, limit: i32) -> Result<RulePage, Error> {
        self.rt.block_on(async {
            let query = build_search_query(filter);

            let response = self
                .client
                .search(SearchParts::Index(&[&self.index]))
                .from(offset.max(0) as i64)
                .size(limit.max(0) as i64)
                .body(json!({ "query": query }))
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?
                .error_for_status_code()
                .map_err(|e| Error::backend(e.to_string()))?;

            let body: Value = response
                .json()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;

            let total = body["hits"]["total"]["value"].as_i64().unwrap_or(0);
            let hits = body["hits"]["hits"]
                .as_array()
                .cloned()
                .unwrap_or_default();

            let mut results = Vec::with_capacity(hits.len());
            for hit in hits {
                let source = hit
                    .get("_source")
                    .cloned()
                    .ok_or_else(|| Error::backend("elasticsearch hit missing _source"))?;
                results.push(Self::rule_from_source(source)?);
            }

            Ok(RulePage {
                paging: mockserver_core::model::Paging { total, limit, offset },
                results,
            })
        })
    }

    fn match_by_method_path(&self, method: &str, path: &str) -> Result<Rule, Error> {
        self.rt.block_on(async {
            let response = self
                .client
                .search(SearchParts::Index(&[&self.index]))
                .size(1000)
                .body(build_match_query(method))
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?
                .error_for_status_code()
                .map_err(|e| Error::backend(e.to_string()))?;

            let body: Value = response
                .json()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            let hits = body["hits"]["hits"]
                .as_array()
                .cloned()
                .unwrap_or_default();

            for hit in hits {
                let source = hit
                    .get("_source")
                    .cloned()
                    .ok_or_else(|| Error::backend("elasticsearch hit missing _source"))?;
                let rule = Self::rule_from_source(source)?;
                if rule.status == RuleStatus::Enabled
                    && mockserver_core::pattern::compile(&rule.path).regex.is_match(path)
                {
                    return Ok(rule);
                }
            }

            Err(Error::rule_not_found(format!(
                "no rule found for path: {} and method {}",
                path, method
            )))
        })
    }

    fn advance_cursor(&self, key: &str, response_count: usize) -> Result<usize, Error> {
        self.rt.block_on(async {
            self.client
                .update(UpdateParts::IndexId(&self.index, key))
                .body(json!({
                    "script": {
                        "source": "ctx._source.next_response_index = (ctx._source.next_response_index + 1) % params.count",
                        "lang": "painless",
                        "params": { "count": response_count.max(1) }
                    }
                }))
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?
                .error_for_status_code()
                .map_err(|_| Error::rule_not_found(format!("no rule found with key: {}", key)))?;

            let response = self
                .client
                .get(GetParts::IndexId(&self.index, key))
                .send()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            let body: Value = response
                .json()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            let source = body
                .get("_source")
                .cloned()
                .ok_or_else(|| Error::backend("elasticsearch document missing _source"))?;
            Ok(Self::rule_from_source(source)?.next_response_index)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_query_is_match_all_with_no_filters() {
        assert_eq!(
            build_search_query(&RuleFilter::default()),
            json!({ "match_all": {} })
        );
    }

    #[test]
    fn search_query_wildcards_each_set_field() {
        let filter = RuleFilter {
            method: Some("GET".into()),
            ..Default::default()
        };
        let query = build_search_query(&filter);
        let must = query["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 1);
        assert_eq!(must[0]["wildcard"]["method"]["value"], "*GET*");
        assert_eq!(must[0]["wildcard"]["method"]["case_insensitive"], true);
    }

    #[test]
    fn search_query_combines_multiple_filters_with_must() {
        let filter = RuleFilter {
            method: Some("GET".into()),
            group: Some("billing".into()),
            ..Default::default()
        };
        let must = build_search_query(&filter)["bool"]["must"].as_array().unwrap().len();
        assert_eq!(must, 2);
    }

    #[test]
    fn match_query_filters_by_method_and_enabled_status_sorted_by_seq_no() {
        let query = build_match_query("POST");
        assert_eq!(query["query"]["bool"]["must"][0]["term"]["method"], "POST");
        assert_eq!(query["query"]["bool"]["must"][1]["term"]["status"], "enabled");
        assert_eq!(query["sort"][0]["_seq_no"]["order"], "asc");
    }

    #[test]
    fn index_mapping_declares_filter_fields_as_keyword() {
        let mapping = index_mapping();
        assert_eq!(mapping["settings"]["number_of_shards"], 1);
        for field in ["key", "group", "name", "path", "strategy", "method", "status"] {
            assert_eq!(mapping["mappings"]["properties"][field]["type"], "keyword");
        }
    }

    #[test]
    fn rule_from_source_rejects_corrupt_document() {
        let err = ElasticRuleRepository::rule_from_source(json!({ "not": "a rule" }))
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
