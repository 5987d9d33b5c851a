//! Rule repository contract (`§4.3`).
//!
//! `RuleRepository` is the trait backend adapters implement; `RuleStore` is
//! a cheap-to-clone handle wrapping `Arc<dyn RuleRepository>`, the same
//! shape `DatabaseIf` gives `DbConn` -- callers hold a handle, not the
//! trait object directly, so the pipeline can pass a repository around
//! freely without generics.

use crate::model::{Rule, RuleFilter, RulePage};
use crate::Error;
use std::sync::Arc;

/// Operations a rule-store backend must implement. `Send + Sync` because
/// the server dispatches requests on a worker per request (`§5`).
pub trait RuleRepository: Send + Sync {
    /// Validate and persist a new rule, assigning it a key. Fails
    /// `InvalidRule` if validation rejects it, `Backend` on I/O error.
    fn create(&self, rule: Rule) -> Result<Rule, Error>;

    /// Replace the rule at `rule.key` atomically. Fails `RuleNotFound` if
    /// the key is absent.
    fn update(&self, rule: Rule) -> Result<Rule, Error>;

    /// Fetch a rule by key. Fails `RuleNotFound` if absent.
    fn get(&self, key: &str) -> Result<Rule, Error>;

    /// Delete a rule by key. Idempotent: deleting an absent key is not an
    /// error.
    fn delete(&self, key: &str) -> Result<(), Error>;

    /// A page of rules matching `filter`, plus the total count before
    /// paging.
    fn search(
        &self,
        filter: &RuleFilter,
        offset: i32,
        limit: i32,
    ) -> Result<RulePage, Error>;

    /// The single enabled rule whose compiled pattern matches `(method,
    /// path)` (`§4.3 MatchByMethodPath semantics`). Fails `RuleNotFound` if
    /// none match or none of the matches are enabled.
    fn match_by_method_path(
        &self,
        method: &str,
        path: &str,
    ) -> Result<Rule, Error>;

    /// Advance the sequential-strategy cursor for `key` by one (mod the
    /// rule's response count) and persist the new value, returning it.
    /// Implementations must serialize concurrent advances per rule key so
    /// the cursor advances monotonically (`§5`).
    fn advance_cursor(&self, key: &str, response_count: usize) -> Result<usize, Error>;
}

/// A cheap-to-clone handle to a [`RuleRepository`] implementation.
#[derive(Clone)]
pub struct RuleStore(Arc<dyn RuleRepository>);

impl RuleStore {
    pub fn new(backend: Arc<dyn RuleRepository>) -> Self {
        Self(backend)
    }

    pub fn create(&self, rule: Rule) -> Result<Rule, Error> {
        self.0.create(rule)
    }

    pub fn update(&self, rule: Rule) -> Result<Rule, Error> {
        self.0.update(rule)
    }

    pub fn get(&self, key: &str) -> Result<Rule, Error> {
        self.0.get(key)
    }

    pub fn delete(&self, key: &str) -> Result<(), Error> {
        self.0.delete(key)
    }

    pub fn search(
        &self,
        filter: &RuleFilter,
        offset: i32,
        limit: i32,
    ) -> Result<RulePage, Error> {
        self.0.search(filter, offset, limit)
    }

    pub fn match_by_method_path(
        &self,
        method: &str,
        path: &str,
    ) -> Result<Rule, Error> {
        self.0.match_by_method_path(method, path)
    }

    pub fn advance_cursor(
        &self,
        key: &str,
        response_count: usize,
    ) -> Result<usize, Error> {
        self.0.advance_cursor(key, response_count)
    }
}
