//! The rule data model (`§3 Data Model`).
//!
//! `Strategy`, `VariableKind` and `AssertionKind` are closed variant sets
//! modeled as tagged unions rather than stringly-typed fields with nullable
//! payloads, per the redesign notes: a match on the enum is exhaustive and
//! the compiler catches a missing arm when a new variant is added.

use serde::{Deserialize, Serialize};

/// The nine standard HTTP verbs a rule can be registered for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
    Connect,
}

impl Method {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            "TRACE" => Some(Self::Trace),
            "CONNECT" => Some(Self::Connect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
        }
    }
}

/// `§3`: `status ∈ {enabled, disabled}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Enabled,
    Disabled,
}

/// The response-selection policy (`§4.7`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Normal,
    Sequential,
    Random,
    Scene,
}

/// A declared extraction from the incoming request, or a generated value
/// (`§3`, `§4.5`). Each variant carries exactly the payload it needs; a
/// `random`/`hash` variable has no lookup key because none is used.
#[derive(Clone, Debug, PartialEq)]
pub enum VariableKind {
    Body { key: String },
    Header { key: String },
    Query { key: String },
    Path { key: String },
    Random,
    Hash,
}

impl VariableKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Body { .. } => "body",
            Self::Header { .. } => "header",
            Self::Query { .. } => "query",
            Self::Path { .. } => "path",
            Self::Random => "random",
            Self::Hash => "hash",
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Body { key }
            | Self::Header { key }
            | Self::Query { key }
            | Self::Path { key } => Some(key.as_str()),
            Self::Random | Self::Hash => None,
        }
    }
}

/// Wire representation of a [`Variable`], matching the canonical JSON
/// schema's flat `{type, name, key, assertions}` shape. `Variable` itself
/// keeps the closed-variant representation; conversion happens at the
/// (de)serialization boundary, the same trick `ESRule`/`RuleList` wire
/// structs use for their document stores.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct VariableWire {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    assertions: Vec<Assertion>,
}

/// A variable declaration attached to a rule (`§3`).
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub kind: VariableKind,
    pub name: String,
    pub assertions: Vec<Assertion>,
}

impl Serialize for Variable {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        VariableWire {
            kind: self.kind.type_name().to_string(),
            name: self.name.clone(),
            key: self.kind.key().unwrap_or("").to_string(),
            assertions: self.assertions.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Variable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;
        let wire = VariableWire::deserialize(deserializer)?;
        let kind = match wire.kind.as_str() {
            "body" => VariableKind::Body { key: wire.key },
            "header" => VariableKind::Header { key: wire.key },
            "query" => VariableKind::Query { key: wire.key },
            "path" => VariableKind::Path { key: wire.key },
            "random" => VariableKind::Random,
            "hash" => VariableKind::Hash,
            other => {
                return Err(D::Error::custom(format!(
                    "unknown variable type '{}'",
                    other
                )))
            }
        };
        Ok(Variable {
            kind,
            name: wire.name,
            assertions: wire.assertions,
        })
    }
}

/// A predicate evaluated against a variable's extracted value (`§3`,
/// `§4.6`). `equals` carries its comparison value and `range` its bounds
/// directly on the variant instead of leaving `value`/`min`/`max` nullable
/// on a shared struct.
#[derive(Clone, Debug, PartialEq)]
pub enum AssertionKind {
    Present,
    String,
    Number,
    Equals { value: String },
    Range { min: f64, max: f64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AssertionWire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    min: f64,
    #[serde(default)]
    max: f64,
    #[serde(default)]
    fail_on_error: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assertion {
    pub kind: AssertionKind,
    pub fail_on_error: bool,
}

impl Serialize for Assertion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let (kind, value, min, max) = match &self.kind {
            AssertionKind::Present => ("present", String::new(), 0.0, 0.0),
            AssertionKind::String => ("string", String::new(), 0.0, 0.0),
            AssertionKind::Number => ("number", String::new(), 0.0, 0.0),
            AssertionKind::Equals { value } => {
                ("equals", value.clone(), 0.0, 0.0)
            }
            AssertionKind::Range { min, max } => {
                ("range", String::new(), *min, *max)
            }
        };
        AssertionWire {
            kind: kind.to_string(),
            value,
            min,
            max,
            fail_on_error: self.fail_on_error,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Assertion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;
        let wire = AssertionWire::deserialize(deserializer)?;
        let kind = match wire.kind.as_str() {
            "present" => AssertionKind::Present,
            "string" => AssertionKind::String,
            "number" => AssertionKind::Number,
            "equals" => AssertionKind::Equals { value: wire.value },
            "range" => AssertionKind::Range {
                min: wire.min,
                max: wire.max,
            },
            other => {
                return Err(D::Error::custom(format!(
                    "unknown assertion type '{}'",
                    other
                )))
            }
        };
        Ok(Assertion {
            kind,
            fail_on_error: wire.fail_on_error,
        })
    }
}

/// One of a rule's candidate responses (`§3`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub body: String,
    pub content_type: String,
    pub http_status: u16,
    #[serde(default)]
    pub delay: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
}

/// A rule (`§3`). `key` is absent until the repository assigns one and
/// `next_response_index` is the sequential-strategy cursor, persisted
/// alongside the rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub group: String,
    pub name: String,
    pub path: String,
    pub strategy: Strategy,
    pub method: Method,
    pub status: RuleStatus,
    pub responses: Vec<Response>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub next_response_index: usize,
}

/// Pagination parameters and result metadata (`§6`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Paging {
    pub total: i64,
    pub limit: i32,
    pub offset: i32,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            total: 0,
            limit: 30,
            offset: 0,
        }
    }
}

/// A page of rules plus the total matching the filter (`§4.3 Search`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RulePage {
    pub paging: Paging,
    pub results: Vec<Rule>,
}

/// Search filter recognised by `Search` (`§4.3`). Each field is matched as a
/// case-insensitive substring; `None` means "don't filter on this field".
#[derive(Clone, Debug, Default)]
pub struct RuleFilter {
    pub group: Option<String>,
    pub name: Option<String>,
    pub key: Option<String>,
    pub status: Option<String>,
    pub method: Option<String>,
    pub strategy: Option<String>,
    pub path: Option<String>,
}

impl RuleFilter {
    /// Does `rule` satisfy every filter field that is set? Used by the
    /// in-memory backend; SQL backends translate this into a `WHERE` clause
    /// instead.
    pub fn matches(&self, rule: &Rule) -> bool {
        fn contains(haystack: &str, needle: &str) -> bool {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }
        self.group
            .as_ref()
            .map_or(true, |v| contains(&rule.group, v))
            && self.name.as_ref().map_or(true, |v| contains(&rule.name, v))
            && self.key.as_ref().map_or(true, |v| {
                rule.key.as_deref().map_or(false, |k| contains(k, v))
            })
            && self.status.as_ref().map_or(true, |v| {
                contains(
                    match rule.status {
                        RuleStatus::Enabled => "enabled",
                        RuleStatus::Disabled => "disabled",
                    },
                    v,
                )
            })
            && self
                .method
                .as_ref()
                .map_or(true, |v| contains(rule.method.as_str(), v))
            && self.strategy.as_ref().map_or(true, |v| {
                contains(
                    match rule.strategy {
                        Strategy::Normal => "normal",
                        Strategy::Sequential => "sequential",
                        Strategy::Random => "random",
                        Strategy::Scene => "scene",
                    },
                    v,
                )
            })
            && self.path.as_ref().map_or(true, |v| contains(&rule.path, v))
    }
}
