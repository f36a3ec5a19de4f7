//! Rule definitions and field declarations as they appear in a rule-set document.

use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::record::FieldType;
use crate::validation::Severity;

/// Rule id prefix reserved for synthesized schema checks.
pub const SCHEMA_RULE_PREFIX: &str = "schema.";
/// Rule id prefix reserved for built-in system rules.
pub const SYSTEM_RULE_PREFIX: &str = "system.";
/// Id of the built-in rule referenced by unparseable-record findings.
pub const UNPARSEABLE_RULE_ID: &str = "system.unparseable_record";

const DEFAULT_PRIORITY: i32 = 100;

/// Kind of a rule, selecting the implementation the factory builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleKind {
    Range,
    Set,
    Pattern,
    CrossField,
    Statistical,
    /// Synthesized from field declarations; not configurable.
    Schema,
    /// Built-in engine rules; not configurable.
    System,
    /// A kind registered on the factory by the embedding application.
    Custom(String),
}

impl RuleKind {
    pub fn as_str(&self) -> &str {
        match self {
            RuleKind::Range => "range",
            RuleKind::Set => "set",
            RuleKind::Pattern => "pattern",
            RuleKind::CrossField => "cross_field",
            RuleKind::Statistical => "statistical",
            RuleKind::Schema => "schema",
            RuleKind::System => "system",
            RuleKind::Custom(name) => name,
        }
    }

    /// Whether documents may declare rules of this kind.
    pub fn is_reserved(&self) -> bool {
        matches!(self, RuleKind::Schema | RuleKind::System)
    }
}

impl From<String> for RuleKind {
    fn from(s: String) -> Self {
        match s.to_lowercase().replace('-', "_").as_str() {
            "range" => RuleKind::Range,
            "set" | "set_membership" => RuleKind::Set,
            "pattern" | "regex" => RuleKind::Pattern,
            "cross_field" | "crossfield" => RuleKind::CrossField,
            "statistical" => RuleKind::Statistical,
            "schema" => RuleKind::Schema,
            "system" => RuleKind::System,
            _ => RuleKind::Custom(s),
        }
    }
}

impl From<RuleKind> for String {
    fn from(kind: RuleKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A declared record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// One versioned rule definition.
///
/// Definitions are immutable once published. A new version supersedes an
/// older one for evaluation, but the older version stays resolvable so past
/// findings keep their lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub domain: String,
    /// Target field(s). Accepts `"field": "x"` or `"fields": ["x", "y"]`.
    #[serde(alias = "field", deserialize_with = "one_or_many")]
    pub fields: Vec<String>,
    pub kind: RuleKind,
    #[serde(default = "empty_parameters")]
    pub parameters: JsonValue,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Declared evaluation priority; lower runs first, ties broken by id.
    #[serde(default = "default_priority")]
    pub priority: i32,
}

impl RuleDefinition {
    /// Synthesize the schema rule for a declared field.
    pub fn schema_for(field: &FieldSpec) -> Self {
        Self {
            id: format!("{}{}", SCHEMA_RULE_PREFIX, field.name),
            domain: "schema".to_string(),
            fields: vec![field.name.clone()],
            kind: RuleKind::Schema,
            parameters: json!({
                "type": field.field_type,
                "required": field.required,
            }),
            severity: Severity::Error,
            enabled: true,
            version: 1,
            priority: 0,
        }
    }

    /// The built-in definition referenced by unparseable-record findings.
    pub fn unparseable() -> &'static RuleDefinition {
        &UNPARSEABLE_RULE
    }

    /// Parameter lookup for optional string settings shared by all kinds.
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(JsonValue::as_str)
    }

    /// Key identifying this exact revision.
    pub fn key(&self) -> (String, u32) {
        (self.id.clone(), self.version)
    }
}

static UNPARSEABLE_RULE: Lazy<RuleDefinition> = Lazy::new(|| RuleDefinition {
    id: UNPARSEABLE_RULE_ID.to_string(),
    domain: "system".to_string(),
    fields: Vec::new(),
    kind: RuleKind::System,
    parameters: empty_parameters(),
    severity: Severity::Critical,
    enabled: true,
    version: 1,
    priority: 0,
});

fn empty_parameters() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
