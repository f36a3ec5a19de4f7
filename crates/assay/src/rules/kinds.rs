//! Rule kinds and the factory that builds them from definitions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};

use crate::crossfield::CrossFieldRule;
use crate::error::{AssayError, Result};
use crate::record::{FieldType, Record, Value};
use crate::stats::{BaselineTarget, StatisticalRule};
use crate::validation::{Evidence, Finding, Phase};

use super::context::{BuildContext, EvalContext};
use super::definition::{FieldSpec, RuleDefinition, RuleKind};

/// Compiled regexes larger than this are rejected at load time.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A compiled, evaluable rule.
///
/// Every kind exposes the same capability, so the engine dispatches through
/// this trait and never needs to know which kinds exist.
pub trait Rule: Send + Sync {
    /// The definition this rule was compiled from.
    fn definition(&self) -> &RuleDefinition;

    /// Phase in which the rule runs.
    fn phase(&self) -> Phase;

    /// Fields whose schema failure makes this rule skip the record.
    fn dependencies(&self) -> Vec<String> {
        self.definition().fields.clone()
    }

    /// Baseline this rule reads, if it is statistical.
    fn baseline_target(&self) -> Option<BaselineTarget> {
        None
    }

    /// Evaluate against one record; `Ok(None)` means the record passed.
    fn evaluate(&self, record: &Record, ctx: &EvalContext<'_>) -> Result<Option<Finding>>;
}

/// Parse a definition's parameters into a kind-specific struct.
pub(crate) fn parse_params<T: DeserializeOwned>(def: &RuleDefinition) -> Result<T> {
    serde_json::from_value(def.parameters.clone())
        .map_err(|e| AssayError::invalid_rule(&def.id, format!("invalid parameters: {}", e)))
}

/// The single target field of a single-field kind.
pub(crate) fn single_field(def: &RuleDefinition) -> Result<&str> {
    match def.fields.as_slice() {
        [field] => Ok(field.as_str()),
        _ => Err(AssayError::invalid_rule(
            &def.id,
            format!("kind '{}' takes exactly one field", def.kind),
        )),
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// Presence and type check for one declared field.
pub struct SchemaRule {
    definition: RuleDefinition,
    field: String,
    field_type: FieldType,
    required: bool,
}

impl SchemaRule {
    pub fn new(spec: &FieldSpec) -> Self {
        Self {
            definition: RuleDefinition::schema_for(spec),
            field: spec.name.clone(),
            field_type: spec.field_type,
            required: spec.required,
        }
    }
}

impl Rule for SchemaRule {
    fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    fn phase(&self) -> Phase {
        Phase::Schema
    }

    fn evaluate(&self, record: &Record, ctx: &EvalContext<'_>) -> Result<Option<Finding>> {
        let finding = match record.get(&self.field) {
            None if self.required => Some(
                Finding::new(&self.definition, record.id(), Phase::Schema, "missing required field", ctx.detected_at)
                    .with_evidence(Evidence::new().with_expected(json!({"required": true}))),
            ),
            None => None,
            Some(value) if !value.conforms_to(self.field_type) => Some(
                Finding::new(&self.definition, record.id(), Phase::Schema, "type mismatch", ctx.detected_at)
                    .with_evidence(
                        Evidence::new()
                            .with_observed(value.to_json())
                            .with_expected(json!({"type": self.field_type})),
                    ),
            ),
            Some(_) => None,
        };
        Ok(finding)
    }
}

// =============================================================================
// RANGE
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeParams {
    min: Option<f64>,
    max: Option<f64>,
    message: Option<String>,
}

/// Static bounds on a numeric field. Values on a bound pass.
pub struct RangeRule {
    definition: RuleDefinition,
    field: String,
    min: Option<f64>,
    max: Option<f64>,
    message: Option<String>,
}

impl RangeRule {
    pub fn build(definition: &RuleDefinition, ctx: &BuildContext<'_>) -> Result<Self> {
        let field = single_field(definition)?.to_string();
        let spec = ctx.field(&definition.id, &field)?;
        if !spec.field_type.is_numeric() {
            return Err(AssayError::invalid_rule(
                &definition.id,
                format!("range target '{}' is not numeric", field),
            ));
        }

        let params: RangeParams = parse_params(definition)?;
        match (params.min, params.max) {
            (None, None) => {
                return Err(AssayError::invalid_rule(&definition.id, "range needs min or max"));
            }
            (Some(min), Some(max)) if min > max => {
                return Err(AssayError::invalid_rule(
                    &definition.id,
                    format!("min {} is greater than max {}", min, max),
                ));
            }
            _ => {}
        }

        Ok(Self {
            definition: definition.clone(),
            field,
            min: params.min,
            max: params.max,
            message: params.message,
        })
    }

    fn describe_bounds(&self) -> String {
        format!(
            "[{}, {}]",
            self.min.map(|v| v.to_string()).unwrap_or_else(|| "-inf".to_string()),
            self.max.map(|v| v.to_string()).unwrap_or_else(|| "inf".to_string())
        )
    }
}

impl Rule for RangeRule {
    fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    fn phase(&self) -> Phase {
        Phase::Business
    }

    fn evaluate(&self, record: &Record, ctx: &EvalContext<'_>) -> Result<Option<Finding>> {
        let Some(value) = record.get(&self.field) else {
            return Ok(None);
        };
        let v = value.as_f64().ok_or_else(|| AssayError::RuleEvaluation {
            rule_id: self.definition.id.clone(),
            message: format!("'{}' is not numeric: {}", self.field, value),
        })?;

        let below = self.min.is_some_and(|min| v < min);
        let above = self.max.is_some_and(|max| v > max);
        if !below && !above {
            return Ok(None);
        }

        let message = self.message.clone().unwrap_or_else(|| {
            format!("{} value {} outside range {}", self.field, value, self.describe_bounds())
        });
        Ok(Some(
            Finding::new(&self.definition, record.id(), Phase::Business, message, ctx.detected_at)
                .with_evidence(
                    Evidence::new()
                        .with_observed(value.to_json())
                        .with_expected(json!({"min": self.min, "max": self.max})),
                ),
        ))
    }
}

// =============================================================================
// SET MEMBERSHIP
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetParams {
    values: Vec<JsonValue>,
    #[serde(default = "default_case_sensitive")]
    case_sensitive: bool,
    message: Option<String>,
}

fn default_case_sensitive() -> bool {
    true
}

/// Membership of a field value in a fixed set of allowed values.
pub struct SetMembershipRule {
    definition: RuleDefinition,
    field: String,
    allowed: Vec<String>,
    case_sensitive: bool,
    message: Option<String>,
}

impl SetMembershipRule {
    pub fn build(definition: &RuleDefinition, ctx: &BuildContext<'_>) -> Result<Self> {
        let field = single_field(definition)?.to_string();
        ctx.field(&definition.id, &field)?;

        let params: SetParams = parse_params(definition)?;
        if params.values.is_empty() {
            return Err(AssayError::invalid_rule(&definition.id, "allowed set is empty"));
        }

        let mut allowed = Vec::with_capacity(params.values.len());
        for raw in &params.values {
            let value = Value::from_json(raw).filter(|v| !v.is_null()).ok_or_else(|| {
                AssayError::invalid_rule(&definition.id, format!("set value {} is not a scalar", raw))
            })?;
            let text = value.as_text().into_owned();
            allowed.push(if params.case_sensitive { text } else { text.to_lowercase() });
        }

        Ok(Self {
            definition: definition.clone(),
            field,
            allowed,
            case_sensitive: params.case_sensitive,
            message: params.message,
        })
    }
}

impl Rule for SetMembershipRule {
    fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    fn phase(&self) -> Phase {
        Phase::Business
    }

    fn evaluate(&self, record: &Record, ctx: &EvalContext<'_>) -> Result<Option<Finding>> {
        let Some(value) = record.get(&self.field) else {
            return Ok(None);
        };

        let text = value.as_text();
        let candidate = if self.case_sensitive {
            text.trim().to_string()
        } else {
            text.trim().to_lowercase()
        };
        if self.allowed.iter().any(|a| *a == candidate) {
            return Ok(None);
        }

        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("{} value '{}' not in allowed set", self.field, value));
        Ok(Some(
            Finding::new(&self.definition, record.id(), Phase::Business, message, ctx.detected_at)
                .with_evidence(
                    Evidence::new()
                        .with_observed(value.to_json())
                        .with_expected(json!(self.allowed)),
                ),
        ))
    }
}

// =============================================================================
// PATTERN
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatternParams {
    regex: String,
    message: Option<String>,
}

/// Text field must match a regular expression.
pub struct PatternRule {
    definition: RuleDefinition,
    field: String,
    regex: Regex,
    message: Option<String>,
}

impl PatternRule {
    pub fn build(definition: &RuleDefinition, ctx: &BuildContext<'_>) -> Result<Self> {
        let field = single_field(definition)?.to_string();
        ctx.field(&definition.id, &field)?;

        let params: PatternParams = parse_params(definition)?;
        let regex = RegexBuilder::new(&params.regex)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| AssayError::invalid_rule(&definition.id, format!("invalid regex: {}", e)))?;

        Ok(Self {
            definition: definition.clone(),
            field,
            regex,
            message: params.message,
        })
    }
}

impl Rule for PatternRule {
    fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    fn phase(&self) -> Phase {
        Phase::Business
    }

    fn evaluate(&self, record: &Record, ctx: &EvalContext<'_>) -> Result<Option<Finding>> {
        let Some(value) = record.get(&self.field) else {
            return Ok(None);
        };
        let text = value.as_text();
        if self.regex.is_match(&text) {
            return Ok(None);
        }

        let message = self.message.clone().unwrap_or_else(|| {
            format!("{} value '{}' does not match pattern", self.field, text)
        });
        Ok(Some(
            Finding::new(&self.definition, record.id(), Phase::Business, message, ctx.detected_at)
                .with_evidence(
                    Evidence::new()
                        .with_observed(value.to_json())
                        .with_expected(json!({"pattern": self.regex.as_str()})),
                ),
        ))
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Constructor for an application-defined rule kind.
pub type RuleConstructor =
    Arc<dyn Fn(&RuleDefinition, &BuildContext<'_>) -> Result<Box<dyn Rule>> + Send + Sync>;

/// Builds rules from definitions, keyed on the definition's kind.
///
/// Built-in kinds are always available; further kinds are registered with
/// [`RuleFactory::with_kind`]. Built-in names cannot be overridden.
#[derive(Clone, Default)]
pub struct RuleFactory {
    custom: HashMap<String, RuleConstructor>,
}

impl RuleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for an additional kind.
    pub fn with_kind<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&RuleDefinition, &BuildContext<'_>) -> Result<Box<dyn Rule>> + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Whether the factory can build the given kind from a document.
    pub fn supports(&self, kind: &RuleKind) -> bool {
        match kind {
            RuleKind::Schema | RuleKind::System => false,
            RuleKind::Custom(name) => self.custom.contains_key(name),
            _ => true,
        }
    }

    /// Compile one definition.
    pub fn build(&self, definition: &RuleDefinition, ctx: &BuildContext<'_>) -> Result<Box<dyn Rule>> {
        let rule: Box<dyn Rule> = match &definition.kind {
            RuleKind::Range => Box::new(RangeRule::build(definition, ctx)?),
            RuleKind::Set => Box::new(SetMembershipRule::build(definition, ctx)?),
            RuleKind::Pattern => Box::new(PatternRule::build(definition, ctx)?),
            RuleKind::CrossField => Box::new(CrossFieldRule::build(definition, ctx)?),
            RuleKind::Statistical => Box::new(StatisticalRule::build(definition, ctx)?),
            RuleKind::Custom(name) => match self.custom.get(name) {
                Some(constructor) => constructor(definition, ctx)?,
                None => {
                    return Err(AssayError::invalid_rule(
                        &definition.id,
                        format!("unknown rule kind '{}'", name),
                    ));
                }
            },
            RuleKind::Schema | RuleKind::System => {
                return Err(AssayError::invalid_rule(
                    &definition.id,
                    format!("kind '{}' is reserved", definition.kind),
                ));
            }
        };
        Ok(rule)
    }
}

impl fmt::Debug for RuleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.custom.keys().collect();
        kinds.sort();
        f.debug_struct("RuleFactory").field("custom", &kinds).finish()
    }
}
