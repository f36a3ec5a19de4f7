//! Rule definitions, rule kinds and the rule registry.

mod context;
mod definition;
mod document;
mod kinds;
mod registry;

pub use context::{BuildContext, EvalContext};
pub use definition::{
    FieldSpec, RuleDefinition, RuleKind, SCHEMA_RULE_PREFIX, SYSTEM_RULE_PREFIX, UNPARSEABLE_RULE_ID,
};
pub use document::RuleSetDocument;
pub use kinds::{
    PatternRule, RangeRule, Rule, RuleConstructor, RuleFactory, SchemaRule, SetMembershipRule,
};
pub(crate) use kinds::{parse_params, single_field};
pub use registry::RuleRegistry;
