//! Cross-field validation: relations over several fields or reference values.

mod relation;
mod validator;

pub use relation::{CompareOp, Condition, Constraint, Operand, Outcome, Relation};
pub use validator::{CrossFieldRule, CrossFieldValidator};
