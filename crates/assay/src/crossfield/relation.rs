//! Relations over several fields or external reference values.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::record::{Record, ReferenceData, Value};

/// One side of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// A field on the record.
    Field(String),
    /// A named external reference value for the record.
    Reference(String),
    /// A literal scalar.
    Value(JsonValue),
}

impl Operand {
    /// Resolve to a non-null value, or `None` when missing.
    pub fn resolve<'a>(&'a self, record: &'a Record, references: &'a ReferenceData) -> Option<Cow<'a, Value>> {
        match self {
            Operand::Field(name) => record.get(name).map(Cow::Borrowed),
            Operand::Reference(name) => references.get(record.id(), name).map(Cow::Borrowed),
            Operand::Value(raw) => Value::from_json(raw).filter(|v| !v.is_null()).map(Cow::Owned),
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Operand::Field(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(name) => write!(f, "{}", name),
            Operand::Reference(name) => write!(f, "reference '{}'", name),
            Operand::Value(raw) => write!(f, "{}", raw),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// Guard of a `requires` relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub field: String,
    pub equals: JsonValue,
}

/// Constraint a `requires` relation enforces once its guard holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Constraint {
    pub field: String,
    pub one_of: Vec<JsonValue>,
}

/// A relation a record must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// `left op right`.
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    /// `numerator / denominator` within `[min, max]`.
    Ratio {
        numerator: Operand,
        denominator: Operand,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// When `when.field == when.equals`, `then.field` must be one of `then.one_of`.
    Requires { when: Condition, then: Constraint },
}

/// Result of checking a relation against one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Holds,
    Violated {
        observed: JsonValue,
        expected: JsonValue,
        /// Both sides were points in time.
        temporal: bool,
    },
    /// A required operand is missing or cannot be interpreted.
    Unresolvable(String),
}

impl Relation {
    /// Fields referenced by the relation, in declaration order.
    pub fn fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        match self {
            Relation::Compare { left, right, .. } => {
                fields.extend(left.field().map(String::from));
                fields.extend(right.field().map(String::from));
            }
            Relation::Ratio {
                numerator,
                denominator,
                ..
            } => {
                fields.extend(numerator.field().map(String::from));
                fields.extend(denominator.field().map(String::from));
            }
            Relation::Requires { when, then } => {
                fields.push(when.field.clone());
                fields.push(then.field.clone());
            }
        }
        fields.dedup();
        fields
    }

    /// Literal operands that are not scalars.
    pub(crate) fn invalid_literals(&self) -> Vec<&JsonValue> {
        let literals: Vec<&JsonValue> = match self {
            Relation::Compare { left, right, .. } => [left, right]
                .into_iter()
                .filter_map(|o| match o {
                    Operand::Value(v) => Some(v),
                    _ => None,
                })
                .collect(),
            Relation::Ratio {
                numerator,
                denominator,
                ..
            } => [numerator, denominator]
                .into_iter()
                .filter_map(|o| match o {
                    Operand::Value(v) => Some(v),
                    _ => None,
                })
                .collect(),
            Relation::Requires { when, then } => std::iter::once(&when.equals).chain(&then.one_of).collect(),
        };
        literals
            .into_iter()
            .filter(|v| Value::from_json(v).is_none_or(|v| v.is_null()))
            .collect()
    }

    /// Check the relation.
    pub fn check(&self, record: &Record, references: &ReferenceData) -> Outcome {
        match self {
            Relation::Compare { left, op, right } => {
                let (Some(l), Some(r)) = (left.resolve(record, references), right.resolve(record, references)) else {
                    return Outcome::Unresolvable(format!("{} {} {} has a missing operand", left, op.symbol(), right));
                };
                let Some(ordering) = l.compare(&r) else {
                    return Outcome::Unresolvable(format!("cannot compare {} ({}) with {} ({})", left, l, right, r));
                };
                if op.holds(ordering) {
                    Outcome::Holds
                } else {
                    Outcome::Violated {
                        observed: json!({"left": l.to_json(), "right": r.to_json()}),
                        expected: json!(format!("{} {} {}", left, op.symbol(), right)),
                        temporal: is_temporal(&l) && is_temporal(&r),
                    }
                }
            }
            Relation::Ratio {
                numerator,
                denominator,
                min,
                max,
            } => {
                let n = numerator.resolve(record, references).and_then(|v| v.as_f64());
                let d = denominator.resolve(record, references).and_then(|v| v.as_f64());
                let (Some(n), Some(d)) = (n, d) else {
                    return Outcome::Unresolvable(format!("{} / {} has a missing or non-numeric operand", numerator, denominator));
                };
                if d == 0.0 {
                    return Outcome::Unresolvable(format!("{} is zero", denominator));
                }
                let ratio = n / d;
                if min.is_some_and(|m| ratio < m) || max.is_some_and(|m| ratio > m) {
                    Outcome::Violated {
                        observed: json!(ratio),
                        expected: json!({"min": min, "max": max}),
                        temporal: false,
                    }
                } else {
                    Outcome::Holds
                }
            }
            Relation::Requires { when, then } => {
                let Some(guard) = record.get(&when.field) else {
                    return Outcome::Unresolvable(format!("{} is missing", when.field));
                };
                let applies = Value::from_json(&when.equals).is_some_and(|expected| same_value(guard, &expected));
                if !applies {
                    return Outcome::Holds;
                }
                let Some(actual) = record.get(&then.field) else {
                    return Outcome::Unresolvable(format!("{} is missing", then.field));
                };
                let allowed = then
                    .one_of
                    .iter()
                    .filter_map(Value::from_json)
                    .any(|candidate| same_value(actual, &candidate));
                if allowed {
                    Outcome::Holds
                } else {
                    Outcome::Violated {
                        observed: json!({&when.field: guard.to_json(), &then.field: actual.to_json()}),
                        expected: json!({&then.field: then.one_of}),
                        temporal: false,
                    }
                }
            }
        }
    }
}

fn is_temporal(value: &Value) -> bool {
    matches!(value, Value::Date(_) | Value::DateTime(_))
        || (value.as_f64().is_none() && value.as_datetime().is_some())
}

fn same_value(a: &Value, b: &Value) -> bool {
    a.compare(b) == Some(Ordering::Equal) || a.as_text().trim().eq_ignore_ascii_case(b.as_text().trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn compare(left: &str, op: CompareOp, right: &str) -> Relation {
        Relation::Compare {
            left: Operand::Field(left.to_string()),
            op,
            right: Operand::Field(right.to_string()),
        }
    }

    #[test]
    fn test_parse_relation() {
        let relation: Relation = serde_json::from_value(json!({
            "compare": {"left": {"field": "admission_date"}, "op": "le", "right": {"field": "discharge_date"}}
        }))
        .unwrap();
        assert_eq!(relation, compare("admission_date", CompareOp::Le, "discharge_date"));
        assert_eq!(relation.fields(), vec!["admission_date", "discharge_date"]);
    }

    #[test]
    fn test_temporal_violation() {
        let relation = compare("admission_date", CompareOp::Le, "discharge_date");
        let record = Record::new("r1", "b")
            .with("admission_date", NaiveDate::from_ymd_opt(2024, 3, 10).unwrap())
            .with("discharge_date", "2024-03-01");

        match relation.check(&record, &ReferenceData::new()) {
            Outcome::Violated { temporal, .. } => assert!(temporal),
            other => panic!("expected violation, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_operand_is_unresolvable() {
        let relation = compare("admission_date", CompareOp::Le, "discharge_date");
        let record = Record::new("r1", "b").with("admission_date", "2024-03-10");
        assert!(matches!(
            relation.check(&record, &ReferenceData::new()),
            Outcome::Unresolvable(_)
        ));
    }

    #[test]
    fn test_reference_operand() {
        let relation = Relation::Compare {
            left: Operand::Field("visit_date".to_string()),
            op: CompareOp::Le,
            right: Operand::Reference("death_date".to_string()),
        };
        let record = Record::new("p1", "b").with("visit_date", "2024-05-02");
        let references = ReferenceData::new().with("p1", "death_date", "2024-05-01");

        assert!(matches!(relation.check(&record, &references), Outcome::Violated { .. }));
        assert!(matches!(
            relation.check(&record, &ReferenceData::new()),
            Outcome::Unresolvable(_)
        ));
    }

    #[test]
    fn test_ratio_bounds_and_zero_denominator() {
        let relation = Relation::Ratio {
            numerator: Operand::Field("dose_mg".to_string()),
            denominator: Operand::Field("weight_kg".to_string()),
            min: None,
            max: Some(10.0),
        };
        let ok = Record::new("a", "b").with("dose_mg", 500.0).with("weight_kg", 70.0);
        let high = Record::new("b", "b").with("dose_mg", 900.0).with("weight_kg", 70.0);
        let zero = Record::new("c", "b").with("dose_mg", 900.0).with("weight_kg", 0.0);
        let refs = ReferenceData::new();

        assert_eq!(relation.check(&ok, &refs), Outcome::Holds);
        assert!(matches!(relation.check(&high, &refs), Outcome::Violated { temporal: false, .. }));
        assert!(matches!(relation.check(&zero, &refs), Outcome::Unresolvable(_)));
    }

    #[test]
    fn test_requires() {
        let relation: Relation = serde_json::from_value(json!({
            "requires": {"when": {"field": "pregnant", "equals": true}, "then": {"field": "gender", "one_of": ["F"]}}
        }))
        .unwrap();
        let refs = ReferenceData::new();

        let not_pregnant = Record::new("a", "b").with("pregnant", false).with("gender", "M");
        let consistent = Record::new("b", "b").with("pregnant", true).with("gender", "f");
        let inconsistent = Record::new("c", "b").with("pregnant", true).with("gender", "M");

        assert_eq!(relation.check(&not_pregnant, &refs), Outcome::Holds);
        assert_eq!(relation.check(&consistent, &refs), Outcome::Holds);
        assert!(matches!(relation.check(&inconsistent, &refs), Outcome::Violated { .. }));
    }

    #[test]
    fn test_incomparable_operands() {
        let relation = compare("a", CompareOp::Lt, "b");
        let record = Record::new("r", "b").with("a", 5i64).with("b", "2024-01-01");
        assert!(matches!(
            relation.check(&record, &ReferenceData::new()),
            Outcome::Unresolvable(_)
        ));
    }
}
