//! The rule-set configuration document.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AssayError, Result};
use crate::stats::CohortSpec;

use super::definition::{FieldSpec, RuleDefinition, SCHEMA_RULE_PREFIX, SYSTEM_RULE_PREFIX};

/// A versioned set of field declarations, cohort definitions and rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSetDocument {
    /// Revision tag linking every finding back to this document.
    pub version: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub cohorts: IndexMap<String, CohortSpec>,
    pub rules: Vec<RuleDefinition>,
}

impl RuleSetDocument {
    /// Parse a document from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| AssayError::config(format!("malformed rule-set document: {}", e)))
    }

    /// Read a document from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| AssayError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&text)
    }

    /// Structural checks that do not depend on rule kinds.
    ///
    /// Kind-specific parameter checks happen when the registry compiles the
    /// rules.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(AssayError::config("rule-set version tag is empty"));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(AssayError::config("field declaration with empty name"));
            }
            if !names.insert(field.name.as_str()) {
                return Err(AssayError::config(format!("duplicate field '{}'", field.name)));
            }
        }

        for (name, cohort) in &self.cohorts {
            if !names.contains(cohort.field.as_str()) {
                return Err(AssayError::config(format!(
                    "cohort '{}' groups on undeclared field '{}'",
                    name, cohort.field
                )));
            }
            cohort.validate(name)?;
        }

        let mut keys = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(AssayError::config("rule with empty id"));
            }
            if rule.id.starts_with(SCHEMA_RULE_PREFIX) || rule.id.starts_with(SYSTEM_RULE_PREFIX) {
                return Err(AssayError::invalid_rule(&rule.id, "id uses a reserved prefix"));
            }
            if rule.kind.is_reserved() {
                return Err(AssayError::invalid_rule(
                    &rule.id,
                    format!("kind '{}' is reserved", rule.kind),
                ));
            }
            if rule.version == 0 {
                return Err(AssayError::invalid_rule(&rule.id, "version must be at least 1"));
            }
            if !keys.insert((rule.id.as_str(), rule.version)) {
                return Err(AssayError::invalid_rule(
                    &rule.id,
                    format!("duplicate definition of version {}", rule.version),
                ));
            }
            if rule.fields.is_empty() {
                return Err(AssayError::invalid_rule(&rule.id, "no target fields"));
            }
            if let Some(field) = rule.fields.iter().find(|f| !names.contains(f.as_str())) {
                return Err(AssayError::invalid_rule(
                    &rule.id,
                    format!("unknown field reference '{}'", field),
                ));
            }
        }

        Ok(())
    }

    /// SHA-256 over the canonical serialized document.
    pub fn digest(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(format!("sha256:{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> serde_json::Value {
        json!({
            "version": "2024.06-r3",
            "fields": [
                {"name": "age", "type": "integer", "required": true},
                {"name": "gender", "type": "string", "required": true}
            ],
            "cohorts": {"age_band": {"field": "age", "bands": [0, 18, 65, 130]}},
            "rules": [
                {"id": "age.physiological", "domain": "demographics", "field": "age",
                 "kind": "range", "parameters": {"min": 0, "max": 120}, "severity": "CRITICAL"}
            ]
        })
    }

    fn parse(value: serde_json::Value) -> RuleSetDocument {
        RuleSetDocument::from_json(&value.to_string()).unwrap()
    }

    #[test]
    fn test_valid_document() {
        let doc = parse(document());
        assert!(doc.validate().is_ok());
        assert_eq!(doc.cohorts["age_band"].field, "age");
    }

    #[test]
    fn test_duplicate_rule_version() {
        let mut value = document();
        let rule = value["rules"][0].clone();
        value["rules"].as_array_mut().unwrap().push(rule);
        assert!(matches!(
            parse(value).validate(),
            Err(AssayError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_unknown_field_reference() {
        let mut value = document();
        value["rules"][0]["field"] = json!("weight");
        let err = parse(value).validate().unwrap_err();
        assert!(err.to_string().contains("unknown field reference 'weight'"));
    }

    #[test]
    fn test_reserved_prefix() {
        let mut value = document();
        value["rules"][0]["id"] = json!("schema.age");
        assert!(parse(value).validate().is_err());
    }

    #[test]
    fn test_cohort_on_undeclared_field() {
        let mut value = document();
        value["cohorts"]["unit"] = json!({"field": "care_unit"});
        assert!(parse(value).validate().is_err());
    }

    #[test]
    fn test_empty_version() {
        let mut value = document();
        value["version"] = json!(" ");
        assert!(parse(value).validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        assert!(matches!(
            RuleSetDocument::from_json("{\"version\": 1"),
            Err(AssayError::Config(_))
        ));
    }

    #[test]
    fn test_digest_is_stable() {
        let a = parse(document());
        let b = parse(document());
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());

        let mut value = document();
        value["rules"][0]["parameters"]["max"] = json!(121);
        assert_ne!(a.digest().unwrap(), parse(value).digest().unwrap());
    }
}
