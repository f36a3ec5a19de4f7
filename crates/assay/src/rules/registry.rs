//! Loads, validates and indexes rule definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use indexmap::IndexMap;

use crate::error::Result;
use crate::stats::{BaselineTarget, CohortSpec};

use super::context::BuildContext;
use super::definition::{FieldSpec, RuleDefinition, UNPARSEABLE_RULE_ID};
use super::document::RuleSetDocument;
use super::kinds::{Rule, RuleFactory, SchemaRule};

/// An immutable, validated rule set ready for evaluation.
///
/// Holds every published version of every rule. Only the highest enabled
/// version of each id is compiled and evaluated; the rest stay resolvable so
/// historical findings keep their lineage.
pub struct RuleRegistry {
    version: String,
    digest: String,
    fields: IndexMap<String, FieldSpec>,
    cohorts: IndexMap<String, CohortSpec>,
    /// All versions per rule id, ascending by version.
    history: BTreeMap<String, Vec<RuleDefinition>>,
    /// Compiled active rules in evaluation order.
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    /// Load a document with the built-in rule kinds.
    pub fn load(document: RuleSetDocument) -> Result<Self> {
        Self::load_with(document, &RuleFactory::default())
    }

    /// Load a document from a JSON file with the built-in rule kinds.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(RuleSetDocument::load(path)?)
    }

    /// Load a document, building rules through the given factory.
    ///
    /// Any violation aborts construction; no partially loaded registry is
    /// ever returned.
    pub fn load_with(document: RuleSetDocument, factory: &RuleFactory) -> Result<Self> {
        document.validate()?;
        let digest = document.digest()?;

        let fields: IndexMap<String, FieldSpec> = document
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.clone()))
            .collect();
        let ctx = BuildContext {
            fields: &fields,
            cohorts: &document.cohorts,
        };

        let mut history: BTreeMap<String, Vec<RuleDefinition>> = BTreeMap::new();
        let mut compiled: BTreeMap<String, (u32, Box<dyn Rule>)> = BTreeMap::new();

        for definition in &document.rules {
            // Every version must compile, even ones that will never run.
            let rule = factory.build(definition, &ctx)?;
            history
                .entry(definition.id.clone())
                .or_default()
                .push(definition.clone());

            if !definition.enabled {
                continue;
            }
            let newer = compiled
                .get(&definition.id)
                .is_none_or(|(version, _)| definition.version > *version);
            if newer {
                compiled.insert(definition.id.clone(), (definition.version, rule));
            }
        }

        for versions in history.values_mut() {
            versions.sort_by_key(|d| d.version);
        }

        let mut rules: Vec<Box<dyn Rule>> = document
            .fields
            .iter()
            .map(|spec| Box::new(SchemaRule::new(spec)) as Box<dyn Rule>)
            .collect();
        for spec in &document.fields {
            let schema = RuleDefinition::schema_for(spec);
            history.insert(schema.id.clone(), vec![schema]);
        }
        rules.extend(compiled.into_values().map(|(_, rule)| rule));
        rules.sort_by(|a, b| {
            let (da, db) = (a.definition(), b.definition());
            (a.phase(), da.priority, &da.id).cmp(&(b.phase(), db.priority, &db.id))
        });

        tracing::debug!(
            version = %document.version,
            rules = rules.len(),
            fields = fields.len(),
            "loaded rule set"
        );

        Ok(Self {
            version: document.version,
            digest,
            fields,
            cohorts: document.cohorts,
            history,
            rules,
        })
    }

    /// Revision tag of the loaded document.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Content digest of the loaded document.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn fields(&self) -> &IndexMap<String, FieldSpec> {
        &self.fields
    }

    pub fn cohorts(&self) -> &IndexMap<String, CohortSpec> {
        &self.cohorts
    }

    /// Compiled active rules in evaluation order: phase, then priority, then id.
    pub fn rules(&self) -> &[Box<dyn Rule>] {
        &self.rules
    }

    /// Active definitions for a domain, ordered by priority then id.
    pub fn lookup(&self, domain: &str) -> Vec<&RuleDefinition> {
        let mut found: Vec<&RuleDefinition> = self
            .rules
            .iter()
            .map(|r| r.definition())
            .filter(|d| d.domain == domain)
            .collect();
        found.sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));
        found
    }

    /// Distinct domains of the active rules, sorted.
    pub fn domains(&self) -> Vec<&str> {
        let mut domains: Vec<&str> = self.rules.iter().map(|r| r.definition().domain.as_str()).collect();
        domains.sort_unstable();
        domains.dedup();
        domains
    }

    /// Resolve an exact revision, including disabled and superseded ones.
    pub fn definition(&self, id: &str, version: u32) -> Option<&RuleDefinition> {
        if id == UNPARSEABLE_RULE_ID && version == 1 {
            return Some(RuleDefinition::unparseable());
        }
        self.history
            .get(id)
            .and_then(|versions| versions.iter().find(|d| d.version == version))
    }

    /// Every published version of a rule, oldest first.
    pub fn history(&self, id: &str) -> &[RuleDefinition] {
        self.history.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The active revision of a rule, if it is enabled.
    pub fn active(&self, id: &str) -> Option<&RuleDefinition> {
        self.rules
            .iter()
            .map(|r| r.definition())
            .find(|d| d.id == id)
    }

    /// (field, grouping) pairs the active statistical rules need baselines for.
    pub fn baseline_targets(&self) -> Vec<BaselineTarget> {
        let mut targets: Vec<BaselineTarget> =
            self.rules.iter().filter_map(|r| r.baseline_target()).collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("version", &self.version)
            .field("digest", &self.digest)
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssayError;
    use crate::validation::Phase;
    use serde_json::json;

    fn document(rules: serde_json::Value) -> RuleSetDocument {
        serde_json::from_value(json!({
            "version": "r1",
            "fields": [
                {"name": "age", "type": "integer", "required": true},
                {"name": "sbp", "type": "float"},
                {"name": "gender", "type": "string", "required": true}
            ],
            "rules": rules
        }))
        .unwrap()
    }

    #[test]
    fn test_lookup_orders_by_priority_then_id() {
        let registry = RuleRegistry::load(document(json!([
            {"id": "b.rule", "domain": "vitals", "field": "sbp", "kind": "range",
             "parameters": {"max": 180}, "severity": "WARNING", "priority": 10},
            {"id": "a.rule", "domain": "vitals", "field": "sbp", "kind": "range",
             "parameters": {"max": 250}, "severity": "ERROR", "priority": 10},
            {"id": "c.rule", "domain": "vitals", "field": "sbp", "kind": "range",
             "parameters": {"min": 40}, "severity": "ERROR", "priority": 1}
        ])))
        .unwrap();

        let ids: Vec<&str> = registry.lookup("vitals").iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c.rule", "a.rule", "b.rule"]);
    }

    #[test]
    fn test_highest_enabled_version_is_active() {
        let registry = RuleRegistry::load(document(json!([
            {"id": "age.range", "domain": "d", "field": "age", "kind": "range",
             "parameters": {"max": 120}, "severity": "ERROR", "version": 1},
            {"id": "age.range", "domain": "d", "field": "age", "kind": "range",
             "parameters": {"max": 110}, "severity": "ERROR", "version": 2},
            {"id": "age.range", "domain": "d", "field": "age", "kind": "range",
             "parameters": {"max": 100}, "severity": "ERROR", "version": 3, "enabled": false}
        ])))
        .unwrap();

        assert_eq!(registry.active("age.range").unwrap().version, 2);
        assert_eq!(registry.history("age.range").len(), 3);
        assert!(registry.definition("age.range", 3).is_some());
        assert!(registry.definition("age.range", 4).is_none());
    }

    #[test]
    fn test_schema_rules_run_first() {
        let registry = RuleRegistry::load(document(json!([
            {"id": "age.range", "domain": "d", "field": "age", "kind": "range",
             "parameters": {"max": 120}, "severity": "ERROR", "priority": -5}
        ])))
        .unwrap();

        let phases: Vec<Phase> = registry.rules().iter().map(|r| r.phase()).collect();
        assert_eq!(phases[..3], [Phase::Schema, Phase::Schema, Phase::Schema]);
        assert_eq!(phases[3], Phase::Business);
        assert!(registry.definition("schema.gender", 1).is_some());
        assert!(registry.definition(UNPARSEABLE_RULE_ID, 1).is_some());
    }

    #[test]
    fn test_invalid_parameters_in_old_version_fail_load() {
        let result = RuleRegistry::load(document(json!([
            {"id": "age.range", "domain": "d", "field": "age", "kind": "range",
             "parameters": {"min": 5, "max": 1}, "severity": "ERROR", "version": 1, "enabled": false},
            {"id": "age.range", "domain": "d", "field": "age", "kind": "range",
             "parameters": {"max": 120}, "severity": "ERROR", "version": 2}
        ])));
        assert!(matches!(result, Err(AssayError::InvalidRule { .. })));
    }

    #[test]
    fn test_unknown_kind_fails_load() {
        let result = RuleRegistry::load(document(json!([
            {"id": "x", "domain": "d", "field": "age", "kind": "script",
             "parameters": {"code": "rm -rf /"}, "severity": "ERROR"}
        ])));
        assert!(result.is_err());
    }

    #[test]
    fn test_disabled_rule_not_compiled() {
        let registry = RuleRegistry::load(document(json!([
            {"id": "age.range", "domain": "d", "field": "age", "kind": "range",
             "parameters": {"max": 120}, "severity": "ERROR", "enabled": false}
        ])))
        .unwrap();
        assert!(registry.active("age.range").is_none());
        assert!(registry.lookup("d").is_empty());
        assert_eq!(registry.history("age.range").len(), 1);
    }
}
