//! Cohort grouping and the per-run baseline set.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AssayError, Result};
use crate::record::Record;

use super::baseline::BaselineStats;
use super::detector::StatisticalAnomalyDetector;

/// Grouping name used by rules without a cohort.
pub const ALL_COHORT: &str = "all";
/// Label for records whose grouping key is missing or out of band.
pub const UNASSIGNED_COHORT: &str = "unassigned";

/// How records are grouped into cohorts for one grouping key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortSpec {
    /// Field supplying the grouping key.
    pub field: String,
    /// Ascending band edges for numeric keys; each band is `[lo, hi)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bands: Option<Vec<f64>>,
}

impl CohortSpec {
    /// Check that band edges are finite and strictly ascending.
    pub fn validate(&self, name: &str) -> Result<()> {
        if let Some(ref bands) = self.bands {
            if bands.len() < 2 {
                return Err(AssayError::config(format!(
                    "cohort '{}' needs at least two band edges",
                    name
                )));
            }
            if bands.iter().any(|b| !b.is_finite()) || bands.windows(2).any(|w| w[0] >= w[1]) {
                return Err(AssayError::config(format!(
                    "cohort '{}' band edges must be finite and strictly ascending",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Cohort label for a record.
    pub fn label(&self, record: &Record) -> String {
        let Some(value) = record.get(&self.field) else {
            return UNASSIGNED_COHORT.to_string();
        };

        match self.bands {
            Some(ref edges) => {
                let Some(v) = value.as_f64() else {
                    return UNASSIGNED_COHORT.to_string();
                };
                edges
                    .windows(2)
                    .find(|w| v >= w[0] && v < w[1])
                    .map(|w| format!("[{}, {})", w[0], w[1]))
                    .unwrap_or_else(|| UNASSIGNED_COHORT.to_string())
            }
            None => value.as_text().trim().to_string(),
        }
    }
}

/// A (field, grouping) pair that needs baselines.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BaselineTarget {
    pub field: String,
    /// Cohort definition name, or `None` for a single `"all"` cohort.
    pub grouping: Option<String>,
}

impl BaselineTarget {
    pub fn grouping_name(&self) -> &str {
        self.grouping.as_deref().unwrap_or(ALL_COHORT)
    }
}

/// Resolve a record's cohort label for a grouping.
pub fn cohort_label(
    record: &Record,
    grouping: Option<&str>,
    cohorts: &IndexMap<String, CohortSpec>,
) -> String {
    match grouping.and_then(|g| cohorts.get(g)) {
        Some(spec) => spec.label(record),
        None => ALL_COHORT.to_string(),
    }
}

/// Baselines for every (field, grouping, cohort) used by a run.
///
/// Built once before any statistical evaluation and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSet {
    computed_at: Option<DateTime<Utc>>,
    baselines: IndexMap<String, BaselineStats>,
}

impl BaselineSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(field: &str, grouping: &str, cohort: &str) -> String {
        format!("{}|{}|{}", field, grouping, cohort)
    }

    /// Compute baselines for the given targets from a record snapshot.
    ///
    /// Output order is sorted by target then cohort label, so the same
    /// snapshot and configuration always produce the same set.
    pub fn compute<'a>(
        records: impl IntoIterator<Item = &'a Record>,
        targets: &[BaselineTarget],
        cohorts: &IndexMap<String, CohortSpec>,
        detector: &StatisticalAnomalyDetector,
        computed_at: DateTime<Utc>,
    ) -> Self {
        let records: Vec<&Record> = records.into_iter().collect();
        let mut targets = targets.to_vec();
        targets.sort();
        targets.dedup();

        let mut baselines = IndexMap::new();
        for target in &targets {
            let grouping = target.grouping_name();
            let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();

            for record in &records {
                let Some(v) = record.get(&target.field).and_then(|v| v.as_f64()) else {
                    continue;
                };
                let label = cohort_label(record, target.grouping.as_deref(), cohorts);
                groups.entry(label).or_default().push(v);
            }

            for (label, values) in groups {
                let stats =
                    detector.compute_baseline(&target.field, grouping, &label, &values, computed_at);
                baselines.insert(Self::key(&target.field, grouping, &label), stats);
            }
        }

        tracing::debug!(count = baselines.len(), "computed baselines");

        Self {
            computed_at: Some(computed_at),
            baselines,
        }
    }

    /// Add or replace a single baseline.
    pub fn insert(&mut self, stats: BaselineStats) {
        let key = Self::key(&stats.field, &stats.grouping, &stats.cohort);
        self.baselines.insert(key, stats);
    }

    pub fn get(&self, field: &str, grouping: &str, cohort: &str) -> Option<&BaselineStats> {
        self.baselines.get(&Self::key(field, grouping, cohort))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BaselineStats> {
        self.baselines.values()
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    pub fn computed_at(&self) -> Option<DateTime<Utc>> {
        self.computed_at
    }

    /// Save the set to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            AssayError::Persistence(format!(
                "Failed to create file '{}': {}",
                path.display(),
                e
            ))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).map_err(|e| {
            AssayError::Persistence(format!("Failed to serialize baselines: {}", e))
        })
    }

    /// Load a set saved with [`BaselineSet::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            AssayError::Persistence(format!(
                "Failed to open file '{}': {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            AssayError::Persistence(format!(
                "Failed to parse baselines '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
