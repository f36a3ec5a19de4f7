//! Run results: scoring, grouping and summaries.

mod aggregator;

pub use aggregator::{
    QcResult, QcSummary, ResultAggregator, RunInfo, RunStatus, SeverityCounts, SeverityWeights,
};
