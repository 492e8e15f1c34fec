//! Module D: the coordinator's bounded run-metrics store (spec §3, §4.D).

mod run_metrics;
mod store;

pub use run_metrics::{command_hash, AttemptRecord, FinalStatus, RunMetrics};
pub use store::{
    AggregatedStats, MetricsStore, StoredMetric, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_AGE,
    DEFAULT_MAX_SIZE,
};
