//! The bounded in-memory metrics ring (spec §4.D) and its aggregation
//! queries.

use crate::run_metrics::RunMetrics;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[cfg(feature = "tracing")]
use tracing::debug;

/// Default maximum number of retained metrics.
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// Default maximum age a retained metric is kept for.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Minimum spacing between eviction sweeps (spec §4.D).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A [`RunMetrics`] tagged with the unix-second timestamp it was ingested
/// at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMetric {
    /// The submitted run metrics.
    pub metric: RunMetrics,
    /// When the coordinator received this metric.
    pub ingested_at: i64,
}

/// Count- and count/success-rate summary over a range of stored metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedStats {
    /// Number of runs in the queried range.
    pub total_runs: u64,
    /// Number of those runs whose `final_status` was `Succeeded`.
    pub successful_runs: u64,
    /// Number of those runs whose `final_status` was `Failed`.
    pub failed_runs: u64,
    /// `successful_runs / total_runs`, or `0.0` if `total_runs` is zero.
    pub success_rate: f64,
    /// Mean `total_attempts` across the range.
    pub avg_attempts: f64,
    /// Mean `total_duration_seconds` across the range.
    pub avg_duration_seconds: f64,
    /// Up to 10 most frequently run commands, by `command_hash`, with
    /// their occurrence count, most frequent first.
    pub top_commands: Vec<(String, u64)>,
    /// Run counts bucketed by the hour (unix seconds, floored to 3600) the
    /// run was ingested in.
    pub hourly_counts: HashMap<i64, u64>,
}

struct Inner {
    entries: VecDeque<StoredMetric>,
    max_size: usize,
    max_age: Duration,
    cleanup_interval: Duration,
    last_cleanup: Instant,
}

impl Inner {
    fn evict(&mut self, now_unix: i64) {
        let cutoff = now_unix.saturating_sub(self.max_age.as_secs() as i64);
        while let Some(front) = self.entries.front() {
            if front.ingested_at < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        while self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
    }
}

/// The coordinator's bounded metrics ring. Oldest entries are evicted once
/// either `max_size` or `max_age` is exceeded; a sweep runs at most once
/// per `cleanup_interval` (default 5 minutes) to keep `store` cheap under
/// load, per spec §4.D.
pub struct MetricsStore {
    inner: RwLock<Inner>,
}

impl MetricsStore {
    /// Creates an empty store with the given caps.
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        Self::with_cleanup_interval(max_size, max_age, DEFAULT_CLEANUP_INTERVAL)
    }

    /// Creates an empty store with an explicit cleanup-sweep spacing.
    pub fn with_cleanup_interval(max_size: usize, max_age: Duration, cleanup_interval: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: VecDeque::new(),
                max_size,
                max_age,
                cleanup_interval,
                last_cleanup: Instant::now() - cleanup_interval,
            }),
        }
    }

    /// Stores a submitted run at `ingested_at` (unix seconds), evicting
    /// stale/excess entries first if the cleanup interval has elapsed.
    pub async fn store(&self, metric: RunMetrics, ingested_at: i64) {
        let mut inner = self.inner.write().await;
        if inner.last_cleanup.elapsed() >= inner.cleanup_interval {
            inner.evict(ingested_at);
            inner.last_cleanup = Instant::now();
        }
        inner.entries.push_back(StoredMetric { metric, ingested_at });
        // Always enforce max_size immediately: waiting for the next sweep
        // would let the ring grow unbounded under sustained load.
        while inner.entries.len() > inner.max_size {
            inner.entries.pop_front();
        }

        #[cfg(feature = "tracing")]
        debug!(size = inner.entries.len(), "stored run metrics");
    }

    /// Returns the `n` most recently ingested metrics, newest last.
    pub async fn get_recent(&self, n: usize) -> Vec<StoredMetric> {
        let inner = self.inner.read().await;
        let len = inner.entries.len();
        let start = len.saturating_sub(n);
        inner.entries.iter().skip(start).cloned().collect()
    }

    /// Returns metrics ingested in the half-open range `[start, end)`.
    pub async fn get_by_range(&self, start: i64, end: i64) -> Vec<StoredMetric> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .filter(|e| e.ingested_at >= start && e.ingested_at < end)
            .cloned()
            .collect()
    }

    /// Computes [`AggregatedStats`] over the half-open range `[start, end)`
    /// in a single pass. Running sum/count formulas are used for the
    /// averages rather than collecting per-value arrays; the per-command
    /// and per-hour counts are transient `HashMap`s built for this call
    /// only, not retained between queries.
    pub async fn aggregated_stats(&self, start: i64, end: i64) -> AggregatedStats {
        let inner = self.inner.read().await;

        let mut total_runs = 0u64;
        let mut successful_runs = 0u64;
        let mut failed_runs = 0u64;
        let mut attempts_sum = 0f64;
        let mut duration_sum = 0f64;
        let mut command_counts: HashMap<String, u64> = HashMap::new();
        let mut hourly_counts: HashMap<i64, u64> = HashMap::new();

        for entry in inner
            .entries
            .iter()
            .filter(|e| e.ingested_at >= start && e.ingested_at < end)
        {
            total_runs += 1;
            match entry.metric.final_status {
                crate::run_metrics::FinalStatus::Succeeded => successful_runs += 1,
                crate::run_metrics::FinalStatus::Failed => failed_runs += 1,
            }
            attempts_sum += entry.metric.total_attempts as f64;
            duration_sum += entry.metric.total_duration_seconds;

            *command_counts
                .entry(entry.metric.command_hash.clone())
                .or_insert(0) += 1;

            let hour_bucket = entry.ingested_at - entry.ingested_at.rem_euclid(3600);
            *hourly_counts.entry(hour_bucket).or_insert(0) += 1;
        }

        let (avg_attempts, avg_duration_seconds) = if total_runs == 0 {
            (0.0, 0.0)
        } else {
            (
                attempts_sum / total_runs as f64,
                duration_sum / total_runs as f64,
            )
        };
        let success_rate = if total_runs == 0 {
            0.0
        } else {
            successful_runs as f64 / total_runs as f64
        };

        let mut top_commands: Vec<(String, u64)> = command_counts.into_iter().collect();
        top_commands.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_commands.truncate(10);

        AggregatedStats {
            total_runs,
            successful_runs,
            failed_runs,
            success_rate,
            avg_attempts,
            avg_duration_seconds,
            top_commands,
            hourly_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_metrics::{command_hash, AttemptRecord, FinalStatus};

    fn metric(command: &str) -> RunMetrics {
        RunMetrics {
            command: command.to_string(),
            command_hash: command_hash(&[command.to_string()]),
            final_status: FinalStatus::Succeeded,
            total_duration_seconds: 1.0,
            total_attempts: 1,
            successful_attempts: 1,
            failed_attempts: 0,
            attempts: vec![AttemptRecord {
                duration: 1.0,
                exit_code: Some(0),
                success: true,
                timestamp: 0,
            }],
        }
    }

    /// Scenario 5 — max_size=2, storing three metrics at t, t+1, t+2 leaves
    /// only the last two retrievable.
    #[tokio::test]
    async fn scenario_5_metrics_eviction() {
        let store = MetricsStore::new(2, Duration::from_secs(3600));
        store.store(metric("a"), 1_000).await;
        store.store(metric("b"), 1_001).await;
        store.store(metric("c"), 1_002).await;

        let recent = store.get_recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].ingested_at, 1_001);
        assert_eq!(recent[1].ingested_at, 1_002);
    }

    #[tokio::test]
    async fn store_never_exceeds_max_size() {
        let store = MetricsStore::new(5, Duration::from_secs(3600));
        for i in 0..50 {
            store.store(metric("cmd"), 1_000 + i).await;
        }
        let recent = store.get_recent(100).await;
        assert_eq!(recent.len(), 5);
    }

    #[tokio::test]
    async fn get_by_range_is_half_open() {
        let store = MetricsStore::new(100, Duration::from_secs(3600));
        store.store(metric("a"), 10).await;
        store.store(metric("b"), 20).await;
        store.store(metric("c"), 30).await;

        let range = store.get_by_range(10, 30).await;
        let timestamps: Vec<i64> = range.iter().map(|e| e.ingested_at).collect();
        assert_eq!(timestamps, vec![10, 20]);
    }

    #[tokio::test]
    async fn aggregated_stats_computes_rates_and_averages() {
        let store = MetricsStore::new(100, Duration::from_secs(3600));
        let mut failed = metric("x");
        failed.final_status = FinalStatus::Failed;
        failed.total_attempts = 3;
        failed.total_duration_seconds = 5.0;
        store.store(metric("x"), 0).await;
        store.store(failed, 1).await;

        let stats = store.aggregated_stats(0, 1000).await;
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.avg_attempts, 2.0);
        assert_eq!(stats.avg_duration_seconds, 3.0);
    }

    #[tokio::test]
    async fn aggregated_stats_ranks_top_commands_by_count() {
        let store = MetricsStore::new(100, Duration::from_secs(3600));
        store.store(metric("a"), 0).await;
        store.store(metric("a"), 1).await;
        store.store(metric("b"), 2).await;

        let stats = store.aggregated_stats(0, 1000).await;
        let hash_a = command_hash(&["a".to_string()]);
        assert_eq!(stats.top_commands[0].0, hash_a);
        assert_eq!(stats.top_commands[0].1, 2);
    }
}
