//! Metrics for monitoring slot ownership and rebalancing.
//!
//! In-process, Prometheus-style instruments:
//! - Counters for resolutions, publishes and rebalances
//! - Gauges for the observed epoch and Active node count
//! - Histograms for publish and rebalance latency
//!
//! # Example
//!
//! ```rust,ignore
//! use tenant_partition::metrics::PartitionMetrics;
//!
//! let metrics = PartitionMetrics::new();
//! metrics.record_publish_success(Duration::from_millis(3), 2, 3);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.epoch, 2);
//! ```

mod instruments;

pub use instruments::{Counter, Gauge, Histogram, HistogramSnapshot, LabeledCounter};

use crate::error::Error;
use crate::types::Epoch;
use std::time::Duration;

/// Latency buckets for coordination store round trips (in seconds).
pub const STORE_LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Latency buckets for whole rebalances, retries included (in seconds).
pub const REBALANCE_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Metrics for one node's view of the partitioned cluster.
#[derive(Debug)]
pub struct PartitionMetrics {
    // Resolution
    /// Tenant keys resolved to an owner.
    pub resolutions_total: Counter,
    /// Resolutions that hit a departing owner and re-synced.
    pub stale_owner_retries: Counter,
    /// Resolutions surfaced as `OwnerUnavailable`.
    pub owner_unavailable: Counter,

    // Publishing
    /// Publish attempts.
    pub publish_total: Counter,
    /// Publishes that lost the epoch race.
    pub publish_conflicts: Counter,
    /// Publishes rejected by validation.
    pub publish_rejected: Counter,
    /// Latency of successful publishes.
    pub publish_latency: Histogram,

    // Rebalancing
    /// Completed rebalances.
    pub rebalance_total: Counter,
    /// Rebalances that gave up.
    pub rebalance_failures: Counter,
    /// Slots that changed owner.
    pub slots_moved: Counter,
    /// Duration of completed rebalances.
    pub rebalance_duration: Histogram,

    // State
    /// Latest epoch observed.
    pub epoch: Gauge,
    /// Active nodes in the latest topology.
    pub active_nodes: Gauge,

    /// Errors by kind.
    pub errors: LabeledCounter<1>,
}

impl Default for PartitionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self {
            resolutions_total: Counter::new(
                "partition_resolutions_total",
                "Total tenant resolutions",
            ),
            stale_owner_retries: Counter::new(
                "partition_stale_owner_retries_total",
                "Resolutions retried after landing on a departing owner",
            ),
            owner_unavailable: Counter::new(
                "partition_owner_unavailable_total",
                "Resolutions failed with an unavailable owner",
            ),

            publish_total: Counter::new("partition_publish_total", "Total publish attempts"),
            publish_conflicts: Counter::new(
                "partition_publish_conflicts_total",
                "Publishes rejected with a stale epoch",
            ),
            publish_rejected: Counter::new(
                "partition_publish_rejected_total",
                "Publishes rejected as invalid topologies",
            ),
            publish_latency: Histogram::with_buckets(
                "partition_publish_duration_seconds",
                "Publish latency",
                STORE_LATENCY_BUCKETS.to_vec(),
            ),

            rebalance_total: Counter::new("partition_rebalance_total", "Completed rebalances"),
            rebalance_failures: Counter::new(
                "partition_rebalance_failures_total",
                "Failed rebalances",
            ),
            slots_moved: Counter::new(
                "partition_slots_moved_total",
                "Slots that changed owner",
            ),
            rebalance_duration: Histogram::with_buckets(
                "partition_rebalance_duration_seconds",
                "Rebalance duration",
                REBALANCE_LATENCY_BUCKETS.to_vec(),
            ),

            epoch: Gauge::new("partition_epoch", "Latest observed topology epoch"),
            active_nodes: Gauge::new("partition_active_nodes", "Active nodes"),

            errors: LabeledCounter::new("partition_errors_total", "Errors by kind", ["kind"]),
        }
    }

    /// Record a resolution.
    pub fn record_resolution(&self, stale_retry: bool) {
        self.resolutions_total.inc();
        if stale_retry {
            self.stale_owner_retries.inc();
        }
    }

    /// Record a successful publish.
    pub fn record_publish_success(&self, latency: Duration, epoch: Epoch, active_nodes: usize) {
        self.publish_total.inc();
        self.publish_latency.observe_duration(latency);
        self.record_topology(epoch, active_nodes);
    }

    /// Record a failed publish.
    pub fn record_publish_failure(&self, error: &Error) {
        self.publish_total.inc();
        match error {
            Error::StaleEpoch { .. } => self.publish_conflicts.inc(),
            Error::InvalidTopology(_) => self.publish_rejected.inc(),
            _ => {}
        }
        self.record_error(error);
    }

    /// Record the topology now in effect.
    pub fn record_topology(&self, epoch: Epoch, active_nodes: usize) {
        self.epoch.set(epoch as i64);
        self.active_nodes.set(active_nodes as i64);
    }

    /// Record a completed rebalance.
    pub fn record_rebalance(&self, churn: u64, duration: Duration) {
        self.rebalance_total.inc();
        self.slots_moved.inc_by(churn);
        self.rebalance_duration.observe_duration(duration);
    }

    /// Record a rebalance that gave up.
    pub fn record_rebalance_failure(&self, error: &Error) {
        self.rebalance_failures.inc();
        self.record_error(error);
    }

    /// Record an error.
    pub fn record_error(&self, error: &Error) {
        if let Error::OwnerUnavailable { .. } = error {
            self.owner_unavailable.inc();
        }
        self.errors.inc([error.kind()]);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            resolutions_total: self.resolutions_total.get(),
            stale_owner_retries: self.stale_owner_retries.get(),
            owner_unavailable: self.owner_unavailable.get(),
            publish_total: self.publish_total.get(),
            publish_conflicts: self.publish_conflicts.get(),
            publish_rejected: self.publish_rejected.get(),
            rebalance_total: self.rebalance_total.get(),
            rebalance_failures: self.rebalance_failures.get(),
            slots_moved: self.slots_moved.get(),
            epoch: self.epoch.get().max(0) as Epoch,
            active_nodes: self.active_nodes.get().max(0) as usize,
            publish_latency_mean: self.publish_latency.snapshot().mean(),
        }
    }
}

impl PartitionMetrics {
    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        macro_rules! add_counter {
            ($metric:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
                    $metric.name(),
                    $metric.help(),
                    $metric.name(),
                    $metric.name(),
                    $metric.get()
                ));
            };
        }

        macro_rules! add_gauge {
            ($metric:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
                    $metric.name(),
                    $metric.help(),
                    $metric.name(),
                    $metric.name(),
                    $metric.get()
                ));
            };
        }

        macro_rules! add_histogram {
            ($metric:expr) => {
                let name = $metric.name();
                let snap = $metric.snapshot();
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} histogram\n",
                    name,
                    $metric.help(),
                    name
                ));
                for (bound, count) in snap.bounds.iter().zip(&snap.bucket_counts) {
                    output.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bound, count));
                }
                output.push_str(&format!(
                    "{}_bucket{{le=\"+Inf\"}} {}\n{}_sum {}\n{}_count {}\n",
                    name,
                    snap.count,
                    name,
                    snap.sum.as_secs_f64(),
                    name,
                    snap.count
                ));
            };
        }

        // Counters
        add_counter!(self.resolutions_total);
        add_counter!(self.stale_owner_retries);
        add_counter!(self.owner_unavailable);
        add_counter!(self.publish_total);
        add_counter!(self.publish_conflicts);
        add_counter!(self.publish_rejected);
        add_counter!(self.rebalance_total);
        add_counter!(self.rebalance_failures);
        add_counter!(self.slots_moved);

        // Errors by kind, sorted for stable output
        let [label] = self.errors.label_names();
        output.push_str(&format!(
            "# HELP {} {}\n# TYPE {} counter\n",
            self.errors.name(),
            self.errors.help(),
            self.errors.name()
        ));
        let mut errors = self.errors.get_all();
        errors.sort();
        for ([kind], count) in errors {
            output.push_str(&format!("{}{{{}=\"{}\"}} {}\n", self.errors.name(), label, kind, count));
        }

        // Gauges
        add_gauge!(self.epoch);
        add_gauge!(self.active_nodes);

        // Histograms
        add_histogram!(self.publish_latency);
        add_histogram!(self.rebalance_duration);

        output
    }
}

/// Point-in-time copy of [`PartitionMetrics`].
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub resolutions_total: u64,
    pub stale_owner_retries: u64,
    pub owner_unavailable: u64,
    pub publish_total: u64,
    pub publish_conflicts: u64,
    pub publish_rejected: u64,
    pub rebalance_total: u64,
    pub rebalance_failures: u64,
    pub slots_moved: u64,
    pub epoch: Epoch,
    pub active_nodes: usize,
    pub publish_latency_mean: Duration,
}

impl MetricsSnapshot {
    /// Fraction of publish attempts that lost the epoch race.
    pub fn conflict_rate(&self) -> f64 {
        if self.publish_total == 0 {
            0.0
        } else {
            self.publish_conflicts as f64 / self.publish_total as f64
        }
    }
}
