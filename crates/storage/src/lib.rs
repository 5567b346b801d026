//! Metric store abstraction and its two backends.
//!
//! Handlers consume the [`MetricStore`] trait polymorphically; the
//! in-memory and PostgreSQL variants are interchangeable. Every call
//! into a store goes through the [`retry::Retrier`] wrapper.

pub mod memory;
pub mod postgres;
pub mod retry;

use async_trait::async_trait;

use pulse_core::{Metric, MetricKind, MetricValue, PulseError};

/// Capability set of a metric store.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Write a single metric. Gauges replace, counters accumulate.
    /// Writing the other kind for an existing id fails with
    /// [`PulseError::WrongMetricType`].
    async fn write_metric(&self, id: &str, value: MetricValue) -> Result<(), PulseError>;

    /// Write a batch. All-or-nothing against the SQL backend; the
    /// in-memory backend logs and skips kind-conflicting entries.
    async fn write_batch(&self, metrics: &[Metric]) -> Result<(), PulseError>;

    /// Point read. [`PulseError::NoValue`] when the id is absent for
    /// the requested kind.
    async fn get_metric(&self, kind: MetricKind, id: &str) -> Result<MetricValue, PulseError>;

    /// Deterministically formatted listing: counters sorted by id, then
    /// gauges sorted by id, with section headers.
    async fn get_all_text(&self) -> Result<String, PulseError>;

    /// Liveness of the backend.
    async fn ping(&self) -> Result<(), PulseError>;
}

/// Render the listing sections from already-sorted entries.
///
/// Shared by both backends so `/` output is bit-identical regardless
/// of the configured store.
pub(crate) fn render_listing(counters: &[(String, i64)], gauges: &[(String, f64)]) -> String {
    let mut out = String::from("---Counters---\n");
    for (id, delta) in counters {
        out.push_str(&format!("{}: {}\n", id, delta));
    }
    out.push_str("---Gauge---\n");
    for (id, value) in gauges {
        out.push_str(&format!("{}: {}\n", id, value));
    }
    out
}
