use std::sync::Arc;

use metrics_usage_stats::{DistributionSnapshot, StandardHistogram};

use super::Metric;
use crate::{kind::MetricKind, registry::Lease};

/// A handle to a registered histogram.
pub struct Histogram {
    inner: Arc<StandardHistogram>,
    lease: Lease,
}

impl Histogram {
    pub(crate) fn new(inner: Arc<StandardHistogram>, lease: Lease) -> Self {
        Self { inner, lease }
    }

    /// Records a value.
    pub fn update(&self, value: i64) {
        self.inner.update(value);
    }

    /// Discards every recorded value, for every handle sharing this histogram.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Takes a frozen snapshot of the histogram.
    ///
    /// The snapshot is unaffected by later updates, and it is never registered, so disposing
    /// the snapshot and disposing this handle are independent of each other.
    pub fn create_snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot::new(self.lease.name().to_owned(), self.inner.snapshot())
    }
}

delegate_distribution!(Histogram => StandardHistogram, inner);

impl Metric for Histogram {
    fn name(&self) -> &str {
        self.lease.name()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Histogram
    }

    fn dispose(&self) {
        self.lease.release();
    }
}

/// A frozen, read-only view of a histogram.
///
/// Every value is computed once, when the snapshot is taken. Updating, clearing or disposing a
/// snapshot does nothing.
#[derive(Clone, Debug)]
pub struct HistogramSnapshot {
    name: Arc<str>,
    data: DistributionSnapshot,
}

impl HistogramSnapshot {
    pub(crate) fn new(name: String, data: DistributionSnapshot) -> Self {
        Self { name: name.into(), data }
    }

    /// Does nothing.
    pub fn update(&self, _value: i64) {}

    /// Does nothing.
    pub fn clear(&self) {}

    /// Returns a snapshot sharing the same frozen data.
    pub fn create_snapshot(&self) -> HistogramSnapshot {
        self.clone()
    }

    /// Gets the sampled values percentiles are computed from, in ascending order.
    pub fn sample(&self) -> &[i64] {
        self.data.sample()
    }
}

delegate_distribution!(HistogramSnapshot => DistributionSnapshot, data);

impl Metric for HistogramSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Histogram
    }

    fn dispose(&self) {}
}
