use std::sync::Arc;

use metrics_usage_stats::StandardGauge;

use super::Metric;
use crate::{kind::MetricKind, registry::Lease};

/// A handle to a registered gauge.
pub struct Gauge {
    inner: Arc<StandardGauge>,
    lease: Lease,
}

impl Gauge {
    pub(crate) fn new(inner: Arc<StandardGauge>, lease: Lease) -> Self {
        Self { inner, lease }
    }

    /// Sets the gauge to `value`.
    pub fn update(&self, value: i64) {
        self.inner.update(value);
    }

    /// Gets the current value of the gauge.
    pub fn value(&self) -> i64 {
        self.inner.value()
    }
}

impl Metric for Gauge {
    fn name(&self) -> &str {
        self.lease.name()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Gauge
    }

    fn dispose(&self) {
        self.lease.release();
    }
}
