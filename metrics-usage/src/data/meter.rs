use std::sync::Arc;

use metrics_usage_stats::{RateSnapshot, StandardMeter};

use super::Metric;
use crate::{kind::MetricKind, registry::Lease};

/// A handle to a registered meter.
pub struct Meter {
    inner: Arc<StandardMeter>,
    lease: Lease,
}

impl Meter {
    pub(crate) fn new(inner: Arc<StandardMeter>, lease: Lease) -> Self {
        Self { inner, lease }
    }

    /// Records `events` occurrences.
    ///
    /// Ignored once the meter has been stopped.
    pub fn mark(&self, events: u64) {
        self.inner.mark(events);
    }

    /// Takes a frozen snapshot of the meter's count and rates.
    pub fn snapshot(&self) -> RateSnapshot {
        self.inner.snapshot()
    }
}

delegate_rates!(Meter => StandardMeter, inner);

impl Metric for Meter {
    fn name(&self) -> &str {
        self.lease.name()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Meter
    }

    fn dispose(&self) {
        self.lease.release();
    }

    fn stop(&self) {
        self.inner.stop();
    }
}
