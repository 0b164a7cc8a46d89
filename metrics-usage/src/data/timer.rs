use std::{sync::Arc, time::Duration};

use metrics_usage_stats::{
    DistributionSnapshot, Instant, RateSnapshot, StandardHistogram, StandardMeter, StandardTimer,
};

use super::Metric;
use crate::{kind::MetricKind, registry::Lease};

/// A handle to a registered timer.
///
/// Durations are recorded in nanoseconds. Every recorded duration also marks the timer's meter,
/// so a timer reports how long things took as well as how often they happened.
pub struct Timer {
    inner: Arc<StandardTimer>,
    lease: Lease,
}

impl Timer {
    pub(crate) fn new(inner: Arc<StandardTimer>, lease: Lease) -> Self {
        Self { inner, lease }
    }

    /// Records a duration.
    pub fn update(&self, duration: Duration) {
        self.inner.update(duration);
    }

    /// Records the time elapsed since `start`, as measured by the registry's clock.
    pub fn update_since(&self, start: Instant) {
        self.inner.update_since(start);
    }

    /// Runs `f`, recording how long it took.
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.inner.time(f)
    }

    /// Gets the current time according to the registry's clock, for use with
    /// [`update_since`](Timer::update_since).
    pub fn now(&self) -> Instant {
        self.inner.now()
    }

    /// Discards every recorded duration, for every handle sharing this timer.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Gets the number of durations recorded.
    pub fn count(&self) -> u64 {
        <StandardHistogram as metrics_usage_stats::Distribution>::count(self.inner.distribution())
    }

    /// Takes a frozen snapshot of the timer.
    pub fn create_snapshot(&self) -> TimerSnapshot {
        let (distribution, rates) = self.inner.snapshot();
        TimerSnapshot::new(self.lease.name().to_owned(), distribution, rates)
    }
}

delegate_distribution!(Timer => StandardHistogram, inner.distribution());
delegate_rates!(Timer => StandardMeter, inner.rates());

impl Metric for Timer {
    fn name(&self) -> &str {
        self.lease.name()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Timer
    }

    fn dispose(&self) {
        self.lease.release();
    }

    fn stop(&self) {
        self.inner.stop();
    }
}

/// A frozen, read-only view of a timer.
///
/// Updating, clearing or disposing a snapshot does nothing.
#[derive(Clone, Debug)]
pub struct TimerSnapshot {
    name: Arc<str>,
    distribution: DistributionSnapshot,
    rates: RateSnapshot,
}

impl TimerSnapshot {
    pub(crate) fn new(
        name: String,
        distribution: DistributionSnapshot,
        rates: RateSnapshot,
    ) -> Self {
        Self { name: name.into(), distribution, rates }
    }

    /// Does nothing.
    pub fn update(&self, _duration: Duration) {}

    /// Does nothing.
    pub fn clear(&self) {}

    /// Returns a snapshot sharing the same frozen data.
    pub fn create_snapshot(&self) -> TimerSnapshot {
        self.clone()
    }

    /// Gets the number of durations recorded.
    pub fn count(&self) -> u64 {
        <DistributionSnapshot as metrics_usage_stats::Distribution>::count(&self.distribution)
    }

    /// Gets the frozen distribution of durations, in nanoseconds.
    pub fn distribution(&self) -> &DistributionSnapshot {
        &self.distribution
    }

    /// Gets the frozen rates.
    pub fn rates(&self) -> &RateSnapshot {
        &self.rates
    }
}

delegate_distribution!(TimerSnapshot => DistributionSnapshot, distribution);
delegate_rates!(TimerSnapshot => RateSnapshot, rates);

impl Metric for TimerSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Timer
    }

    fn dispose(&self) {}
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use metrics_usage_stats::{Clock, Distribution, Rates};

    use crate::{data::Metric as _, Registry};

    #[test]
    fn timed_block_uses_registry_clock() {
        let (clock, mock) = Clock::mock();
        let registry = Registry::builder("test").with_clock(clock).build().expect("valid");
        let timer = registry.timer("handler");

        timer.update(Duration::from_secs(3));
        timer.time(|| mock.increment(Duration::from_secs(1)));

        assert_eq!(timer.count(), 2);
        assert_eq!(Distribution::max(&timer), 3_000_000_000);
        assert_eq!(Distribution::min(&timer), 1_000_000_000);
        assert_eq!(Rates::count(&timer), 2);
    }

    #[test]
    fn snapshot_is_frozen() {
        let registry = Registry::new("test");
        let timer = registry.timer("handler");
        timer.update(Duration::from_millis(20));

        let snapshot = timer.create_snapshot();
        timer.update(Duration::from_millis(40));
        snapshot.update(Duration::from_secs(1));
        snapshot.dispose();

        assert_eq!(snapshot.count(), 1);
        assert_eq!(Distribution::max(&snapshot), 20_000_000);
        assert_eq!(Rates::count(&snapshot), 1);
        assert_eq!(timer.count(), 2);
        assert!(registry.is_valid_metric("handler"));
    }

    #[test]
    fn stop_ends_rate_tracking() {
        let registry = Registry::new("test");
        let timer = registry.timer("handler");

        timer.update(Duration::from_millis(1));
        timer.stop();
        timer.update(Duration::from_millis(1));

        assert_eq!(timer.count(), 2);
        assert_eq!(Rates::count(&timer), 1);
    }
}
