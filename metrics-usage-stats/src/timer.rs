use std::time::Duration;

use quanta::{Clock, Instant};

use crate::{DistributionSnapshot, PercentileSource, RateSnapshot, StandardHistogram, StandardMeter};

/// A timer: a histogram of durations, in nanoseconds, and a meter of how often they occur.
pub struct StandardTimer {
    clock: Clock,
    histogram: StandardHistogram,
    meter: StandardMeter,
}

impl StandardTimer {
    /// Creates a new `StandardTimer` reading time from `clock`, with a histogram reservoir of
    /// `reservoir_size` samples.
    pub fn new(clock: Clock, reservoir_size: usize) -> Self {
        Self {
            histogram: StandardHistogram::new(reservoir_size),
            meter: StandardMeter::new(clock.clone()),
            clock,
        }
    }

    /// Records a duration.
    pub fn update(&self, duration: Duration) {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self.histogram.update(nanos);
        self.meter.mark(1);
    }

    /// Records the time elapsed since `start`.
    pub fn update_since(&self, start: Instant) {
        self.update(self.clock.now().saturating_duration_since(start));
    }

    /// Runs `f`, recording how long it took.
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = self.clock.now();
        let result = f();
        self.update_since(start);
        result
    }

    /// Gets the current time according to this timer's clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Discards every recorded duration. The meter is not reset.
    pub fn clear(&self) {
        self.histogram.clear();
    }

    /// Stops the timer's meter. Subsequent durations still reach the histogram but are no
    /// longer counted towards rates.
    pub fn stop(&self) {
        self.meter.stop();
    }

    /// Takes frozen snapshots of the duration distribution and the rates.
    pub fn snapshot(&self) -> (DistributionSnapshot, RateSnapshot) {
        (self.histogram.snapshot(), self.meter.snapshot())
    }

    /// Gets the live distribution of recorded durations.
    pub fn distribution(&self) -> &StandardHistogram {
        &self.histogram
    }

    /// Gets the live meter of recorded durations.
    pub fn rates(&self) -> &StandardMeter {
        &self.meter
    }
}

impl PercentileSource for StandardTimer {
    fn percentile(&self, quantile: f64) -> f64 {
        self.histogram.percentile(quantile)
    }

    fn percentiles(&self, quantiles: &[f64]) -> Vec<f64> {
        self.histogram.percentiles(quantiles)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quanta::Clock;

    use super::StandardTimer;
    use crate::{Distribution as _, Rates as _, DEFAULT_RESERVOIR_SIZE};

    #[test]
    fn fixed_and_timed_durations() {
        let (clock, mock) = Clock::mock();
        let timer = StandardTimer::new(clock, DEFAULT_RESERVOIR_SIZE);

        timer.update(Duration::from_secs(3));
        let value = timer.time(|| {
            mock.increment(Duration::from_secs(1));
            42
        });

        assert_eq!(value, 42);
        let (distribution, rates) = timer.snapshot();
        assert_eq!(distribution.count(), 2);
        assert_eq!(distribution.max(), 3_000_000_000);
        assert_eq!(distribution.min(), 1_000_000_000);
        assert_eq!(rates.count(), 2);
    }

    #[test]
    fn update_since() {
        let (clock, mock) = Clock::mock();
        let timer = StandardTimer::new(clock, DEFAULT_RESERVOIR_SIZE);

        let start = timer.now();
        mock.increment(Duration::from_millis(250));
        timer.update_since(start);

        assert_eq!(timer.distribution().max(), 250_000_000);
    }

    #[test]
    fn stop_freezes_rate_count() {
        let (clock, _mock) = Clock::mock();
        let timer = StandardTimer::new(clock, DEFAULT_RESERVOIR_SIZE);

        timer.update(Duration::from_millis(1));
        timer.stop();
        timer.update(Duration::from_millis(2));

        assert_eq!(timer.rates().count(), 1);
        assert_eq!(timer.distribution().count(), 2);
    }
}
