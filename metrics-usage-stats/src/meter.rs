//! Event rate meter.

use std::sync::atomic::{
    AtomicBool, AtomicU64,
    Ordering::{AcqRel, Acquire, Release},
};

use parking_lot::Mutex;
use quanta::{Clock, Instant};

use crate::{
    ewma::{Ewma, TICK_INTERVAL},
    Rates,
};

struct Averages {
    uncounted: u64,
    last_tick: Instant,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

impl Averages {
    fn new(now: Instant) -> Self {
        Self {
            uncounted: 0,
            last_tick: now,
            m1: Ewma::over_minutes(1.0),
            m5: Ewma::over_minutes(5.0),
            m15: Ewma::over_minutes(15.0),
        }
    }

    fn tick_if_necessary(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        let ticks = (elapsed.as_nanos() / TICK_INTERVAL.as_nanos()) as u64;
        if ticks == 0 {
            return;
        }

        self.last_tick += TICK_INTERVAL * u32::try_from(ticks).unwrap_or(u32::MAX);

        let events = std::mem::take(&mut self.uncounted);
        self.m1.advance(events, ticks);
        self.m5.advance(events, ticks);
        self.m15.advance(events, ticks);
    }
}

/// A meter measuring the rate at which events occur.
///
/// Tracks the total number of events, the mean rate since creation, and one, five and fifteen
/// minute exponentially-weighted moving average rates. The moving averages advance in five second
/// ticks, folded forward whenever the meter is marked or read.
///
/// Once stopped, a meter ignores further marks but can still be read.
pub struct StandardMeter {
    clock: Clock,
    start: Instant,
    count: AtomicU64,
    stopped: AtomicBool,
    averages: Mutex<Averages>,
}

impl StandardMeter {
    /// Creates a new `StandardMeter` reading time from `clock`.
    pub fn new(clock: Clock) -> Self {
        let start = clock.now();
        Self {
            clock,
            start,
            count: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            averages: Mutex::new(Averages::new(start)),
        }
    }

    /// Records `events` occurrences.
    pub fn mark(&self, events: u64) {
        if self.stopped.load(Acquire) {
            return;
        }

        let now = self.clock.now();
        let mut averages = self.averages.lock();
        averages.tick_if_necessary(now);
        averages.uncounted = averages.uncounted.saturating_add(events);
        self.count.fetch_add(events, AcqRel);
    }

    /// Stops the meter. Subsequent marks are ignored.
    pub fn stop(&self) {
        self.stopped.store(true, Release);
    }

    /// Returns `true` if the meter has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Acquire)
    }

    /// Takes a frozen snapshot of the meter's count and rates.
    pub fn snapshot(&self) -> RateSnapshot {
        let now = self.clock.now();
        let mut averages = self.averages.lock();
        averages.tick_if_necessary(now);

        let count = self.count.load(Acquire);
        RateSnapshot {
            count,
            rate1: averages.m1.rate(),
            rate5: averages.m5.rate(),
            rate15: averages.m15.rate(),
            rate_mean: self.mean_rate(count, now),
        }
    }

    fn mean_rate(&self, count: u64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.start).as_secs_f64();
        if count == 0 || elapsed == 0.0 {
            0.0
        } else {
            count as f64 / elapsed
        }
    }

    fn with_averages<F>(&self, f: F) -> f64
    where
        F: FnOnce(&Averages) -> f64,
    {
        let now = self.clock.now();
        let mut averages = self.averages.lock();
        averages.tick_if_necessary(now);
        f(&averages)
    }
}

impl Rates for StandardMeter {
    fn count(&self) -> u64 {
        self.count.load(Acquire)
    }

    fn rate1(&self) -> f64 {
        self.with_averages(|averages| averages.m1.rate())
    }

    fn rate5(&self) -> f64 {
        self.with_averages(|averages| averages.m5.rate())
    }

    fn rate15(&self) -> f64 {
        self.with_averages(|averages| averages.m15.rate())
    }

    fn rate_mean(&self) -> f64 {
        self.mean_rate(self.count.load(Acquire), self.clock.now())
    }
}

/// A frozen view of a meter.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RateSnapshot {
    count: u64,
    rate1: f64,
    rate5: f64,
    rate15: f64,
    rate_mean: f64,
}

impl Rates for RateSnapshot {
    fn count(&self) -> u64 {
        self.count
    }

    fn rate1(&self) -> f64 {
        self.rate1
    }

    fn rate5(&self) -> f64 {
        self.rate5
    }

    fn rate15(&self) -> f64 {
        self.rate15
    }

    fn rate_mean(&self) -> f64 {
        self.rate_mean
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use approx::assert_relative_eq;
    use quanta::Clock;

    use super::StandardMeter;
    use crate::Rates as _;

    #[test]
    fn rates_are_zero_before_first_tick() {
        let (clock, mock) = Clock::mock();
        let meter = StandardMeter::new(clock);

        meter.mark(10);
        mock.increment(Duration::from_secs(4));

        assert_eq!(meter.count(), 10);
        assert_eq!(meter.rate1(), 0.0);
        assert_eq!(meter.rate15(), 0.0);
        assert_relative_eq!(meter.rate_mean(), 2.5);
    }

    #[test]
    fn first_tick_uses_instant_rate() {
        let (clock, mock) = Clock::mock();
        let meter = StandardMeter::new(clock);

        meter.mark(100);
        mock.increment(Duration::from_secs(5));

        assert_relative_eq!(meter.rate1(), 20.0);
        assert_relative_eq!(meter.rate5(), 20.0);
        assert_relative_eq!(meter.rate15(), 20.0);
    }

    #[test]
    fn idle_minute_decays_one_minute_rate() {
        let (clock, mock) = Clock::mock();
        let meter = StandardMeter::new(clock);

        meter.mark(100);
        mock.increment(Duration::from_secs(5));
        let seeded = meter.snapshot();

        mock.increment(Duration::from_secs(60));
        let decayed = meter.snapshot();

        assert_relative_eq!(seeded.rate1(), 20.0);
        assert_relative_eq!(decayed.rate1(), 20.0 / std::f64::consts::E, epsilon = 1e-9);
        assert!(decayed.rate15() > decayed.rate5());
        assert!(decayed.rate5() > decayed.rate1());
        assert_eq!(decayed.count(), 100);
    }

    #[test]
    fn stopped_meter_ignores_marks() {
        let (clock, _mock) = Clock::mock();
        let meter = StandardMeter::new(clock);

        meter.mark(3);
        meter.stop();
        meter.mark(5);

        assert!(meter.is_stopped());
        assert_eq!(meter.count(), 3);
    }
}
