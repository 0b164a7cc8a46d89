//! Statistics primitives backing `metrics-usage`.
//!
//! This crate holds the accumulators that do the numerical work behind each metric kind:
//!
//! - [`StandardGauge`]: a last-write-wins signed integer.
//! - [`StandardHistogram`]: exact running count/min/max/sum/variance, plus a fixed-size uniform
//!   reservoir that percentiles are estimated from.
//! - [`StandardMeter`]: an event count with one, five and fifteen minute exponentially-weighted
//!   moving averages.
//! - [`StandardTimer`]: a histogram of nanosecond durations paired with a meter of how often
//!   durations were recorded.
//!
//! Reading values is expressed through three small traits, [`PercentileSource`],
//! [`Distribution`] and [`Rates`], which are implemented both by the live primitives and by
//! their frozen snapshots ([`DistributionSnapshot`], [`RateSnapshot`]).
//!
//! # Clocks
//!
//! Meters and timers take a [`quanta::Clock`] rather than reading the system clock directly, so
//! that tests can drive them with a mocked clock:
//!
//! ```
//! use std::time::Duration;
//! use metrics_usage_stats::{Rates, StandardMeter};
//!
//! let (clock, mock) = quanta::Clock::mock();
//! let meter = StandardMeter::new(clock);
//!
//! meter.mark(50);
//! mock.increment(Duration::from_secs(5));
//!
//! // One full tick has elapsed, so the one minute rate is the instantaneous rate: 50 over 5s.
//! assert_eq!(meter.rate1(), 10.0);
//! ```
#![deny(missing_docs)]
#![warn(unused_extern_crates)]

mod ewma;

mod gauge;
pub use self::gauge::StandardGauge;

mod histogram;
pub use self::histogram::{DistributionSnapshot, StandardHistogram, DEFAULT_RESERVOIR_SIZE};

mod meter;
pub use self::meter::{RateSnapshot, StandardMeter};

mod timer;
pub use self::timer::StandardTimer;

pub use quanta::{Clock, Instant};

/// A source of percentile estimates.
///
/// Quantiles are expressed on a scale of 0.0 to 1.0, so the 99th percentile is requested as
/// `0.99`. Sources with no recorded values return `0.0` for every quantile, and a NaN quantile
/// reads `0.0` from any source.
pub trait PercentileSource {
    /// Gets the estimated value at the given quantile.
    fn percentile(&self, quantile: f64) -> f64;

    /// Gets the estimated values at each of the given quantiles, in the same order.
    fn percentiles(&self, quantiles: &[f64]) -> Vec<f64> {
        quantiles.iter().map(|q| self.percentile(*q)).collect()
    }
}

/// Read access to the distribution of values recorded by a histogram or timer.
pub trait Distribution: PercentileSource {
    /// Number of values recorded.
    fn count(&self) -> u64;

    /// Largest value recorded, or zero if empty.
    fn max(&self) -> i64;

    /// Arithmetic mean of the recorded values, or zero if empty.
    fn mean(&self) -> f64;

    /// Smallest value recorded, or zero if empty.
    fn min(&self) -> i64;

    /// Population standard deviation of the recorded values.
    fn std_dev(&self) -> f64;

    /// Sum of the recorded values, saturating at the bounds of `i64`.
    fn sum(&self) -> i64;

    /// Population variance of the recorded values.
    fn variance(&self) -> f64;
}

/// Read access to the rate at which events were marked on a meter or timer.
///
/// All rates are events per second.
pub trait Rates {
    /// Number of events marked.
    fn count(&self) -> u64;

    /// One minute exponentially-weighted moving average rate.
    fn rate1(&self) -> f64;

    /// Five minute exponentially-weighted moving average rate.
    fn rate5(&self) -> f64;

    /// Fifteen minute exponentially-weighted moving average rate.
    fn rate15(&self) -> f64;

    /// Mean rate since the meter was created.
    fn rate_mean(&self) -> f64;
}
