//! Metric handles handed out by the registry.

use crate::kind::MetricKind;

/// Capabilities shared by every metric handle.
pub trait Metric {
    /// Gets the name the metric was registered under.
    fn name(&self) -> &str;

    /// Gets the kind of the metric.
    fn kind(&self) -> MetricKind;

    /// Releases this handle's reference to the metric.
    ///
    /// Once every handle to a metric has been disposed, the metric is removed from its registry.
    /// Disposing the same handle more than once does nothing. Dropping a handle disposes it.
    fn dispose(&self);

    /// Stops any rate tracking done by the underlying metric, for every handle sharing it.
    fn stop(&self) {}
}

macro_rules! delegate_distribution {
    ($ty:ty => $target:ty, $($access:tt)+) => {
        impl metrics_usage_stats::PercentileSource for $ty {
            fn percentile(&self, quantile: f64) -> f64 {
                <$target as metrics_usage_stats::PercentileSource>::percentile(
                    &self.$($access)+,
                    quantile,
                )
            }

            fn percentiles(&self, quantiles: &[f64]) -> Vec<f64> {
                <$target as metrics_usage_stats::PercentileSource>::percentiles(
                    &self.$($access)+,
                    quantiles,
                )
            }
        }

        impl metrics_usage_stats::Distribution for $ty {
            fn count(&self) -> u64 {
                <$target as metrics_usage_stats::Distribution>::count(&self.$($access)+)
            }

            fn max(&self) -> i64 {
                <$target as metrics_usage_stats::Distribution>::max(&self.$($access)+)
            }

            fn mean(&self) -> f64 {
                <$target as metrics_usage_stats::Distribution>::mean(&self.$($access)+)
            }

            fn min(&self) -> i64 {
                <$target as metrics_usage_stats::Distribution>::min(&self.$($access)+)
            }

            fn std_dev(&self) -> f64 {
                <$target as metrics_usage_stats::Distribution>::std_dev(&self.$($access)+)
            }

            fn sum(&self) -> i64 {
                <$target as metrics_usage_stats::Distribution>::sum(&self.$($access)+)
            }

            fn variance(&self) -> f64 {
                <$target as metrics_usage_stats::Distribution>::variance(&self.$($access)+)
            }
        }
    };
}

macro_rules! delegate_rates {
    ($ty:ty => $target:ty, $($access:tt)+) => {
        impl metrics_usage_stats::Rates for $ty {
            fn count(&self) -> u64 {
                <$target as metrics_usage_stats::Rates>::count(&self.$($access)+)
            }

            fn rate1(&self) -> f64 {
                <$target as metrics_usage_stats::Rates>::rate1(&self.$($access)+)
            }

            fn rate5(&self) -> f64 {
                <$target as metrics_usage_stats::Rates>::rate5(&self.$($access)+)
            }

            fn rate15(&self) -> f64 {
                <$target as metrics_usage_stats::Rates>::rate15(&self.$($access)+)
            }

            fn rate_mean(&self) -> f64 {
                <$target as metrics_usage_stats::Rates>::rate_mean(&self.$($access)+)
            }
        }
    };
}

mod gauge;
pub use self::gauge::Gauge;

mod histogram;
pub use self::histogram::{Histogram, HistogramSnapshot};

mod meter;
pub use self::meter::Meter;

mod timer;
pub use self::timer::{Timer, TimerSnapshot};
