//! Periodic export of registry values to a sink.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{select, tick};
use metrics_usage_stats::{Distribution, PercentileSource, RateSnapshot, Rates};
use tracing::{debug, error};

use crate::{
    builder::BuildError,
    close::CloseNotify,
    data::{HistogramSnapshot, TimerSnapshot},
    registry::Registry,
    visitor::Visitor,
};

/// Suffix of event counts.
pub const COUNT_SUFFIX: &str = "count";
/// Suffix of means: the mean rate of meters, and the mean value of histograms and timers.
pub const MEAN_SUFFIX: &str = "mean";
/// Suffix of one minute moving average rates.
pub const RATE_M1_SUFFIX: &str = "rate_m1";
/// Suffix of five minute moving average rates.
pub const RATE_M5_SUFFIX: &str = "rate_m5";
/// Suffix of fifteen minute moving average rates.
pub const RATE_M15_SUFFIX: &str = "rate_m15";
/// Suffix of minimum values.
pub const MIN_SUFFIX: &str = "min";
/// Suffix of maximum values.
pub const MAX_SUFFIX: &str = "max";
/// Suffix of percentile sources.
pub const PERCENTILE_SUFFIX: &str = "percentile";

/// Consumer of flattened metric values.
///
/// Each reported value is offered under its fully qualified name, `<metric>` for gauges and
/// `<metric>.<suffix>` for everything else, and only forwarded if [`filter`](MetricSink::filter)
/// accepts that name.
pub trait MetricSink {
    /// Whether or not the value with the given fully qualified name should be reported.
    fn filter(&self, name: &str) -> bool {
        let _ = name;
        true
    }

    /// Called at the start of every report.
    fn start_report(&mut self, registry: &Registry) {
        let _ = registry;
    }

    /// Called at the end of every report.
    fn end_report(&mut self, registry: &Registry) {
        let _ = registry;
    }

    /// Accepts an integer value.
    fn accept_int_metric(&mut self, name: &str, value: i64);

    /// Accepts a floating-point value.
    fn accept_float_metric(&mut self, name: &str, value: f64);

    /// Accepts a source of percentiles, leaving the choice of quantiles to the sink.
    fn accept_percentile_metric(&mut self, name: &str, source: &dyn PercentileSource);
}

/// Periodically reports every metric of a registry to a [`MetricSink`].
///
/// Gauges are reported as-is. Every other kind is flattened into a fixed set of suffixed values:
///
/// - meters: `count`, `rate_m1`, `rate_m5`, `rate_m15` and `mean` (the mean rate)
/// - histograms: `count`, `mean`, `min`, `max` and `percentile`
/// - timers: `count`, `rate_m1`, `rate_m5`, `rate_m15`, `mean`, `min`, `max` and `percentile`,
///   with durations in nanoseconds
///
/// A report that panics in the sink is abandoned and logged; the next tick reports as usual.
pub struct DelegatingReporter<S> {
    registry: Registry,
    sink: S,
    close: CloseNotify,
}

impl<S> DelegatingReporter<S>
where
    S: MetricSink,
{
    /// Creates a new `DelegatingReporter`.
    ///
    /// The reporter stops for good once `close` fires.
    pub fn new(registry: Registry, sink: S, close: CloseNotify) -> Self {
        Self { registry, sink, close }
    }

    /// Gets a reference to the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consumes the reporter, returning the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Reports every metric once.
    pub fn report(&mut self) {
        let registry = self.registry.clone();
        self.sink.start_report(&registry);
        registry.accept_visitor(self);
        self.sink.end_report(&registry);
    }

    /// Reports every `interval` on the current thread until the close signal fires.
    ///
    /// # Errors
    ///
    /// If `interval` is zero, an error will be returned.
    pub fn start(&mut self, interval: Duration) -> Result<(), BuildError> {
        if interval.is_zero() {
            return Err(BuildError::InvalidReportInterval);
        }

        debug!(?interval, source_id = self.registry.source_id(), "Started reporting.");

        let ticker = tick(interval);
        loop {
            let closed = select! {
                recv(ticker) -> _ => false,
                recv(self.close.receiver()) -> _ => true,
            };
            if closed {
                break;
            }

            let result = panic::catch_unwind(AssertUnwindSafe(|| self.report()));
            if let Err(panic) = result {
                let reason = panic_message(panic.as_ref());
                error!(reason, "Sink panicked, abandoning report.");
            }
        }

        debug!("Close signal received, stopped reporting.");
        Ok(())
    }

    /// Reports every `interval` on a background thread until the close signal fires.
    ///
    /// The thread hands the sink back when it exits.
    ///
    /// # Errors
    ///
    /// If `interval` is zero, or if the background thread cannot be spawned, an error will be
    /// returned.
    pub fn spawn(mut self, interval: Duration) -> Result<JoinHandle<S>, BuildError>
    where
        S: Send + 'static,
    {
        if interval.is_zero() {
            return Err(BuildError::InvalidReportInterval);
        }

        let handle = thread::Builder::new()
            .name("metrics-usage-reporter".to_string())
            .spawn(move || {
                if let Err(e) = self.start(interval) {
                    error!(error = %e, "Failed to start reporting.");
                }
                self.sink
            })?;

        Ok(handle)
    }

    fn report_int(&mut self, name: &str, suffix: &str, value: i64) {
        let name = format!("{name}.{suffix}");
        if self.sink.filter(&name) {
            self.sink.accept_int_metric(&name, value);
        }
    }

    fn report_float(&mut self, name: &str, suffix: &str, value: f64) {
        let name = format!("{name}.{suffix}");
        if self.sink.filter(&name) {
            self.sink.accept_float_metric(&name, value);
        }
    }

    fn report_percentiles(&mut self, name: &str, source: &dyn PercentileSource) {
        let name = format!("{name}.{PERCENTILE_SUFFIX}");
        if self.sink.filter(&name) {
            self.sink.accept_percentile_metric(&name, source);
        }
    }

    fn report_rates<R>(&mut self, name: &str, rates: &R)
    where
        R: Rates + ?Sized,
    {
        self.report_float(name, RATE_M1_SUFFIX, rates.rate1());
        self.report_float(name, RATE_M5_SUFFIX, rates.rate5());
        self.report_float(name, RATE_M15_SUFFIX, rates.rate15());
    }

    fn report_distribution<D>(&mut self, name: &str, distribution: &D)
    where
        D: Distribution,
    {
        self.report_float(name, MEAN_SUFFIX, distribution.mean());
        self.report_int(name, MIN_SUFFIX, distribution.min());
        self.report_int(name, MAX_SUFFIX, distribution.max());
        self.report_percentiles(name, distribution);
    }
}

impl<S> Visitor for DelegatingReporter<S>
where
    S: MetricSink,
{
    fn visit_gauge(&mut self, name: &str, value: i64) {
        if self.sink.filter(name) {
            self.sink.accept_int_metric(name, value);
        }
    }

    fn visit_meter(&mut self, name: &str, meter: &RateSnapshot) {
        self.report_int(name, COUNT_SUFFIX, saturating_i64(meter.count()));
        self.report_rates(name, meter);
        self.report_float(name, MEAN_SUFFIX, meter.rate_mean());
    }

    fn visit_histogram(&mut self, name: &str, histogram: &HistogramSnapshot) {
        self.report_int(name, COUNT_SUFFIX, saturating_i64(Distribution::count(histogram)));
        self.report_distribution(name, histogram);
    }

    fn visit_timer(&mut self, name: &str, timer: &TimerSnapshot) {
        self.report_int(name, COUNT_SUFFIX, saturating_i64(timer.count()));
        self.report_rates(name, timer.rates());
        self.report_distribution(name, timer.distribution());
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
