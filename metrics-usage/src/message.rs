use std::{collections::HashMap, time::SystemTime};

use indexmap::IndexMap;
use metrics_usage_stats::{Distribution, PercentileSource, RateSnapshot, Rates};

use crate::{
    data::{HistogramSnapshot, TimerSnapshot},
    registry::Registry,
    usage::CompletedInterval,
    visitor::Visitor,
};

/// Quantiles summarized for every histogram and timer in a [`MetricsMessage`].
pub const SUMMARY_QUANTILES: [f64; 6] = [0.5, 0.75, 0.95, 0.99, 0.999, 0.9999];

/// Percentile estimates of a distribution.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Percentiles {
    /// Median.
    pub p50: f64,
    /// 75th percentile.
    pub p75: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// 99.9th percentile.
    pub p999: f64,
    /// 99.99th percentile.
    pub p9999: f64,
}

impl Percentiles {
    fn from_source<P>(source: &P) -> Self
    where
        P: PercentileSource + ?Sized,
    {
        let [p50, p75, p95, p99, p999, p9999] = SUMMARY_QUANTILES.map(|q| source.percentile(q));
        Percentiles { p50, p75, p95, p99, p999, p9999 }
    }
}

/// Summary of a meter.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterMetric {
    /// Number of events.
    pub count: u64,
    /// One minute moving average rate, in events per second.
    pub rate1: f64,
    /// Five minute moving average rate, in events per second.
    pub rate5: f64,
    /// Fifteen minute moving average rate, in events per second.
    pub rate15: f64,
    /// Mean rate since creation, in events per second.
    pub rate_mean: f64,
}

impl MeterMetric {
    fn from_rates<R>(rates: &R) -> Self
    where
        R: Rates + ?Sized,
    {
        MeterMetric {
            count: rates.count(),
            rate1: rates.rate1(),
            rate5: rates.rate5(),
            rate15: rates.rate15(),
            rate_mean: rates.rate_mean(),
        }
    }
}

/// Summary of a histogram.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HistogramMetric {
    /// Number of values.
    pub count: u64,
    /// Smallest value.
    pub min: i64,
    /// Largest value.
    pub max: i64,
    /// Sum of all values.
    pub sum: i64,
    /// Mean value.
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Population variance.
    pub variance: f64,
    /// Percentile estimates.
    pub percentiles: Percentiles,
}

impl HistogramMetric {
    fn from_distribution<D>(distribution: &D) -> Self
    where
        D: Distribution + ?Sized,
    {
        HistogramMetric {
            count: distribution.count(),
            min: distribution.min(),
            max: distribution.max(),
            sum: distribution.sum(),
            mean: distribution.mean(),
            std_dev: distribution.std_dev(),
            variance: distribution.variance(),
            percentiles: Percentiles::from_source(distribution),
        }
    }
}

/// Summary of a timer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimerMetric {
    /// Distribution of recorded durations, in nanoseconds.
    pub durations: HistogramMetric,
    /// Rate at which durations were recorded.
    pub rates: MeterMetric,
}

/// Everything collected by one poll of a registry.
///
/// Metrics appear in the order they were created in. Usage intervals are ordered by start time.
#[derive(Clone, Debug)]
pub struct MetricsMessage {
    /// Identifier of the source the registry belongs to.
    pub source_id: String,
    /// When the poll happened.
    pub timestamp: SystemTime,
    /// Static tags of the registry.
    pub tags: HashMap<String, String>,
    /// Gauge values.
    pub int_values: IndexMap<String, i64>,
    /// Meter summaries.
    pub meters: IndexMap<String, MeterMetric>,
    /// Histogram summaries.
    pub histograms: IndexMap<String, HistogramMetric>,
    /// Timer summaries.
    pub timers: IndexMap<String, TimerMetric>,
    /// Completed usage intervals.
    pub usage_counters: Vec<CompletedInterval>,
}

impl MetricsMessage {
    /// Returns `true` if the message carries no metric values and no usage intervals.
    pub fn is_empty(&self) -> bool {
        self.int_values.is_empty()
            && self.meters.is_empty()
            && self.histograms.is_empty()
            && self.timers.is_empty()
            && self.usage_counters.is_empty()
    }
}

/// Visitor collecting registry values into a [`MetricsMessage`].
pub(crate) struct MessageBuilder {
    message: MetricsMessage,
}

impl MessageBuilder {
    pub fn new(registry: &Registry) -> Self {
        Self {
            message: MetricsMessage {
                source_id: registry.source_id().to_owned(),
                timestamp: SystemTime::now(),
                tags: registry.tags().clone(),
                int_values: IndexMap::new(),
                meters: IndexMap::new(),
                histograms: IndexMap::new(),
                timers: IndexMap::new(),
                usage_counters: Vec::new(),
            },
        }
    }

    pub fn into_message(self) -> MetricsMessage {
        self.message
    }
}

impl Visitor for MessageBuilder {
    fn visit_gauge(&mut self, name: &str, value: i64) {
        self.message.int_values.insert(name.to_owned(), value);
    }

    fn visit_meter(&mut self, name: &str, meter: &RateSnapshot) {
        self.message.meters.insert(name.to_owned(), MeterMetric::from_rates(meter));
    }

    fn visit_histogram(&mut self, name: &str, histogram: &HistogramSnapshot) {
        let summary = HistogramMetric::from_distribution(histogram);
        self.message.histograms.insert(name.to_owned(), summary);
    }

    fn visit_timer(&mut self, name: &str, timer: &TimerSnapshot) {
        let summary = TimerMetric {
            durations: HistogramMetric::from_distribution(timer.distribution()),
            rates: MeterMetric::from_rates(timer.rates()),
        };
        self.message.timers.insert(name.to_owned(), summary);
    }
}
