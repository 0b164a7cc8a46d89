//! An in-process metrics registry with usage accounting and periodic reporting.
//!
//! `metrics-usage` keeps named metrics for long-running services: gauges, meters, histograms,
//! timers, and usage counters that bucket usage per entity into fixed wall-clock intervals.
//!
//! # Registry
//!
//! A [`Registry`] hands out handles to metrics by name. Asking for the same name twice returns
//! two handles to the same metric, and the metric stays registered until both have been
//! disposed or dropped:
//!
//! ```
//! use metrics_usage::{Metric, Registry};
//!
//! let registry = Registry::new("web-1");
//!
//! let first = registry.gauge("connections");
//! let second = registry.gauge("connections");
//! first.update(42);
//! assert_eq!(second.value(), 42);
//!
//! first.dispose();
//! assert!(registry.is_valid_metric("connections"));
//!
//! drop(second);
//! assert!(!registry.is_valid_metric("connections"));
//! ```
//!
//! # Usage counters
//!
//! A [`UsageRegistry`] additionally creates [`UsageCounter`]s. Each update is attributed to a
//! [`UsageSource`], and the interval it lands in is derived from its timestamp:
//!
//! ```
//! use std::{collections::HashMap, time::{Duration, UNIX_EPOCH}};
//! use metrics_usage::{IntervalLength, UsageRegistry, UsageSource};
//!
//! struct Tenant(String);
//!
//! impl UsageSource for Tenant {
//!     fn interval_id(&self) -> &str {
//!         &self.0
//!     }
//!
//!     fn tags(&self) -> HashMap<String, String> {
//!         HashMap::new()
//!     }
//! }
//!
//! let registry = UsageRegistry::new("web-1");
//! let length = IntervalLength::from_secs(60).unwrap();
//! let counter = registry.usage_counter("bandwidth", length);
//!
//! let tenant = Tenant("acme".to_string());
//! counter.update(&tenant, "egress.bytes", UNIX_EPOCH + Duration::from_secs(125), 512);
//! counter.update(&tenant, "egress.bytes", UNIX_EPOCH + Duration::from_secs(170), 256);
//!
//! let message = registry.flush_and_poll().unwrap();
//! let interval = &message.usage_counters[0];
//! assert_eq!(interval.interval_start_utc(), 120);
//! assert_eq!(interval.bucket("acme").unwrap().value("egress.bytes"), 768);
//! ```
//!
//! # Reporting
//!
//! Values can be exported in two ways. A [`DelegatingReporter`] walks the registry on a fixed
//! tick and flattens every metric into named integer, float and percentile values for a
//! [`MetricSink`]. [`UsageRegistry::start_reporting`] instead polls the registry into
//! [`MetricsMessage`]s, carrying metric summaries and completed usage intervals, and hands them
//! to a [`UsageEventHandler`].
//!
//! Both loops stop for good when their [close signal](close_signal) fires.
#![deny(missing_docs)]
#![warn(unused_extern_crates)]

mod data;
pub use self::data::{Gauge, Histogram, HistogramSnapshot, Meter, Metric, Timer, TimerSnapshot};

mod builder;
pub use self::builder::{
    BuildError, RegistryBuilder, UsageRegistryBuilder, DEFAULT_EVENT_QUEUE_SIZE,
    DEFAULT_MAX_EMPTY_INTERVALS,
};

mod close;
pub use self::close::{close_signal, CloseNotify, Closer};

mod kind;
pub use self::kind::MetricKind;

mod message;
pub use self::message::{
    HistogramMetric, MeterMetric, MetricsMessage, Percentiles, TimerMetric, SUMMARY_QUANTILES,
};

mod registry;
pub use self::registry::Registry;

pub mod reporter;
pub use self::reporter::{DelegatingReporter, MetricSink};

mod usage;
pub use self::usage::{
    Bucket, CompletedInterval, GapPolicy, HandlerError, IntervalLength, ReportingTask,
    UsageCounter, UsageEventHandler, UsageRegistry, UsageSource,
};

mod visitor;
pub use self::visitor::Visitor;

pub use metrics_usage_stats::{
    Clock, Distribution, DistributionSnapshot, Instant, PercentileSource, RateSnapshot, Rates,
};
