//! Ref-counted metric registry.

mod refcount;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use indexmap::IndexMap;
use metrics_usage_stats::{
    Clock, StandardGauge, StandardHistogram, StandardMeter, StandardTimer, DEFAULT_RESERVOIR_SIZE,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use self::refcount::RefCounted;
use crate::{
    builder::RegistryBuilder,
    data::{Gauge, Histogram, HistogramSnapshot, Meter, Timer, TimerSnapshot},
    kind::MetricKind,
    message::{MessageBuilder, MetricsMessage},
    usage::UsageCounterCore,
    visitor::Visitor,
};

// Identifier carried by handles that were never registered.
const DETACHED: u64 = 0;

/// The primitive behind a registered name.
#[derive(Clone)]
pub(crate) enum MetricCore {
    Gauge(Arc<StandardGauge>),
    Meter(Arc<StandardMeter>),
    Histogram(Arc<StandardHistogram>),
    Timer(Arc<StandardTimer>),
    UsageCounter(Arc<UsageCounterCore>),
}

impl MetricCore {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricCore::Gauge(_) => MetricKind::Gauge,
            MetricCore::Meter(_) => MetricKind::Meter,
            MetricCore::Histogram(_) => MetricKind::Histogram,
            MetricCore::Timer(_) => MetricKind::Timer,
            MetricCore::UsageCounter(_) => MetricKind::UsageCounter,
        }
    }

    fn stop(&self) {
        match self {
            MetricCore::Meter(meter) => meter.stop(),
            MetricCore::Timer(timer) => timer.stop(),
            MetricCore::Gauge(_) | MetricCore::Histogram(_) | MetricCore::UsageCounter(_) => {}
        }
    }
}

/// A primitive that can be stored in the registry under a fixed kind.
pub(crate) trait Resource: Sized {
    const KIND: MetricKind;

    fn wrap(resource: Arc<Self>) -> MetricCore;

    fn extract(core: &MetricCore) -> Option<Arc<Self>>;
}

macro_rules! impl_resource {
    ($ty:ty, $variant:ident) => {
        impl Resource for $ty {
            const KIND: MetricKind = MetricKind::$variant;

            fn wrap(resource: Arc<Self>) -> MetricCore {
                MetricCore::$variant(resource)
            }

            fn extract(core: &MetricCore) -> Option<Arc<Self>> {
                match core {
                    MetricCore::$variant(resource) => Some(Arc::clone(resource)),
                    _ => None,
                }
            }
        }
    };
}

impl_resource!(StandardGauge, Gauge);
impl_resource!(StandardMeter, Meter);
impl_resource!(StandardHistogram, Histogram);
impl_resource!(StandardTimer, Timer);
impl_resource!(UsageCounterCore, UsageCounter);

pub(crate) struct Shared {
    source_id: String,
    tags: HashMap<String, String>,
    clock: Clock,
    reservoir_size: usize,
    metrics: Mutex<IndexMap<String, RefCounted<MetricCore>>>,
    next_id: AtomicU64,
}

impl Shared {
    pub fn new(
        source_id: String,
        tags: HashMap<String, String>,
        clock: Clock,
        reservoir_size: usize,
    ) -> Self {
        Self {
            source_id,
            tags,
            clock,
            reservoir_size,
            metrics: Mutex::new(IndexMap::new()),
            next_id: AtomicU64::new(DETACHED + 1),
        }
    }

    fn release(&self, name: &str, id: u64) {
        let mut metrics = self.metrics.lock();
        let unused = match metrics.get_mut(name) {
            Some(entry) if entry.id() == id => entry.release(),
            _ => false,
        };
        let removed = if unused { metrics.shift_remove(name) } else { None };
        drop(metrics);

        if let Some(entry) = removed {
            let core = entry.into_resource();
            core.stop();
            debug!(name, kind = %core.kind(), "Disposed metric.");
        }
    }
}

/// One handle's share of a registered metric.
///
/// Releasing is idempotent, and dropping the lease releases it.
pub(crate) struct Lease {
    shared: Arc<Shared>,
    name: String,
    id: u64,
    released: AtomicBool,
}

impl Lease {
    fn new(shared: Arc<Shared>, name: &str, id: u64) -> Self {
        Self { shared, name: name.to_owned(), id, released: AtomicBool::new(false) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_detached(&self) -> bool {
        self.id == DETACHED
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) || self.is_detached() {
            return;
        }

        self.shared.release(&self.name, self.id);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

/// A registry of named, ref-counted metrics.
///
/// Asking the registry for a metric by name creates it if it does not exist yet, or otherwise
/// hands out another handle to the existing metric. Every handle holds one reference: the metric
/// stays registered until each of its handles has been disposed or dropped, at which point the
/// name is free to be registered again, even under a different kind.
///
/// Dropping a handle disposes it, so a handle that is not bound to a variable only lives for
/// one statement. `registry.gauge("x").update(1)` registers the gauge, updates it and removes it
/// again. Keep the handle around for as long as the metric should be reported:
///
/// ```
/// # use metrics_usage::Registry;
/// let registry = Registry::new("web-1");
///
/// registry.gauge("dropped").update(1);
/// assert!(!registry.is_valid_metric("dropped"));
///
/// let _g = registry.gauge("kept");
/// assert!(registry.is_valid_metric("kept"));
/// ```
///
/// The kind of a name is fixed at creation. Asking for a registered name under a different kind
/// returns a working handle that is detached from the registry: it is never reported, and
/// disposing it does nothing.
///
/// Metrics are visited in the order in which they were created.
///
/// `Registry` is cheaply cloneable, and all clones share the same metrics.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
    // Appended to every name handed to a visitor.
    name_suffix: Option<Arc<str>>,
}

impl Registry {
    /// Creates a new `Registry` for the given source, with default settings.
    pub fn new<S>(source_id: S) -> Self
    where
        S: Into<String>,
    {
        Self::from_shared(Arc::new(Shared::new(
            source_id.into(),
            HashMap::new(),
            Clock::new(),
            DEFAULT_RESERVOIR_SIZE,
        )))
    }

    /// Creates a [`RegistryBuilder`] for the given source.
    pub fn builder<S>(source_id: S) -> RegistryBuilder
    where
        S: Into<String>,
    {
        RegistryBuilder::new(source_id)
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared, name_suffix: None }
    }

    /// Returns a registry sharing the same metrics, whose visitors see every name suffixed with
    /// the static tags, as `name[k1=v1,k2=v2]` with keys in ascending order.
    ///
    /// Without static tags, names are left as registered.
    pub(crate) fn with_tag_suffix(&self) -> Self {
        let name_suffix = (!self.shared.tags.is_empty()).then(|| tag_suffix(&self.shared.tags));
        Self { shared: Arc::clone(&self.shared), name_suffix }
    }

    /// Gets the identifier of the source this registry belongs to.
    pub fn source_id(&self) -> &str {
        &self.shared.source_id
    }

    /// Gets the static tags of this registry.
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.shared.tags
    }

    /// Gets the clock used by meters and timers.
    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    /// Gets or creates a gauge.
    pub fn gauge(&self, name: &str) -> Gauge {
        let (gauge, lease) = self.acquire(name, StandardGauge::new);
        Gauge::new(gauge, lease)
    }

    /// Gets or creates a meter.
    pub fn meter(&self, name: &str) -> Meter {
        let (meter, lease) = self.acquire(name, || StandardMeter::new(self.shared.clock.clone()));
        Meter::new(meter, lease)
    }

    /// Gets or creates a histogram.
    pub fn histogram(&self, name: &str) -> Histogram {
        let (histogram, lease) =
            self.acquire(name, || StandardHistogram::new(self.shared.reservoir_size));
        Histogram::new(histogram, lease)
    }

    /// Gets or creates a timer.
    pub fn timer(&self, name: &str) -> Timer {
        let (timer, lease) = self.acquire(name, || {
            StandardTimer::new(self.shared.clock.clone(), self.shared.reservoir_size)
        });
        Timer::new(timer, lease)
    }

    pub(crate) fn acquire<T, F>(&self, name: &str, create: F) -> (Arc<T>, Lease)
    where
        T: Resource,
        F: FnOnce() -> T,
    {
        let mut metrics = self.shared.metrics.lock();
        if let Some(entry) = metrics.get_mut(name) {
            if let Some(resource) = T::extract(entry.resource()) {
                entry.acquire();
                let (id, count) = (entry.id(), entry.count());
                drop(metrics);

                debug!(name, kind = %T::KIND, count, "Acquired existing metric.");
                return (resource, Lease::new(Arc::clone(&self.shared), name, id));
            }

            let existing = entry.resource().kind();
            drop(metrics);

            warn!(
                name,
                requested = %T::KIND,
                %existing,
                "Metric already registered under another kind; returning a detached handle."
            );
            return (Arc::new(create()), Lease::new(Arc::clone(&self.shared), name, DETACHED));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let resource = Arc::new(create());
        metrics.insert(name.to_owned(), RefCounted::new(id, T::wrap(Arc::clone(&resource))));
        drop(metrics);

        debug!(name, kind = %T::KIND, "Registered metric.");
        (resource, Lease::new(Arc::clone(&self.shared), name, id))
    }

    /// Returns `true` if a metric is registered under `name` with at least one live handle.
    pub fn is_valid_metric(&self, name: &str) -> bool {
        self.shared.metrics.lock().get(name).is_some_and(|entry| entry.count() > 0)
    }

    /// Gets the number of registered metrics.
    pub fn len(&self) -> usize {
        self.shared.metrics.lock().len()
    }

    /// Returns `true` if no metrics are registered.
    pub fn is_empty(&self) -> bool {
        self.shared.metrics.lock().is_empty()
    }

    /// Calls `f` with the name and kind of every registered metric, in creation order.
    pub fn each_metric<F>(&self, mut f: F)
    where
        F: FnMut(&str, MetricKind),
    {
        for (name, core) in self.entries() {
            f(&name, core.kind());
        }
    }

    /// Visits every registered metric, in creation order.
    ///
    /// The set of metrics is captured up front, and each metric is snapshotted just before it is
    /// visited, so the visitor runs without holding any registry lock.
    ///
    /// Metrics are visited under their registered names. The registry of a
    /// [`UsageRegistry`](crate::UsageRegistry) with static tags appends those tags to every
    /// visited name instead, as `name[k1=v1,k2=v2]` with keys in ascending order.
    pub fn accept_visitor<V>(&self, visitor: &mut V)
    where
        V: Visitor + ?Sized,
    {
        self.visit_entries(visitor, self.name_suffix.as_deref());
    }

    fn visit_entries<V>(&self, visitor: &mut V, suffix: Option<&str>)
    where
        V: Visitor + ?Sized,
    {
        for (name, core) in self.entries() {
            let visited = match suffix {
                Some(suffix) => format!("{name}{suffix}"),
                None => name.clone(),
            };

            match core {
                MetricCore::Gauge(gauge) => visitor.visit_gauge(&visited, gauge.value()),
                MetricCore::Meter(meter) => visitor.visit_meter(&visited, &meter.snapshot()),
                MetricCore::Histogram(histogram) => {
                    let snapshot = HistogramSnapshot::new(name, histogram.snapshot());
                    visitor.visit_histogram(&visited, &snapshot);
                }
                MetricCore::Timer(timer) => {
                    let (distribution, rates) = timer.snapshot();
                    let snapshot = TimerSnapshot::new(name, distribution, rates);
                    visitor.visit_timer(&visited, &snapshot);
                }
                MetricCore::UsageCounter(counter) => {
                    visitor.visit_usage_counter(&visited, counter.interval_length())
                }
            }
        }
    }

    /// Disposes every registered metric at once.
    ///
    /// Meters and timers are stopped, and every name becomes free again. Outstanding handles keep
    /// working on their detached primitives, and disposing them later does nothing.
    pub fn dispose_all(&self) {
        let drained: Vec<_> = self.shared.metrics.lock().drain(..).collect();
        let disposed = drained.len();
        for (_, entry) in drained {
            entry.into_resource().stop();
        }

        debug!(disposed, "Disposed all metrics.");
    }

    /// Collects the current value of every registered metric into a message.
    ///
    /// Returns `None` if there is nothing to report.
    pub fn poll(&self) -> Option<MetricsMessage> {
        let message = self.collect();
        (!message.is_empty()).then_some(message)
    }

    // Messages carry the static tags themselves, so their keys stay unsuffixed.
    pub(crate) fn collect(&self) -> MetricsMessage {
        let mut builder = MessageBuilder::new(self);
        self.visit_entries(&mut builder, None);
        builder.into_message()
    }

    pub(crate) fn usage_counters(&self) -> Vec<Arc<UsageCounterCore>> {
        self.shared
            .metrics
            .lock()
            .values()
            .filter_map(|entry| UsageCounterCore::extract(entry.resource()))
            .collect()
    }

    fn entries(&self) -> Vec<(String, MetricCore)> {
        self.shared
            .metrics
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.resource().clone()))
            .collect()
    }
}

fn tag_suffix(tags: &HashMap<String, String>) -> Arc<str> {
    let mut pairs: Vec<_> = tags.iter().collect();
    pairs.sort();

    let joined: Vec<_> = pairs.iter().map(|(key, value)| format!("{key}={value}")).collect();
    format!("[{}]", joined.join(",")).into()
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("source_id", &self.shared.source_id)
            .field("tags", &self.shared.tags)
            .field("metrics", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use metrics_usage_stats::{Clock, Distribution as _, RateSnapshot, Rates as _};

    use super::Registry;
    use crate::{
        data::{HistogramSnapshot, Metric as _, TimerSnapshot},
        kind::MetricKind,
        visitor::Visitor,
    };

    #[derive(Default)]
    struct Recorded(Vec<String>);

    impl Visitor for Recorded {
        fn visit_gauge(&mut self, name: &str, value: i64) {
            self.0.push(format!("gauge {name}={value}"));
        }

        fn visit_meter(&mut self, name: &str, meter: &RateSnapshot) {
            self.0.push(format!("meter {name}={}", meter.count()));
        }

        fn visit_histogram(&mut self, name: &str, histogram: &HistogramSnapshot) {
            self.0.push(format!("histogram {name}={}", histogram.count()));
        }

        fn visit_timer(&mut self, name: &str, timer: &TimerSnapshot) {
            self.0.push(format!("timer {name}={}", timer.count()));
        }
    }

    #[test]
    fn handles_share_one_primitive() {
        let registry = Registry::new("test");
        let first = registry.gauge("queue.depth");
        let second = registry.gauge("queue.depth");

        first.update(12);
        assert_eq!(second.value(), 12);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn last_dispose_unregisters() {
        let registry = Registry::new("test");
        let first = registry.meter("requests");
        let second = registry.meter("requests");

        first.dispose();
        first.dispose();
        assert!(registry.is_valid_metric("requests"));

        second.dispose();
        assert!(!registry.is_valid_metric("requests"));
        assert!(registry.is_empty());
    }

    #[test]
    fn dropping_handle_disposes() {
        let registry = Registry::new("test");
        {
            let _histogram = registry.histogram("latency");
            assert!(registry.is_valid_metric("latency"));
        }
        assert!(!registry.is_valid_metric("latency"));
    }

    #[test]
    fn stale_handle_does_not_release_new_registration() {
        let registry = Registry::new("test");
        let stale = registry.gauge("connections");
        registry.dispose_all();

        let fresh = registry.gauge("connections");
        stale.dispose();
        assert!(registry.is_valid_metric("connections"));

        fresh.dispose();
        assert!(!registry.is_valid_metric("connections"));
    }

    #[test]
    fn kind_mismatch_returns_detached_handle() {
        let registry = Registry::new("test");
        let gauge = registry.gauge("shared.name");
        let histogram = registry.histogram("shared.name");

        histogram.update(5);
        assert_eq!(histogram.count(), 1);
        histogram.dispose();

        assert!(registry.is_valid_metric("shared.name"));
        let mut kinds = Vec::new();
        registry.each_metric(|name, kind| kinds.push((name.to_owned(), kind)));
        assert_eq!(kinds, vec![("shared.name".to_owned(), MetricKind::Gauge)]);

        drop(gauge);
        assert!(registry.is_empty());
    }

    #[test]
    fn visits_in_creation_order() {
        let registry = Registry::new("test");
        let timer = registry.timer("d");
        let gauge = registry.gauge("b");
        let meter = registry.meter("a");
        let histogram = registry.histogram("c");

        gauge.update(3);
        meter.mark(2);
        histogram.update(1);
        timer.update(Duration::from_millis(5));

        let mut recorded = Recorded::default();
        registry.accept_visitor(&mut recorded);
        assert_eq!(recorded.0, vec!["timer d=1", "gauge b=3", "meter a=2", "histogram c=1"]);
    }

    #[test]
    fn tag_suffix_is_sorted() {
        let registry = Registry::builder("test")
            .with_tag("zone", "b")
            .with_tag("env", "prod")
            .build()
            .expect("valid");
        let gauge = registry.gauge("threads");
        gauge.update(4);

        let mut plain = Recorded::default();
        registry.accept_visitor(&mut plain);
        assert_eq!(plain.0, vec!["gauge threads=4"]);

        let mut suffixed = Recorded::default();
        registry.with_tag_suffix().accept_visitor(&mut suffixed);
        assert_eq!(suffixed.0, vec!["gauge threads[env=prod,zone=b]=4"]);
    }

    #[test]
    fn untagged_registry_has_no_suffix() {
        let registry = Registry::new("test").with_tag_suffix();
        let _gauge = registry.gauge("threads");

        let mut recorded = Recorded::default();
        registry.accept_visitor(&mut recorded);
        assert_eq!(recorded.0, vec!["gauge threads=0"]);
    }

    #[test]
    fn clock_is_the_configured_clock() {
        let (clock, mock) = Clock::mock();
        let registry = Registry::builder("test").with_clock(clock).build().expect("valid");

        let before = registry.clock().now();
        mock.increment(Duration::from_secs(2));
        assert_eq!(registry.clock().now() - before, Duration::from_secs(2));
    }

    #[test]
    fn dispose_all_stops_meters() {
        let registry = Registry::new("test");
        let meter = registry.meter("events");
        meter.mark(1);

        registry.dispose_all();
        meter.mark(1);

        assert!(!registry.is_valid_metric("events"));
        assert_eq!(meter.count(), 1);
        assert!(registry.poll().is_none());
    }
}
