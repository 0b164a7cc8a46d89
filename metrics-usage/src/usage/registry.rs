use std::{
    error::Error,
    ops::Deref,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use crossbeam_channel::{bounded, select, tick, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::{CompletedInterval, GapPolicy, IntervalLength, UsageCounter, UsageCounterCore};
use crate::{
    builder::{
        BuildError, UsageRegistryBuilder, DEFAULT_EVENT_QUEUE_SIZE, DEFAULT_MAX_EMPTY_INTERVALS,
    },
    close::{close_signal, CloseNotify, Closer},
    message::MetricsMessage,
    registry::Registry,
    reporter::panic_message,
};

/// Error returned by a [`UsageEventHandler`].
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Receives the messages polled from a [`UsageRegistry`].
pub trait UsageEventHandler: Send + Sync {
    /// Accepts one polled message.
    ///
    /// Errors are logged and the message is dropped. Nothing is retried.
    fn accept_metrics(&self, message: MetricsMessage) -> Result<(), HandlerError>;
}

#[derive(Clone, Copy)]
enum Drain {
    // Only intervals that are over as of the given time.
    Elapsed(SystemTime),
    // Every interval, closing the ones still open.
    Flush,
}

/// A [`Registry`] with usage counters.
///
/// Besides the regular metrics, a usage registry creates [`UsageCounter`]s, and its polls collect
/// the completed intervals of every counter alongside the current value of every other metric.
/// Intervals from all counters are ordered by their start time.
///
/// All of the regular registry operations are available through [`Deref`]. When the registry
/// has static tags, visitors walking it see every name suffixed with those tags, as
/// `name[k1=v1,k2=v2]` with keys in ascending order. Polled messages keep the registered names
/// and carry the tags on [`MetricsMessage::tags`].
pub struct UsageRegistry {
    registry: Registry,
    closer: Mutex<Option<Closer>>,
    close: CloseNotify,
    event_queue_size: usize,
    gap_policy: GapPolicy,
    max_empty_intervals: u64,
    reporting: AtomicBool,
}

impl UsageRegistry {
    /// Creates a new `UsageRegistry` for the given source, with default settings.
    pub fn new<S>(source_id: S) -> Self
    where
        S: Into<String>,
    {
        let (closer, close) = close_signal();
        Self::from_parts(
            Registry::new(source_id),
            Some(closer),
            close,
            DEFAULT_EVENT_QUEUE_SIZE,
            GapPolicy::default(),
            DEFAULT_MAX_EMPTY_INTERVALS,
        )
    }

    /// Creates a [`UsageRegistryBuilder`] for the given source.
    pub fn builder<S>(source_id: S) -> UsageRegistryBuilder
    where
        S: Into<String>,
    {
        UsageRegistryBuilder::new(source_id)
    }

    pub(crate) fn from_parts(
        registry: Registry,
        closer: Option<Closer>,
        close: CloseNotify,
        event_queue_size: usize,
        gap_policy: GapPolicy,
        max_empty_intervals: u64,
    ) -> Self {
        Self {
            registry: registry.with_tag_suffix(),
            closer: Mutex::new(closer),
            close,
            event_queue_size,
            gap_policy,
            max_empty_intervals,
            reporting: AtomicBool::new(false),
        }
    }

    /// Gets the underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gets or creates a usage counter.
    ///
    /// The interval length is fixed when the counter is first created: asking for an existing
    /// counter with a different length returns the existing counter, unchanged.
    pub fn usage_counter(&self, name: &str, interval_length: IntervalLength) -> UsageCounter {
        let (gap_policy, max_empty) = (self.gap_policy, self.max_empty_intervals);
        let (counter, lease) = self.registry.acquire(name, || {
            UsageCounterCore::new(name, interval_length, gap_policy, max_empty)
        });

        if counter.interval_length() != interval_length && !lease.is_detached() {
            warn!(
                name,
                requested = interval_length.as_secs(),
                existing = counter.interval_length().as_secs(),
                "Usage counter already registered with another interval length."
            );
        }

        UsageCounter::new(counter, lease)
    }

    /// Collects every metric value and every usage interval that is over.
    ///
    /// Returns `None` if there is nothing to report.
    pub fn poll(&self) -> Option<MetricsMessage> {
        collect(&self.registry, Drain::Elapsed(SystemTime::now()))
    }

    /// Collects every metric value and every usage interval that is over as of `now`.
    pub fn poll_at(&self, now: SystemTime) -> Option<MetricsMessage> {
        collect(&self.registry, Drain::Elapsed(now))
    }

    /// Collects every metric value, leaving usage intervals in place.
    pub fn poll_without_usage_metrics(&self) -> Option<MetricsMessage> {
        self.registry.poll()
    }

    /// Collects every metric value and every usage interval, closing the intervals still open.
    ///
    /// Returns `None` if there is nothing to report.
    pub fn flush_and_poll(&self) -> Option<MetricsMessage> {
        collect(&self.registry, Drain::Flush)
    }

    /// Flushes every usage interval and hands the result to `handler`.
    ///
    /// The handler is not called if there is nothing to report. Handler errors are logged.
    pub fn flush_to_handler<H>(&self, handler: &H)
    where
        H: UsageEventHandler + ?Sized,
    {
        if let Some(message) = self.flush_and_poll() {
            dispatch(handler, message);
        }
    }

    /// Starts polling this registry in the background.
    ///
    /// Every `report_interval`, the registry is polled and the resulting message is queued for
    /// `handler`, which is called from a dedicated thread. When the handler falls behind and the
    /// queue is full, newly polled messages are dropped rather than delaying the next poll.
    ///
    /// When the close signal fires, polling stops and every metric is disposed. Messages that are
    /// already queued are still handed to the handler.
    ///
    /// # Errors
    ///
    /// If `report_interval` is zero, if reporting was already started, or if the background
    /// threads cannot be spawned, an error will be returned.
    pub fn start_reporting(
        &self,
        handler: Arc<dyn UsageEventHandler>,
        report_interval: Duration,
    ) -> Result<ReportingTask, BuildError> {
        if report_interval.is_zero() {
            return Err(BuildError::InvalidReportInterval);
        }
        if self.reporting.swap(true, Ordering::AcqRel) {
            return Err(BuildError::AlreadyReporting);
        }

        let (queue, events) = bounded::<MetricsMessage>(self.event_queue_size);

        let dispatcher = thread::Builder::new()
            .name("metrics-usage-dispatcher".to_string())
            .spawn(move || {
                for message in events {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        dispatch(handler.as_ref(), message)
                    }));
                    if let Err(panic) = result {
                        let reason = panic_message(panic.as_ref());
                        error!(reason, "Usage event handler panicked.");
                    }
                }
                debug!("Usage dispatcher stopped.");
            });
        let dispatcher = match dispatcher {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                self.reporting.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        let registry = self.registry.clone();
        let close = self.close.clone();
        let reporter = thread::Builder::new()
            .name("metrics-usage-reporter".to_string())
            .spawn(move || run_reporting(registry, close, queue, report_interval));
        let reporter = match reporter {
            Ok(reporter) => reporter,
            Err(e) => {
                self.reporting.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        Ok(ReportingTask { reporter, dispatcher })
    }

    /// Gets the close signal that stops background reporting.
    pub fn close_notify(&self) -> &CloseNotify {
        &self.close
    }

    /// Fires the close signal, if this registry owns it.
    ///
    /// Registries built with an external close signal via
    /// [`UsageRegistryBuilder::with_close_notify`] are closed by firing that signal instead.
    pub fn close(&self) {
        if let Some(closer) = self.closer.lock().take() {
            closer.close();
        }
    }
}

impl Deref for UsageRegistry {
    type Target = Registry;

    fn deref(&self) -> &Self::Target {
        &self.registry
    }
}

/// Handle to the background threads started by [`UsageRegistry::start_reporting`].
pub struct ReportingTask {
    reporter: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl ReportingTask {
    /// Returns `true` once both background threads have exited.
    pub fn is_finished(&self) -> bool {
        self.reporter.is_finished() && self.dispatcher.is_finished()
    }

    /// Waits for both background threads to exit.
    ///
    /// They only exit after the close signal fires.
    ///
    /// # Errors
    ///
    /// If either thread panicked, the panic payload is returned.
    pub fn join(self) -> thread::Result<()> {
        let reporter = self.reporter.join();
        let dispatcher = self.dispatcher.join();
        reporter.and(dispatcher)
    }
}

fn collect(registry: &Registry, drain: Drain) -> Option<MetricsMessage> {
    let mut message = registry.collect();

    let mut intervals: Vec<CompletedInterval> = registry
        .usage_counters()
        .iter()
        .flat_map(|counter| match drain {
            Drain::Elapsed(now) => counter.poll_elapsed(now),
            Drain::Flush => counter.flush_and_poll(),
        })
        .collect();
    intervals.sort_by_key(CompletedInterval::interval_start_utc);
    message.usage_counters = intervals;

    (!message.is_empty()).then_some(message)
}

fn dispatch<H>(handler: &H, message: MetricsMessage)
where
    H: UsageEventHandler + ?Sized,
{
    let intervals = message.usage_counters.len();
    if let Err(e) = handler.accept_metrics(message) {
        error!(error = %e, intervals, "Usage event handler failed to accept metrics.");
    }
}

fn run_reporting(
    registry: Registry,
    close: CloseNotify,
    queue: Sender<MetricsMessage>,
    report_interval: Duration,
) {
    debug!(?report_interval, source_id = registry.source_id(), "Started usage reporting.");

    let ticker = tick(report_interval);
    loop {
        let closed = select! {
            recv(ticker) -> _ => false,
            recv(close.receiver()) -> _ => true,
        };
        if closed {
            registry.dispose_all();
            debug!("Close signal received, stopped usage reporting.");
            break;
        }

        let Some(message) = collect(&registry, Drain::Elapsed(SystemTime::now())) else {
            trace!("Nothing to report.");
            continue;
        };

        match queue.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                warn!(
                    intervals = message.usage_counters.len(),
                    "Event queue is full, dropping polled metrics."
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                error!("Usage dispatcher is gone, stopped usage reporting.");
                break;
            }
        }
    }
}
