use std::{collections::HashMap, io, sync::Arc, time::Duration};

use metrics_usage_stats::{Clock, DEFAULT_RESERVOIR_SIZE};
use thiserror::Error;

use crate::{
    close::{close_signal, CloseNotify},
    registry::{Registry, Shared},
    usage::{GapPolicy, UsageRegistry},
};

/// Default bound on the number of messages waiting to be handed to a usage event handler.
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 10;

/// Default bound on the number of empty intervals produced for a single gap under
/// [`GapPolicy::EmitEmpty`].
pub const DEFAULT_MAX_EMPTY_INTERVALS: u64 = 1_440;

/// Errors that could occur while configuring a registry or starting one of its background loops.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The interval length of a usage counter was not a whole, non-zero number of seconds.
    #[error(
        "invalid interval length {length:?}: must be a whole number of seconds and at least one \
         second"
    )]
    InvalidIntervalLength {
        /// The rejected length.
        length: Duration,
    },

    /// The reporting interval was zero.
    #[error("report interval must be greater than zero")]
    InvalidReportInterval,

    /// The histogram reservoir size was zero.
    #[error("histogram reservoir size must be greater than zero")]
    InvalidReservoirSize,

    /// The event queue size was zero.
    #[error("event queue size must be greater than zero")]
    InvalidEventQueueSize,

    /// Failed to spawn a background thread.
    #[error("failed to spawn background thread: {0}")]
    Backend(#[from] io::Error),

    /// Reporting was already started for this registry.
    #[error("reporting has already been started for this registry")]
    AlreadyReporting,
}

/// Builder for a [`Registry`].
#[derive(Clone)]
pub struct RegistryBuilder {
    source_id: String,
    tags: HashMap<String, String>,
    clock: Clock,
    histogram_reservoir_size: usize,
}

impl RegistryBuilder {
    /// Creates a new `RegistryBuilder` for the given source.
    ///
    /// The source identifier names the process or instance that owns the registry, and is carried
    /// on every message polled from it.
    pub fn new<S>(source_id: S) -> Self
    where
        S: Into<String>,
    {
        RegistryBuilder {
            source_id: source_id.into(),
            tags: HashMap::new(),
            clock: Clock::new(),
            histogram_reservoir_size: DEFAULT_RESERVOIR_SIZE,
        }
    }

    /// Adds a static tag, attached to every message polled from the registry.
    #[must_use]
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a set of static tags, attached to every message polled from the registry.
    #[must_use]
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the clock used by meters and timers.
    ///
    /// Defaults to a real clock. Mostly useful for supplying a mocked clock in tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the number of samples kept by each histogram and timer for estimating percentiles.
    ///
    /// Count, minimum, maximum, mean and variance are always exact; only percentiles are
    /// estimated from the sample.
    ///
    /// Defaults to 1028 samples.
    #[must_use]
    pub fn with_histogram_reservoir_size(mut self, size: usize) -> Self {
        self.histogram_reservoir_size = size;
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// If the histogram reservoir size is zero, an error will be returned.
    pub fn build(self) -> Result<Registry, BuildError> {
        if self.histogram_reservoir_size == 0 {
            return Err(BuildError::InvalidReservoirSize);
        }

        Ok(Registry::from_shared(Arc::new(Shared::new(
            self.source_id,
            self.tags,
            self.clock,
            self.histogram_reservoir_size,
        ))))
    }
}

/// Builder for a [`UsageRegistry`].
pub struct UsageRegistryBuilder {
    registry: RegistryBuilder,
    close: Option<CloseNotify>,
    event_queue_size: usize,
    gap_policy: GapPolicy,
    max_empty_intervals: u64,
}

impl UsageRegistryBuilder {
    /// Creates a new `UsageRegistryBuilder` for the given source.
    pub fn new<S>(source_id: S) -> Self
    where
        S: Into<String>,
    {
        UsageRegistryBuilder {
            registry: RegistryBuilder::new(source_id),
            close: None,
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
            gap_policy: GapPolicy::default(),
            max_empty_intervals: DEFAULT_MAX_EMPTY_INTERVALS,
        }
    }

    /// Adds a static tag, attached to every message polled from the registry.
    #[must_use]
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.registry = self.registry.with_tag(key, value);
        self
    }

    /// Adds a set of static tags, attached to every message polled from the registry.
    #[must_use]
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.registry = self.registry.with_tags(tags);
        self
    }

    /// Sets the clock used by meters and timers.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.registry = self.registry.with_clock(clock);
        self
    }

    /// Sets the number of samples kept by each histogram and timer for estimating percentiles.
    #[must_use]
    pub fn with_histogram_reservoir_size(mut self, size: usize) -> Self {
        self.registry = self.registry.with_histogram_reservoir_size(size);
        self
    }

    /// Sets the close signal that stops background reporting.
    ///
    /// When no signal is given, the registry creates its own, fired by
    /// [`UsageRegistry::close`].
    #[must_use]
    pub fn with_close_notify(mut self, close: CloseNotify) -> Self {
        self.close = Some(close);
        self
    }

    /// Sets the number of polled messages that may wait for the event handler.
    ///
    /// When the handler falls behind and the queue is full, newly polled messages are dropped.
    ///
    /// Defaults to 10.
    #[must_use]
    pub fn with_event_queue_size(mut self, size: usize) -> Self {
        self.event_queue_size = size;
        self
    }

    /// Sets how usage counters treat interval boundaries that pass without any updates.
    ///
    /// Defaults to [`GapPolicy::Skip`].
    #[must_use]
    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }

    /// Sets the most empty intervals a usage counter produces for one gap between updates, under
    /// [`GapPolicy::EmitEmpty`].
    ///
    /// When a gap spans more boundaries than this, only the most recent empty intervals are
    /// produced and the older ones are skipped with a warning.
    ///
    /// Defaults to 1440, a day of one minute intervals.
    #[must_use]
    pub fn with_max_empty_intervals(mut self, max: u64) -> Self {
        self.max_empty_intervals = max;
        self
    }

    /// Builds the usage registry.
    ///
    /// # Errors
    ///
    /// If the histogram reservoir size or the event queue size is zero, an error will be returned.
    pub fn build(self) -> Result<UsageRegistry, BuildError> {
        if self.event_queue_size == 0 {
            return Err(BuildError::InvalidEventQueueSize);
        }

        let registry = self.registry.build()?;
        let (closer, close) = match self.close {
            Some(close) => (None, close),
            None => {
                let (closer, close) = close_signal();
                (Some(closer), close)
            }
        };

        Ok(UsageRegistry::from_parts(
            registry,
            closer,
            close,
            self.event_queue_size,
            self.gap_policy,
            self.max_empty_intervals,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildError, RegistryBuilder, UsageRegistryBuilder};

    #[test]
    fn registry_defaults() {
        let registry = RegistryBuilder::new("node-1")
            .with_tag("region", "eu-west")
            .with_tags([("zone", "b")])
            .build()
            .expect("should not fail to build");

        assert_eq!(registry.source_id(), "node-1");
        assert_eq!(registry.tags().len(), 2);
        assert_eq!(registry.tags().get("region").map(String::as_str), Some("eu-west"));
    }

    #[test]
    fn zero_reservoir_size() {
        let result = RegistryBuilder::new("node-1").with_histogram_reservoir_size(0).build();
        assert!(matches!(result, Err(BuildError::InvalidReservoirSize)));
    }

    #[test]
    fn zero_event_queue_size() {
        let result = UsageRegistryBuilder::new("node-1").with_event_queue_size(0).build();
        assert!(matches!(result, Err(BuildError::InvalidEventQueueSize)));
    }
}
