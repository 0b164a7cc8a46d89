//! Interval-bucketed usage accounting.
//!
//! A usage counter folds usage events, each attributed to an entity and a usage type, into
//! per-entity buckets for fixed, wall-clock aligned intervals. Once an interval is over it is
//! closed into an immutable [`CompletedInterval`] and held until polled.

use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::builder::BuildError;

mod counter;
pub(crate) use self::counter::UsageCounterCore;
pub use self::counter::UsageCounter;

mod registry;
pub use self::registry::{HandlerError, ReportingTask, UsageEventHandler, UsageRegistry};

/// An entity that usage is attributed to.
pub trait UsageSource {
    /// Gets the key that usage from this entity is bucketed under.
    fn interval_id(&self) -> &str;

    /// Gets descriptive attributes of this entity.
    ///
    /// Only called when the entity's bucket for an interval is created.
    fn tags(&self) -> HashMap<String, String>;
}

/// The length of a usage interval: a whole, non-zero number of seconds.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct IntervalLength(u64);

impl IntervalLength {
    /// Creates an interval length of `secs` seconds.
    ///
    /// # Errors
    ///
    /// If `secs` is zero, an error will be returned.
    pub fn from_secs(secs: u64) -> Result<Self, BuildError> {
        if secs == 0 {
            return Err(BuildError::InvalidIntervalLength { length: Duration::ZERO });
        }

        Ok(IntervalLength(secs))
    }

    /// Gets the length in seconds.
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Gets the length as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// Gets the start of the interval containing `epoch_secs`.
    pub(crate) fn boundary(&self, epoch_secs: u64) -> u64 {
        epoch_secs - epoch_secs % self.0
    }
}

impl TryFrom<Duration> for IntervalLength {
    type Error = BuildError;

    fn try_from(length: Duration) -> Result<Self, Self::Error> {
        if length.subsec_nanos() != 0 || length.as_secs() == 0 {
            return Err(BuildError::InvalidIntervalLength { length });
        }

        Ok(IntervalLength(length.as_secs()))
    }
}

/// How a usage counter treats interval boundaries that pass without any updates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum GapPolicy {
    /// Intervals without updates are never produced.
    #[default]
    Skip,

    /// An empty interval is produced for every boundary that passed without updates, once the
    /// counter has seen its first update.
    EmitEmpty,
}

/// Usage accumulated by one entity during one interval.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bucket {
    entity_id: String,
    tags: HashMap<String, String>,
    values: BTreeMap<String, u64>,
}

impl Bucket {
    pub(crate) fn new(entity_id: String, tags: HashMap<String, String>) -> Self {
        Self { entity_id, tags, values: BTreeMap::new() }
    }

    pub(crate) fn add(&mut self, usage_type: &str, value: u64) {
        match self.values.get_mut(usage_type) {
            Some(total) => *total = total.saturating_add(value),
            None => {
                self.values.insert(usage_type.to_owned(), value);
            }
        }
    }

    /// Gets the interval id of the entity.
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Gets the tags of the entity, as of its first update in the interval.
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    /// Gets the accumulated value of every usage type, ordered by usage type.
    pub fn values(&self) -> &BTreeMap<String, u64> {
        &self.values
    }

    /// Gets the accumulated value of a usage type, or zero if it saw no usage.
    pub fn value(&self, usage_type: &str) -> u64 {
        self.values.get(usage_type).copied().unwrap_or(0)
    }
}

/// A finished usage interval.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompletedInterval {
    name: String,
    interval_start_utc: u64,
    interval_length: u64,
    buckets: BTreeMap<String, Bucket>,
}

impl CompletedInterval {
    pub(crate) fn new(
        name: String,
        interval_start_utc: u64,
        interval_length: IntervalLength,
        buckets: BTreeMap<String, Bucket>,
    ) -> Self {
        Self { name, interval_start_utc, interval_length: interval_length.as_secs(), buckets }
    }

    /// Gets the name of the usage counter that produced this interval.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the start of the interval, in seconds since the Unix epoch.
    pub fn interval_start_utc(&self) -> u64 {
        self.interval_start_utc
    }

    /// Gets the length of the interval, in seconds.
    pub fn interval_length(&self) -> u64 {
        self.interval_length
    }

    /// Gets the bucket of every entity with usage during the interval, ordered by interval id.
    pub fn buckets(&self) -> &BTreeMap<String, Bucket> {
        &self.buckets
    }

    /// Gets the bucket of an entity.
    pub fn bucket(&self, entity_id: &str) -> Option<&Bucket> {
        self.buckets.get(entity_id)
    }

    /// Returns `true` if no entity had usage during the interval.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Converts a timestamp to whole seconds since the Unix epoch, clamping earlier times to zero.
pub(crate) fn epoch_secs(timestamp: SystemTime) -> u64 {
    timestamp.duration_since(UNIX_EPOCH).map(|since| since.as_secs()).unwrap_or(0)
}
