use std::{collections::BTreeMap, sync::Arc, time::SystemTime};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::{epoch_secs, Bucket, CompletedInterval, GapPolicy, IntervalLength, UsageSource};
use crate::{data::Metric, kind::MetricKind, registry::Lease};

struct OpenInterval {
    start: u64,
    buckets: BTreeMap<String, Bucket>,
}

#[derive(Default)]
struct CounterState {
    current: Option<OpenInterval>,
    pending: Vec<CompletedInterval>,
    // Start of the first interval not yet produced, once anything has been closed.
    resume_at: Option<u64>,
}

/// Interval state of one usage counter.
///
/// Rollover is detected lazily, whenever an update or a poll observes a boundary past the
/// current interval. A single lock covers both the interval transitions and the bucket updates,
/// so an update lands either in the interval that is still current or in a newly opened one,
/// never in an interval already handed to a poller.
pub(crate) struct UsageCounterCore {
    name: String,
    length: IntervalLength,
    gap_policy: GapPolicy,
    max_empty_intervals: u64,
    state: Mutex<CounterState>,
}

impl UsageCounterCore {
    pub fn new(
        name: &str,
        length: IntervalLength,
        gap_policy: GapPolicy,
        max_empty_intervals: u64,
    ) -> Self {
        Self {
            name: name.to_owned(),
            length,
            gap_policy,
            max_empty_intervals,
            state: Mutex::new(CounterState::default()),
        }
    }

    pub fn interval_length(&self) -> IntervalLength {
        self.length
    }

    pub fn update<S>(&self, source: &S, usage_type: &str, timestamp: SystemTime, value: u64)
    where
        S: UsageSource + ?Sized,
    {
        let boundary = self.length.boundary(epoch_secs(timestamp));

        let mut state = self.state.lock();
        let needs_open = match state.current.as_ref() {
            Some(open) if boundary < open.start => {
                trace!(
                    name = %self.name,
                    boundary,
                    current = open.start,
                    "Folding late usage into current interval."
                );
                false
            }
            Some(open) => boundary > open.start,
            None => true,
        };
        if needs_open {
            self.close_current(&mut state, boundary);
        }

        let current = state
            .current
            .get_or_insert_with(|| OpenInterval { start: boundary, buckets: BTreeMap::new() });

        let interval_id = source.interval_id();
        match current.buckets.get_mut(interval_id) {
            Some(bucket) => bucket.add(usage_type, value),
            None => {
                let mut bucket = Bucket::new(interval_id.to_owned(), source.tags());
                bucket.add(usage_type, value);
                current.buckets.insert(interval_id.to_owned(), bucket);
            }
        }
    }

    /// Closes the current interval if `now` is past it, then drains every closed interval.
    pub fn poll_elapsed(&self, now: SystemTime) -> Vec<CompletedInterval> {
        let boundary = self.length.boundary(epoch_secs(now));

        let mut state = self.state.lock();
        if state.current.as_ref().map_or(true, |open| boundary > open.start) {
            self.close_current(&mut state, boundary);
        }

        Self::drain(&mut state)
    }

    /// Closes the current interval regardless of time, then drains every closed interval.
    pub fn flush_and_poll(&self) -> Vec<CompletedInterval> {
        let mut state = self.state.lock();
        self.close_current(&mut state, 0);

        Self::drain(&mut state)
    }

    // Closes the current interval, if any, and with `GapPolicy::EmitEmpty` also produces empty
    // intervals for the boundaries before `until` that were never opened, at most
    // `max_empty_intervals` of them, keeping the most recent.
    fn close_current(&self, state: &mut CounterState, until: u64) {
        let length = self.length.as_secs();

        if let Some(open) = state.current.take() {
            let end = open.start.saturating_add(length);
            trace!(
                name = %self.name,
                start = open.start,
                buckets = open.buckets.len(),
                "Closed usage interval."
            );

            state.pending.push(CompletedInterval::new(
                self.name.clone(),
                open.start,
                self.length,
                open.buckets,
            ));
            state.resume_at = Some(state.resume_at.map_or(end, |resume_at| resume_at.max(end)));
        }

        if self.gap_policy == GapPolicy::EmitEmpty {
            if let Some(mut next) = state.resume_at {
                let missing = until.saturating_sub(next).div_ceil(length);
                if missing > self.max_empty_intervals {
                    let skipped = missing - self.max_empty_intervals;
                    next = next.saturating_add(skipped.saturating_mul(length));
                    warn!(
                        name = %self.name,
                        skipped,
                        max = self.max_empty_intervals,
                        "Usage gap is too long, skipping the oldest empty intervals."
                    );
                }

                while next < until {
                    state.pending.push(CompletedInterval::new(
                        self.name.clone(),
                        next,
                        self.length,
                        BTreeMap::new(),
                    ));
                    next = next.saturating_add(length);
                }
                state.resume_at = Some(next);
            }
        }
    }

    fn drain(state: &mut CounterState) -> Vec<CompletedInterval> {
        let mut drained = std::mem::take(&mut state.pending);
        drained.sort_by_key(CompletedInterval::interval_start_utc);
        drained
    }
}

/// A handle to a registered usage counter.
///
/// Usage is folded into per-entity buckets for intervals aligned to the wall clock: with a one
/// minute interval length, every interval starts on a whole minute. An update stamped with a
/// later interval than the current one closes the current interval; an update stamped with an
/// earlier interval is folded into the current one.
pub struct UsageCounter {
    inner: Arc<UsageCounterCore>,
    lease: Lease,
}

impl UsageCounter {
    pub(crate) fn new(inner: Arc<UsageCounterCore>, lease: Lease) -> Self {
        Self { inner, lease }
    }

    /// Adds `value` to the `usage_type` total of `source` in the interval containing `timestamp`.
    pub fn update<S>(&self, source: &S, usage_type: &str, timestamp: SystemTime, value: u64)
    where
        S: UsageSource + ?Sized,
    {
        self.inner.update(source, usage_type, timestamp, value);
    }

    /// Adds `value` to the `usage_type` total of `source` in the interval containing now.
    pub fn update_now<S>(&self, source: &S, usage_type: &str, value: u64)
    where
        S: UsageSource + ?Sized,
    {
        self.inner.update(source, usage_type, SystemTime::now(), value);
    }

    /// Closes the current interval and returns every closed interval, oldest first.
    ///
    /// Calling this again without any updates in between returns nothing.
    pub fn flush_and_poll(&self) -> Vec<CompletedInterval> {
        self.inner.flush_and_poll()
    }

    /// Returns every interval that is over as of `now`, oldest first.
    ///
    /// Unlike [`flush_and_poll`](UsageCounter::flush_and_poll), an interval that `now` still
    /// falls within stays open.
    pub fn poll_elapsed(&self, now: SystemTime) -> Vec<CompletedInterval> {
        self.inner.poll_elapsed(now)
    }

    /// Gets the interval length of this counter.
    pub fn interval_length(&self) -> IntervalLength {
        self.inner.interval_length()
    }
}

impl Metric for UsageCounter {
    fn name(&self) -> &str {
        self.lease.name()
    }

    fn kind(&self) -> MetricKind {
        MetricKind::UsageCounter
    }

    fn dispose(&self) {
        self.lease.release();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        time::{Duration, SystemTime, UNIX_EPOCH},
    };

    use super::UsageCounterCore;
    use crate::{
        usage::{GapPolicy, IntervalLength, UsageSource},
        DEFAULT_MAX_EMPTY_INTERVALS,
    };

    struct Session(&'static str);

    impl UsageSource for Session {
        fn interval_id(&self) -> &str {
            self.0
        }

        fn tags(&self) -> HashMap<String, String> {
            HashMap::from([("session".to_owned(), self.0.to_owned())])
        }
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn counter(length: u64, gap_policy: GapPolicy) -> UsageCounterCore {
        let length = IntervalLength::from_secs(length).expect("valid");
        UsageCounterCore::new("usage", length, gap_policy, DEFAULT_MAX_EMPTY_INTERVALS)
    }

    #[test]
    fn late_update_folds_into_current() {
        let counter = counter(10, GapPolicy::Skip);
        counter.update(&Session("a"), "bytes", at(25), 5);
        counter.update(&Session("a"), "bytes", at(12), 7);

        let intervals = counter.flush_and_poll();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].interval_start_utc(), 20);
        assert_eq!(intervals[0].bucket("a").map(|b| b.value("bytes")), Some(12));
    }

    #[test]
    fn poll_elapsed_keeps_current_open() {
        let counter = counter(10, GapPolicy::Skip);
        counter.update(&Session("a"), "bytes", at(21), 1);

        assert!(counter.poll_elapsed(at(29)).is_empty());

        counter.update(&Session("a"), "bytes", at(29), 1);
        let intervals = counter.poll_elapsed(at(30));
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].bucket("a").map(|b| b.value("bytes")), Some(2));
    }

    #[test]
    fn skip_policy_leaves_gaps() {
        let counter = counter(10, GapPolicy::Skip);
        counter.update(&Session("a"), "bytes", at(5), 1);
        counter.update(&Session("a"), "bytes", at(45), 1);

        let starts: Vec<_> =
            counter.flush_and_poll().iter().map(|i| i.interval_start_utc()).collect();
        assert_eq!(starts, vec![0, 40]);
    }

    #[test]
    fn emit_empty_policy_fills_gaps() {
        let counter = counter(10, GapPolicy::EmitEmpty);
        counter.update(&Session("a"), "bytes", at(5), 1);
        counter.update(&Session("a"), "bytes", at(45), 1);

        let intervals = counter.flush_and_poll();
        let starts: Vec<_> = intervals.iter().map(|i| i.interval_start_utc()).collect();
        assert_eq!(starts, vec![0, 10, 20, 30, 40]);
        assert!(intervals[1..4].iter().all(|i| i.is_empty()));
        assert!(!intervals[4].is_empty());
    }

    #[test]
    fn emit_empty_policy_fills_idle_polls() {
        let counter = counter(10, GapPolicy::EmitEmpty);
        assert!(counter.poll_elapsed(at(100)).is_empty());

        counter.update(&Session("a"), "bytes", at(105), 1);
        let intervals = counter.poll_elapsed(at(131));
        let starts: Vec<_> = intervals.iter().map(|i| i.interval_start_utc()).collect();
        assert_eq!(starts, vec![100, 110, 120]);

        assert!(counter.poll_elapsed(at(139)).is_empty());
        assert_eq!(counter.poll_elapsed(at(140)).len(), 1);
    }

    #[test]
    fn emit_empty_policy_caps_long_gaps() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let length = IntervalLength::from_secs(1).expect("valid");
        let counter = UsageCounterCore::new("usage", length, GapPolicy::EmitEmpty, 3);

        // Clamps to the epoch, two million boundaries before the next update.
        counter.update(&Session("a"), "bytes", UNIX_EPOCH - Duration::from_secs(5), 1);
        counter.update(&Session("a"), "bytes", at(2_000_000), 1);

        let intervals = counter.flush_and_poll();
        let starts: Vec<_> = intervals.iter().map(|i| i.interval_start_utc()).collect();
        assert_eq!(starts, vec![0, 1_999_997, 1_999_998, 1_999_999, 2_000_000]);
        assert!(intervals[1..4].iter().all(|i| i.is_empty()));
    }

    #[test]
    fn emit_empty_policy_within_cap_is_complete() {
        let length = IntervalLength::from_secs(10).expect("valid");
        let counter = UsageCounterCore::new("usage", length, GapPolicy::EmitEmpty, 3);
        counter.update(&Session("a"), "bytes", at(5), 1);

        let starts: Vec<_> =
            counter.poll_elapsed(at(40)).iter().map(|i| i.interval_start_utc()).collect();
        assert_eq!(starts, vec![0, 10, 20, 30]);
    }

    #[test]
    fn tags_captured_on_first_use() {
        let counter = counter(10, GapPolicy::Skip);
        counter.update(&Session("a"), "bytes", at(1), 1);

        let intervals = counter.flush_and_poll();
        let bucket = intervals[0].bucket("a").expect("bucket for a");
        assert_eq!(bucket.entity_id(), "a");
        assert_eq!(bucket.tags().get("session").map(String::as_str), Some("a"));
    }
}
