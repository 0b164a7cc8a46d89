use metrics_usage_stats::RateSnapshot;

use crate::{
    data::{HistogramSnapshot, TimerSnapshot},
    usage::IntervalLength,
};

/// Walks the metrics of a [`Registry`](crate::Registry).
///
/// Each callback receives the name the metric was registered under along with a frozen view of
/// its value, so that everything read during one visit is consistent.
pub trait Visitor {
    /// Visits a gauge.
    fn visit_gauge(&mut self, name: &str, value: i64);

    /// Visits a meter.
    fn visit_meter(&mut self, name: &str, meter: &RateSnapshot);

    /// Visits a histogram.
    fn visit_histogram(&mut self, name: &str, histogram: &HistogramSnapshot);

    /// Visits a timer.
    fn visit_timer(&mut self, name: &str, timer: &TimerSnapshot);

    /// Visits a usage counter.
    ///
    /// Usage counters report through completed intervals rather than point-in-time values, so
    /// this does nothing by default.
    fn visit_usage_counter(&mut self, name: &str, interval_length: IntervalLength) {
        let _ = (name, interval_length);
    }
}
