use std::fmt;

/// Metric kind.
///
/// Defines the kind, or type, of a metric registered in a [`Registry`](crate::Registry). The kind
/// of a name is fixed when the metric is first created.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MetricKind {
    /// Gauge type.
    Gauge,
    /// Meter type.
    Meter,
    /// Histogram type.
    Histogram,
    /// Timer type.
    Timer,
    /// Usage counter type.
    UsageCounter,
}

impl MetricKind {
    /// Gets the lowercase name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Meter => "meter",
            MetricKind::Histogram => "histogram",
            MetricKind::Timer => "timer",
            MetricKind::UsageCounter => "usage_counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
