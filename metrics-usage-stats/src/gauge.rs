use std::sync::atomic::{AtomicI64, Ordering::{Acquire, Release}};

/// A gauge holding the last value it was updated to.
#[derive(Debug, Default)]
pub struct StandardGauge {
    value: AtomicI64,
}

impl StandardGauge {
    /// Creates a new `StandardGauge` with a value of zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gauge to `value`.
    pub fn update(&self, value: i64) {
        self.value.store(value, Release);
    }

    /// Gets the current value of the gauge.
    pub fn value(&self) -> i64 {
        self.value.load(Acquire)
    }
}
