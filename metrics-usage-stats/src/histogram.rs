//! Reservoir-backed histogram.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng as _, SeedableRng as _};
use rand_xoshiro::Xoshiro256StarStar;

use crate::{Distribution, PercentileSource};

/// Default number of samples held by a histogram reservoir.
pub const DEFAULT_RESERVOIR_SIZE: usize = 1028;

struct Reservoir {
    values: Vec<i64>,
    capacity: usize,
    seen: u64,
    rng: Xoshiro256StarStar,
}

impl Reservoir {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
            seen: 0,
            rng: Xoshiro256StarStar::from_rng(&mut rand::rng()),
        }
    }

    // Vitter's Algorithm R: once full, the n-th value replaces a random slot with probability
    // capacity / n.
    fn push(&mut self, value: i64) {
        self.seen += 1;
        if self.values.len() < self.capacity {
            self.values.push(value);
        } else {
            let idx = self.rng.random_range(0..self.seen);
            if idx < self.capacity as u64 {
                self.values[idx as usize] = value;
            }
        }
    }

    fn clear(&mut self) {
        self.values.clear();
        self.seen = 0;
    }

    fn sorted(&self) -> Vec<i64> {
        let mut sorted = self.values.clone();
        sorted.sort_unstable();
        sorted
    }
}

#[derive(Default)]
struct Moments {
    count: u64,
    sum: i64,
    min: i64,
    max: i64,
    mean: f64,
    m2: f64,
}

impl Moments {
    fn push(&mut self, value: i64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }

        self.count += 1;
        self.sum = self.sum.saturating_add(value);

        let delta = value as f64 - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value as f64 - self.mean);
    }

    fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

struct State {
    moments: Moments,
    reservoir: Reservoir,
}

/// A histogram of signed integer values.
///
/// Count, minimum, maximum, sum, mean and variance are tracked exactly over every recorded value.
/// Percentiles are estimated from a uniform sampling reservoir of fixed size, so memory usage
/// does not grow with the number of recorded values.
pub struct StandardHistogram {
    state: Mutex<State>,
}

impl StandardHistogram {
    /// Creates a new `StandardHistogram` whose reservoir holds up to `reservoir_size` samples.
    pub fn new(reservoir_size: usize) -> Self {
        Self {
            state: Mutex::new(State {
                moments: Moments::default(),
                reservoir: Reservoir::with_capacity(reservoir_size.max(1)),
            }),
        }
    }

    /// Records a value.
    pub fn update(&self, value: i64) {
        let mut state = self.state.lock();
        state.moments.push(value);
        state.reservoir.push(value);
    }

    /// Discards every recorded value.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.moments = Moments::default();
        state.reservoir.clear();
    }

    /// Takes a frozen snapshot of the histogram.
    ///
    /// All values are computed once, while the histogram is briefly locked. Later updates to the
    /// histogram are not reflected in the snapshot.
    pub fn snapshot(&self) -> DistributionSnapshot {
        let state = self.state.lock();
        let moments = &state.moments;
        DistributionSnapshot {
            count: moments.count,
            min: moments.min,
            max: moments.max,
            sum: moments.sum,
            mean: moments.mean,
            variance: moments.variance(),
            sorted: state.reservoir.sorted().into(),
        }
    }
}

impl Default for StandardHistogram {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVOIR_SIZE)
    }
}

impl PercentileSource for StandardHistogram {
    fn percentile(&self, quantile: f64) -> f64 {
        let sorted = self.state.lock().reservoir.sorted();
        percentile_of_sorted(&sorted, quantile)
    }

    fn percentiles(&self, quantiles: &[f64]) -> Vec<f64> {
        let sorted = self.state.lock().reservoir.sorted();
        quantiles.iter().map(|q| percentile_of_sorted(&sorted, *q)).collect()
    }
}

impl Distribution for StandardHistogram {
    fn count(&self) -> u64 {
        self.state.lock().moments.count
    }

    fn max(&self) -> i64 {
        self.state.lock().moments.max
    }

    fn mean(&self) -> f64 {
        self.state.lock().moments.mean
    }

    fn min(&self) -> i64 {
        self.state.lock().moments.min
    }

    fn std_dev(&self) -> f64 {
        self.state.lock().moments.variance().sqrt()
    }

    fn sum(&self) -> i64 {
        self.state.lock().moments.sum
    }

    fn variance(&self) -> f64 {
        self.state.lock().moments.variance()
    }
}

/// A frozen view of a histogram.
///
/// Cloning a snapshot is cheap: the sorted samples are shared between clones.
#[derive(Clone, Debug)]
pub struct DistributionSnapshot {
    count: u64,
    min: i64,
    max: i64,
    sum: i64,
    mean: f64,
    variance: f64,
    sorted: Arc<[i64]>,
}

impl DistributionSnapshot {
    /// Gets the sampled values the percentiles are computed from, in ascending order.
    pub fn sample(&self) -> &[i64] {
        &self.sorted
    }
}

impl PercentileSource for DistributionSnapshot {
    fn percentile(&self, quantile: f64) -> f64 {
        percentile_of_sorted(&self.sorted, quantile)
    }
}

impl Distribution for DistributionSnapshot {
    fn count(&self) -> u64 {
        self.count
    }

    fn max(&self) -> i64 {
        self.max
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn min(&self) -> i64 {
        self.min
    }

    fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    fn sum(&self) -> i64 {
        self.sum
    }

    fn variance(&self) -> f64 {
        self.variance
    }
}

/// Linearly interpolates the value at `quantile` from samples sorted in ascending order.
///
/// Quantiles outside 0.0 to 1.0 read the smallest or largest sample. A NaN quantile reads zero.
fn percentile_of_sorted(sorted: &[i64], quantile: f64) -> f64 {
    let len = sorted.len();
    if len == 0 || quantile.is_nan() {
        return 0.0;
    }

    let pos = quantile * (len as f64 + 1.0);
    if pos < 1.0 {
        sorted[0] as f64
    } else if pos >= len as f64 {
        sorted[len - 1] as f64
    } else {
        let idx = pos as usize;
        let lower = sorted[idx - 1] as f64;
        let upper = sorted[idx] as f64;
        lower + (pos - pos.floor()) * (upper - lower)
    }
}
