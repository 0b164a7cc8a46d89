use std::time::Duration;

/// How often moving averages are folded forward.
pub(crate) const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// An exponentially-weighted moving average of an event rate, in events per second.
#[derive(Clone, Debug)]
pub(crate) struct Ewma {
    alpha: f64,
    rate: f64,
    initialized: bool,
}

impl Ewma {
    /// Creates an average over a window of `minutes`, ticked every [`TICK_INTERVAL`].
    pub fn over_minutes(minutes: f64) -> Self {
        let alpha = 1.0 - (-TICK_INTERVAL.as_secs_f64() / 60.0 / minutes).exp();
        Self { alpha, rate: 0.0, initialized: false }
    }

    /// Folds one tick worth of events into the average.
    ///
    /// The first tick seeds the average with the instantaneous rate.
    pub fn tick(&mut self, events: u64) {
        let instant_rate = events as f64 / TICK_INTERVAL.as_secs_f64();
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }

    /// Advances the average by `ticks` ticks, where only the first one saw `events`.
    pub fn advance(&mut self, events: u64, ticks: u64) {
        if ticks == 0 {
            return;
        }

        self.tick(events);
        if ticks > 1 {
            // Idle ticks only decay the rate, so apply them in closed form.
            self.rate *= (1.0 - self.alpha).powf((ticks - 1) as f64);
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}
