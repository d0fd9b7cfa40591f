use std::time::Duration;

const MAX_CATCH_UP: Duration = Duration::from_millis(250);

pub struct FixedTimestep {
    dt: Duration,
    accumulator: Duration,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            dt: Duration::from_secs_f64(1.0 / tick_rate as f64),
            accumulator: Duration::ZERO,
        }
    }

    /// Long stalls are clamped so the loop does not spiral trying to catch up.
    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator += delta.min(MAX_CATCH_UP);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn until_next_tick(&self) -> Duration {
        self.dt.saturating_sub(self.accumulator)
    }

    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}
