use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::time::Duration;

/// Periodic ticker whose intervals are `base + N(0, stdev)`, floored at zero.
///
/// A negative sample fires on the next poll, so a large `stdev` produces
/// bursts of back-to-back ticks as well as long gaps.
#[derive(Debug)]
pub struct JitterTicker {
    base: Duration,
    stdev: Duration,
    rng: StdRng,
}

impl JitterTicker {
    pub fn new(base: Duration, stdev: Duration) -> Self {
        Self {
            base,
            stdev,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(base: Duration, stdev: Duration, seed: u64) -> Self {
        Self {
            base,
            stdev,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Next interval. Samples beyond the range of [`Duration`] saturate at
    /// [`Duration::MAX`].
    pub fn next_delay(&mut self) -> Duration {
        if self.stdev.is_zero() {
            return self.base;
        }
        let normal = match Normal::new(self.base.as_secs_f64(), self.stdev.as_secs_f64()) {
            Ok(normal) => normal,
            Err(_) => return self.base,
        };
        let secs = normal.sample(&mut self.rng);
        if secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        }
    }

    /// Sleep until the next tick.
    pub async fn tick(&mut self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}
