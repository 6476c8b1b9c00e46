use rand::rngs::OsRng;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Default)]
/// Produces human-like pauses to reduce automation signals.
pub struct BehavioralEngine {}

impl BehavioralEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// Random duration in `0..=max_ms` milliseconds.
    pub fn jitter(&self, max_ms: u64) -> Duration {
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(OsRng.gen_range(0..=max_ms))
    }

    /// Sleep for a random duration between `min` and `max` milliseconds.
    pub async fn random_delay(&self, min: u64, max: u64) {
        let ms = if max > min { OsRng.gen_range(min..=max) } else { min };
        sleep(Duration::from_millis(ms)).await;
    }

    /// Sleep `base` plus up to `jitter_ms` of noise; gives client-side
    /// rendering time to finish after the load event.
    pub async fn settle(&self, base: Duration, jitter_ms: u64) {
        sleep(base + self.jitter(jitter_ms)).await;
    }
}
