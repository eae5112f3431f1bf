//! Backoff schedules
//!
//! Used by sinks between redelivery attempts and by the drain loop between
//! channel polls.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const FALLBACK_SEED: u64 = 0x853c49e6748fea9b;

/// Lock-free xorshift64 generator for jitter
struct Xorshift64 {
    state: AtomicU64,
}

impl Xorshift64 {
    fn seeded() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(FALLBACK_SEED);
        Self {
            state: AtomicU64::new(if seed == 0 { FALLBACK_SEED } else { seed }),
        }
    }

    fn next_unit(&self) -> f64 {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let mut x = current;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            match self
                .state
                .compare_exchange_weak(current, x, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return (x as f64) / (u64::MAX as f64),
                Err(actual) => current = actual,
            }
        }
    }
}

static JITTER: LazyLock<Xorshift64> = LazyLock::new(Xorshift64::seeded);

/// Exponential backoff with optional jitter
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt (1.0 = fixed interval)
    pub multiplier: f64,
    /// Randomizes each delay by +/- this fraction (0.0 = none)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Same delay for every attempt, no jitter
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Delay before attempt `attempt` (0-indexed, attempt 0 has none)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.jitter_factor == 0.0 {
            return self.delay_with_jitter(attempt, 0.5);
        }
        self.delay_with_jitter(attempt, JITTER.next_unit())
    }

    /// Delay with an explicit jitter sample in `[0.0, 1.0]`
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_us = self.initial_delay.as_micros() as f64 * self.multiplier.powi(exponent);
        let base_us = base_us.min(self.max_delay.as_micros() as f64);

        // jitter in [0, 1] maps to an offset in [-range, +range]
        let offset = (jitter * 2.0 - 1.0) * base_us * self.jitter_factor;
        let final_us = (base_us + offset).max(1.0);

        Duration::from_micros(final_us as u64)
    }
}
