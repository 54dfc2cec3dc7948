//! Production clock and randomness.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::domain::{Clock, RandomSource};

const ALPHANUMERIC_UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn chance(&self, p: f64) -> bool {
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        rand::thread_rng().gen_bool(p)
    }

    fn duration_between(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    fn alphanumeric(&self, len: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..len)
            .map(|_| ALPHANUMERIC_UPPER[rng.gen_range(0..ALPHANUMERIC_UPPER.len())] as char)
            .collect()
    }
}
