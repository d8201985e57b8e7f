//! Exponential back-off with full jitter.

use std::time::Duration;

use rand::Rng;

/// Stateful back-off calculator: `next()` draws uniformly from
/// `[0, min(base * 2^attempt, max)]` so synchronized retry storms spread out.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max,
            attempt: 0,
        }
    }

    /// Returns the next jittered delay and advances the attempt counter.
    pub fn next(&mut self) -> Duration {
        let exp = self.attempt.min(32);
        let cap = self
            .base
            .saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        let cap_ns = cap.as_nanos().min(u64::MAX as u128) as u64;
        Duration::from_nanos(rand::thread_rng().gen_range(0..=cap_ns))
    }

    /// Restarts the sequence so the next delay falls within `[0, base]`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_exponential_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(2);
        let mut bo = Backoff::new(base, max);
        for attempt in 0..10u32 {
            let cap = base
                .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
                .min(max);
            let d = bo.next();
            assert!(d <= cap, "attempt {attempt}: {d:?} > {cap:?}");
        }
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut bo = Backoff::new(Duration::from_millis(50), Duration::from_secs(10));
        for _ in 0..8 {
            bo.next();
        }
        bo.reset();
        assert!(bo.next() <= Duration::from_millis(50));
    }
}
