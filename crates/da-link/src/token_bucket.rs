//! Per-link send budget.
//!
//! `max_budget=32, replenish_amount=16, replenish_interval_ms=100` per the
//! fixed configuration every stubborn link uses. The bucket bounds how
//! many unacked packets a single retransmit pass may (re)send.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub max_budget: u32,
    pub replenish_amount: u32,
    pub replenish_interval: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        TokenBucketConfig {
            max_budget: 32,
            replenish_amount: 16,
            replenish_interval: Duration::from_millis(100),
        }
    }
}

pub struct TokenBucket {
    current: AtomicU32,
    config: TokenBucketConfig,
    last_replenish: Mutex<Instant>,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        TokenBucket {
            current: AtomicU32::new(config.max_budget),
            config,
            last_replenish: Mutex::new(Instant::now()),
        }
    }

    /// Snapshot of tokens currently available.
    pub fn available(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    /// Consume up to `want` tokens, returning how many were actually
    /// available (floored at 0, never negative).
    pub fn take(&self, want: u32) -> u32 {
        let mut taken = 0;
        loop {
            let current = self.current.load(Ordering::Acquire);
            let grant = want.min(current);
            if grant == 0 {
                return taken;
            }
            match self.current.compare_exchange_weak(
                current,
                current - grant,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    taken = grant;
                    return taken;
                }
                Err(_) => continue,
            }
        }
    }

    /// Credit `amount` tokens, capped at `max_budget`. Called once per ACK
    /// received, and periodically by `replenish_if_due`.
    pub fn credit(&self, amount: u32) {
        let max = self.config.max_budget;
        loop {
            let current = self.current.load(Ordering::Acquire);
            let new_value = current.saturating_add(amount).min(max);
            if new_value == current {
                return;
            }
            if self
                .current
                .compare_exchange_weak(current, new_value, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// If `replenish_interval` has elapsed since the last replenishment,
    /// credit `replenish_amount` and reset the timer.
    pub fn replenish_if_due(&self) {
        let mut last = self.last_replenish.lock().expect("token bucket mutex poisoned");
        if last.elapsed() >= self.config.replenish_interval {
            self.credit(self.config.replenish_amount);
            *last = Instant::now();
        }
    }

    pub fn replenish_interval(&self) -> Duration {
        self.config.replenish_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_never_exceeds_available() {
        let bucket = TokenBucket::new(TokenBucketConfig::default());
        assert_eq!(bucket.take(100), 32);
        assert_eq!(bucket.available(), 0);
        assert_eq!(bucket.take(1), 0);
    }

    #[test]
    fn credit_is_capped_at_max_budget() {
        let bucket = TokenBucket::new(TokenBucketConfig::default());
        bucket.credit(1000);
        assert_eq!(bucket.available(), 32);
    }

    #[test]
    fn replenish_if_due_respects_interval() {
        let config = TokenBucketConfig {
            max_budget: 32,
            replenish_amount: 16,
            replenish_interval: Duration::from_millis(10),
        };
        let bucket = TokenBucket::new(config);
        bucket.take(32);
        assert_eq!(bucket.available(), 0);
        bucket.replenish_if_due();
        assert_eq!(bucket.available(), 0, "interval not yet elapsed");
        std::thread::sleep(Duration::from_millis(15));
        bucket.replenish_if_due();
        assert_eq!(bucket.available(), 16);
    }
}
