//! Bounded retry with jittered exponential backoff for optimistic-concurrency conflicts.

use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Retry policy for compare-and-set loops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Fraction (0.0-1.0) of each delay that is randomised.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            jitter: 0.5,
        }
    }
}

/// Outcome of a single attempt inside [`RetryPolicy::run`].
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// Lost a race; try again from a fresh read.
    Conflict,
    Failed(E),
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt conflicted.
    Exhausted { attempts: u32 },
    Failed(E),
}

impl RetryPolicy {
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }

    /// Immediate retries, for tests that want to hammer a single key.
    pub fn without_backoff(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Upper bound of the delay after `attempt` (1-indexed) failed, before jitter.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Delay to sleep after `attempt` (1-indexed) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || ceiling.is_zero() {
            return ceiling;
        }
        let factor = 1.0 - jitter * rand::thread_rng().r#gen::<f64>();
        ceiling.mul_f64(factor)
    }

    /// Run `op` until it returns `Done` or `Failed`, or until `max_attempts` conflicts.
    ///
    /// `op` receives the 1-indexed attempt number and must re-read whatever state it
    /// depends on each time.
    pub fn run<T, E>(&self, mut op: impl FnMut(u32) -> Attempt<T, E>) -> Result<T, RetryError<E>> {
        let max = self.max_attempts.max(1);
        for attempt in 1..=max {
            match op(attempt) {
                Attempt::Done(value) => return Ok(value),
                Attempt::Failed(err) => return Err(RetryError::Failed(err)),
                Attempt::Conflict => {
                    if attempt < max {
                        let delay = self.delay_for_attempt(attempt);
                        debug!(attempt, delay_ms = delay.as_millis() as u64, "conflict, backing off");
                        if !delay.is_zero() {
                            thread::sleep(delay);
                        }
                    }
                }
            }
        }
        Err(RetryError::Exhausted { attempts: max })
    }
}
