//! Linear retry for collaborator lookups.
//!
//! Attempt `n` (0-based) that fails waits `step * n` before the next try, so
//! the default schedule is 0s, 2s, 4s. Exhausting the attempts yields `None`;
//! lookups never raise.

use std::cmp;
use std::fmt::Display;
use std::thread;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_STEP: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            step: DEFAULT_STEP,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            step: Duration::ZERO,
        }
    }
}

fn compute_delay(step: Duration, attempt: u32) -> Duration {
    cmp::min(step.saturating_mul(attempt), MAX_DELAY)
}

pub fn retry_linear<T, E, F>(label: &str, policy: RetryPolicy, mut op: F) -> Option<T>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    for attempt in 0..policy.attempts {
        match op() {
            Ok(value) => return Some(value),
            Err(err) => {
                let delay = compute_delay(policy.step, attempt);
                warn!(
                    operation = label,
                    attempt = attempt + 1,
                    attempts = policy.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Lookup failed"
                );
                if attempt + 1 < policy.attempts && !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
    }
    None
}
