//! Retrying optimistic transactions
//!
//! Every store operation is a closure over a fresh [`StoreTxn`]. The closure
//! runs, the transaction commits, and on a commit conflict the whole closure
//! runs again against a new snapshot. Nothing carries over between attempts:
//! the closure must derive everything from the transaction it is given.
//!
//! Attempts are capped and separated by jittered exponential backoff. A
//! [`RequestContext`] lets the caller cancel or put a deadline on the loop.

use crate::config::RetryConfig;
use crate::error::StoreError;
use crate::kv::KvEngine;
use crate::txn::StoreTxn;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often and how patiently to retry conflicting transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(64),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: exponential in `attempt`, capped,
    /// then drawn uniformly from its upper half.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ceiling = self
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay);
        let ceiling_nanos = ceiling.as_nanos() as u64;
        if ceiling_nanos == 0 {
            return Duration::ZERO;
        }
        let nanos = rand::thread_rng().gen_range(ceiling_nanos / 2..=ceiling_nanos);
        Duration::from_nanos(nanos)
    }
}

/// Cancellation and deadline for one caller request.
///
/// Clones share the cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::default(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// `Err(Cancelled)` once the request should stop.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Run `body` in its own transaction until it commits.
///
/// Commit conflicts are retried under `policy`; any other error ends the loop
/// and is returned as is. Once the attempts run out the result is
/// [`StoreError::Busy`].
pub fn run_in_txn<T, F>(
    engine: &dyn KvEngine,
    policy: &RetryPolicy,
    ctx: &RequestContext,
    operation: &str,
    mut body: F,
) -> Result<T, StoreError>
where
    F: FnMut(&mut StoreTxn<'_>) -> Result<T, StoreError>,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        ctx.check()?;

        let mut txn = StoreTxn::begin(engine)?;
        let outcome = match body(&mut txn) {
            Ok(value) => txn.commit().map(|()| value),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Committed after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() => {
                if attempt == max_attempts {
                    break;
                }
                let mut delay = policy.backoff(attempt);
                if let Some(remaining) = ctx.remaining() {
                    delay = delay.min(remaining);
                }
                warn!(
                    operation,
                    attempt,
                    delay_us = delay.as_micros() as u64,
                    error = %err,
                    "Transaction conflict, retrying"
                );
                thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }

    warn!(operation, attempts = max_attempts, "Giving up after repeated conflicts");
    Err(StoreError::Busy {
        attempts: max_attempts,
    })
}
