//! Retry and rate limiting around remote calls
//!
//! Gateway timeouts are retried with exponential backoff: the n-th retry
//! waits `backoff_unit * 2^(n-1)`. Any other failure is returned at once.
//! Every successful call is followed by a fixed pause so the run never
//! exceeds the API's request rate.

use std::thread;
use std::time::Duration;

use super::RemoteStore;
use crate::error::{Result, SyncError};

/// Retry behavior for remote calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    /// Backoff base; doubles with each retry
    pub backoff_unit: Duration,
    /// Pause after every successful call
    pub min_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// No pauses at all; retries still happen
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_unit: Duration::ZERO,
            min_interval: Duration::ZERO,
        }
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Wait before retry number `retry` (0-indexed)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            min_interval: Duration::from_millis(500),
        }
    }
}

/// A remote store reachable only through retried, rate-limited calls
pub struct Resilient<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S: RemoteStore> Resilient<S> {
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Underlying store, for inspection after a run
    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Execute one remote operation under the retry policy
    pub fn call<T, F>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(&S) -> Result<T>,
    {
        let max_attempts = self.policy.attempts();
        let mut retries = 0;

        loop {
            match op(&self.store) {
                Ok(value) => {
                    if retries > 0 {
                        tracing::info!("{} succeeded after {} retries", operation, retries);
                    }
                    if !self.policy.min_interval.is_zero() {
                        thread::sleep(self.policy.min_interval);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => {
                    let attempt = retries + 1;
                    if attempt >= max_attempts {
                        tracing::error!(
                            "{} failed after {} attempts: {}",
                            operation,
                            max_attempts,
                            e
                        );
                        return Err(SyncError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: max_attempts,
                            source: Box::new(e),
                        });
                    }
                    let wait = self.policy.backoff_for(retries);
                    tracing::warn!(
                        "Gateway timeout on {}, retrying in {:?} (attempt {}/{})",
                        operation,
                        wait,
                        attempt,
                        max_attempts
                    );
                    thread::sleep(wait);
                    retries += 1;
                }
                Err(e) => {
                    tracing::debug!("{} failed: {}", operation, e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use std::cell::Cell;
    use std::time::Instant;

    fn resilient(attempts: u32) -> Resilient<MemoryStore> {
        Resilient::new(MemoryStore::new("root"), RetryPolicy::immediate(attempts))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(64), Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_retries_gateway_timeout_then_succeeds() {
        let remote = resilient(3);
        let calls = Cell::new(0);
        let value = remote
            .call("get_folder", |_| {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(SyncError::remote("get_folder", 504, "Gateway Timeout"))
                } else {
                    Ok(7)
                }
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_waits_backoff_and_rate_limit() {
        let policy = RetryPolicy::new(3)
            .with_backoff_unit(Duration::from_millis(10))
            .with_min_interval(Duration::from_millis(30));
        let remote = Resilient::new(MemoryStore::new("root"), policy);

        let started = Instant::now();
        remote.call("get_folder", |_| Ok(())).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));

        let calls = Cell::new(0);
        let started = Instant::now();
        remote
            .call("get_folder", |_| {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(SyncError::remote("get_folder", 504, "Gateway Timeout"))
                } else {
                    Ok(())
                }
            })
            .unwrap();
        // 10ms and 20ms of backoff, then the 30ms pause after success
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_failures_skip_rate_limit_pause() {
        let policy = RetryPolicy::immediate(3).with_min_interval(Duration::from_millis(200));
        let remote = Resilient::new(MemoryStore::new("root"), policy);

        let started = Instant::now();
        let _ = remote.call::<(), _>("delete_thread", |_| {
            Err(SyncError::remote("delete_thread", 500, "Internal Server Error"))
        });
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_exhausted_retries_are_fatal() {
        let remote = resilient(3);
        let calls = Cell::new(0);
        let err = remote
            .call::<(), _>("get_folder", |_| {
                calls.set(calls.get() + 1);
                Err(SyncError::remote("get_folder", 504, "Gateway Timeout"))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 3);
        assert!(err.is_fatal());
        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let remote = resilient(3);
        let calls = Cell::new(0);
        let err = remote
            .call::<(), _>("delete_thread", |_| {
                calls.set(calls.get() + 1);
                Err(SyncError::remote("delete_thread", 500, "Internal Server Error"))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert!(matches!(err, SyncError::Remote { status: 500, .. }));
    }

    #[test]
    fn test_zero_attempts_still_calls_once() {
        let remote = resilient(0);
        let calls = Cell::new(0);
        let _ = remote.call::<(), _>("get_folder", |_| {
            calls.set(calls.get() + 1);
            Err(SyncError::remote("get_folder", 504, "Gateway Timeout"))
        });
        assert_eq!(calls.get(), 1);
    }
}
