//! Per-key requeue policy for failed reconciles
//!
//! Transient failures are retried with exponential backoff until a key has
//! failed `max_retries` times in a row, after which it is dropped until the
//! next watch event. Fatal failures are never retried.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueDecision {
    /// Try again after the delay
    Retry(Duration),
    /// Retry budget spent; wait for the next change
    Drop,
    /// Retrying cannot help; wait for the next change
    Forget,
}

#[derive(Debug)]
pub struct RequeuePolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RequeuePolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        // The map holds plain counters, a poisoned lock is still usable
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Consecutive failures recorded for `key`
    pub fn retries(&self, key: &str) -> u32 {
        self.failures().get(key).copied().unwrap_or(0)
    }

    /// Record a failed reconcile of `key` and decide what happens next
    pub fn on_error(&self, key: &str, fatal: bool) -> RequeueDecision {
        let mut failures = self.failures();
        if fatal {
            failures.remove(key);
            return RequeueDecision::Forget;
        }

        let count = failures.get(key).copied().unwrap_or(0);
        if count >= self.max_retries {
            failures.remove(key);
            return RequeueDecision::Drop;
        }
        failures.insert(key.to_string(), count + 1);
        RequeueDecision::Retry(self.delay(count))
    }

    /// Reset the failure count after a successful reconcile
    pub fn forget(&self, key: &str) {
        self.failures().remove(key);
    }

    fn delay(&self, count: u32) -> Duration {
        let factor = 2u32.checked_pow(count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}
