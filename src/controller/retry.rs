//! Bounded retry of read-modify-write loops that lose optimistic concurrency races

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Errors that can report an optimistic concurrency conflict
pub trait ConflictAware {
    fn is_conflict(&self) -> bool;
}

impl ConflictAware for crate::controller::errors::StoreError {
    fn is_conflict(&self) -> bool {
        crate::controller::errors::StoreError::is_conflict(self)
    }
}

/// Exponential backoff with a fixed number of attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub steps: u32,
    pub initial: Duration,
    pub factor: u32,
}

/// 4 attempts, sleeping 10ms, 50ms, 250ms between them
pub const DEFAULT_CONFLICT_BACKOFF: Backoff = Backoff {
    steps: 4,
    initial: Duration::from_millis(10),
    factor: 5,
};

impl Default for Backoff {
    fn default() -> Self {
        DEFAULT_CONFLICT_BACKOFF
    }
}

impl Backoff {
    /// Delay after the given (0-indexed) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial * self.factor.saturating_pow(attempt)
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// backoff is exhausted. The last conflict is returned when attempts run out.
pub async fn retry_on_conflict<T, E, F, Fut>(backoff: Backoff, mut op: F) -> Result<T, E>
where
    E: ConflictAware,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt + 1 < backoff.steps => {
                let delay = backoff.delay(attempt);
                debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Conflict, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
