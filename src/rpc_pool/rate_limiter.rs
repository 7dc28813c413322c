use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    time::{Instant, sleep_until},
};
use tracing::trace;

/// Token-bucket rate limiter shared by all workers using an endpoint.
///
/// Two budgets are enforced atomically: request spacing (`requests_per_second`) through a
/// single scheduling slot behind a mutex, and an in-flight cap through a semaphore. Callers
/// wait for a slot; requests are never dropped.
#[derive(Debug, Clone)]
pub(crate) struct RateLimiter {
    semaphore: Arc<Semaphore>,
    min_interval: Duration,
    // next instant a request is allowed to start; the mutex is the atomic accounting point
    next_slot: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    pub(crate) fn new(requests_per_second: u32, max_concurrent: usize) -> Self {
        assert!(requests_per_second > 0, "requests_per_second must be at least 1");
        assert!(max_concurrent > 0, "max_concurrent must be at least 1");

        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            min_interval: Duration::from_secs(1) / requests_per_second,
            next_slot: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Waits for an execution slot and returns a permit held for the duration of the call.
    ///
    /// Dropping the permit releases the in-flight slot; the pacing slot is consumed
    /// immediately on acquisition so concurrent callers queue behind each other.
    pub(crate) async fn acquire(&self) -> RatePermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("rate limiter semaphore is never closed");

        let scheduled_at = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next_slot).max(now);
            *next_slot = slot + self.min_interval;
            slot
        };

        if scheduled_at > Instant::now() {
            trace!(wait = ?(scheduled_at - Instant::now()), "Rate limit pacing");
        }
        sleep_until(scheduled_at).await;

        RatePermit { _permit: permit }
    }
}

/// Releases the in-flight slot when dropped.
#[derive(Debug)]
pub(crate) struct RatePermit {
    _permit: OwnedSemaphorePermit,
}
