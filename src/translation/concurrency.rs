/*!
 * Shared cap on in-flight translation requests.
 *
 * The limiter is the only state shared between concurrent pipeline runs.
 * Every request attempt holds a permit for its whole duration, so the number
 * of requests in flight never exceeds the configured limit, however many runs
 * or units are active.
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct Gauge {
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

/// Cloneable handle on a shared request limit
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    gauge: Arc<Gauge>,
    limit: usize,
}

/// Permit held while one request is in flight
#[derive(Debug)]
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<Gauge>,
}

impl Drop for RequestPermit {
    fn drop(&mut self) {
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyLimiter {
    /// Limiter allowing `limit` requests at once (at least one)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            gauge: Arc::new(Gauge {
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
            }),
            limit,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<RequestPermit, AcquireError> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        let now = self.gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.high_water.fetch_max(now, Ordering::SeqCst);
        Ok(RequestPermit { _permit: permit, gauge: Arc::clone(&self.gauge) })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Requests currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous permits observed
    pub fn high_water_mark(&self) -> usize {
        self.gauge.high_water.load(Ordering::SeqCst)
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(4)
    }
}
