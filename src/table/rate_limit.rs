//! Smoothed rate limiting for calls to downstream services
//!
//! One permit is acquired per unit of outer-loop work (one record, one query
//! page). Permits are spaced evenly rather than granted in bursty windows, so
//! the downstream service sees a steady request rate.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Admits at most N operations per second, smoothed.
///
/// `acquire` suspends the caller until its slot arrives and never fails.
/// Callers that stop calling simply stop consuming slots; there is no queue
/// limit.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting `permits_per_second` operations per second.
    ///
    /// A rate of zero is clamped to one permit per second.
    pub fn per_second(permits_per_second: u32) -> Self {
        let permits = permits_per_second.max(1);
        Self::with_interval(Duration::from_secs_f64(1.0 / f64::from(permits)))
    }

    /// Create a limiter with an explicit spacing between permits.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Spacing between consecutive permits.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next permit. Sleeps the calling task when the previous
    /// permit was handed out less than one interval ago.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        sleep_until(slot).await;
    }
}
