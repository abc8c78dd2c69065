//! Per-store token bucket with fixed one-minute refill windows.

use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Refill window length. Provider quotas are expressed per minute.
const WINDOW: Duration = Duration::from_secs(60);

/// Rate limiter state for one (tenant, provider) pair.
///
/// The reservoir holds `capacity` tokens, refilled fully at fixed window
/// boundaries (not continuously), so a burst can spend the whole minute's
/// budget up front but nothing escapes until the next window once it is
/// empty. The semaphore additionally caps in-flight calls so scheduled
/// bursts do not overwhelm the remote host within the per-minute budget.
pub struct StoreLimiter {
    capacity: u32,
    reservoir: Mutex<Reservoir>,
    concurrency: Semaphore,
}

struct Reservoir {
    tokens: u32,
    window_started: Instant,
}

impl StoreLimiter {
    /// Create a limiter with the given per-minute capacity and concurrency cap.
    #[must_use]
    pub fn new(capacity: u32, concurrency: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            reservoir: Mutex::new(Reservoir {
                tokens: capacity,
                window_started: Instant::now(),
            }),
            concurrency: Semaphore::new(concurrency.max(1) as usize),
        }
    }

    /// The concurrency semaphore; callers hold a permit for the duration of
    /// one outbound call.
    pub const fn concurrency(&self) -> &Semaphore {
        &self.concurrency
    }

    /// Take one token, waiting for the next refill window when the
    /// reservoir is empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut reservoir = self.reservoir.lock().await;
                let now = Instant::now();
                // Advance in whole windows to keep refill boundaries fixed.
                while now.duration_since(reservoir.window_started) >= WINDOW {
                    reservoir.window_started += WINDOW;
                    reservoir.tokens = self.capacity;
                }
                if reservoir.tokens > 0 {
                    reservoir.tokens -= 1;
                    return;
                }
                (reservoir.window_started + WINDOW).saturating_duration_since(now)
            };
            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }
    }

    /// Empty the reservoir so no queued call escapes during a cooldown.
    pub async fn drain(&self) {
        self.reservoir.lock().await.tokens = 0;
    }

    /// Put exactly one token back so a retried call can proceed.
    pub async fn refund_one(&self) {
        let mut reservoir = self.reservoir.lock().await;
        reservoir.tokens = (reservoir.tokens + 1).min(self.capacity);
    }

    #[cfg(test)]
    pub async fn available(&self) -> u32 {
        self.reservoir.lock().await.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reservoir_exhaustion_waits_for_next_window() {
        let limiter = StoreLimiter::new(40, 4);

        let start = Instant::now();
        for _ in 0..40 {
            limiter.acquire().await;
        }
        // The whole budget is spendable immediately.
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Call #41 must wait for the next refill window.
        limiter.acquire().await;
        assert!(start.elapsed() >= WINDOW);
        assert!(start.elapsed() < WINDOW + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_full_not_incremental() {
        let limiter = StoreLimiter::new(3, 1);
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.available().await, 0);

        tokio::time::advance(WINDOW).await;
        limiter.acquire().await;
        assert_eq!(limiter.available().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_and_refund() {
        let limiter = StoreLimiter::new(10, 1);
        limiter.acquire().await;
        assert_eq!(limiter.available().await, 9);

        limiter.drain().await;
        assert_eq!(limiter.available().await, 0);

        limiter.refund_one().await;
        assert_eq!(limiter.available().await, 1);

        // Refund never exceeds capacity.
        for _ in 0..20 {
            limiter.refund_one().await;
        }
        assert_eq!(limiter.available().await, 10);
    }
}
