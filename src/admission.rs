//! Per-key admission control.
//!
//! Each client key gets a rolling-window limiter, created lazily on first
//! use. `acquire` suspends the caller until a slot frees up inside the
//! window; it never rejects and never bounds the wait. Slots free
//! automatically as the window advances, so there is no release call.
//!
//! The registry is process-local: under horizontal scaling each instance
//! enforces its own budget, so a shared backing store is required for a
//! global guarantee.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::AdmissionConfig;

pub struct AdmissionController {
    limiters: DashMap<String, Arc<RollingWindowLimiter>>,
    requests_per_window: u32,
    window: Duration,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            limiters: DashMap::new(),
            requests_per_window: config.requests_per_window.max(1),
            window: Duration::from_secs(config.window_secs),
        }
    }

    /// Wait until the key is allowed another request within the rolling
    /// window. Suspends without blocking other tasks.
    pub async fn acquire(&self, key: &str) {
        let limiter = self
            .limiters
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(key = %key, "Creating limiter for new client key");
                Arc::new(RollingWindowLimiter::new(
                    self.requests_per_window as usize,
                    self.window,
                ))
            })
            .clone();

        limiter.acquire().await;
    }

    /// Number of client keys with a live limiter.
    pub fn tracked_keys(&self) -> usize {
        self.limiters.len()
    }
}

/// Admits at most `capacity` acquisitions per rolling `window`.
struct RollingWindowLimiter {
    capacity: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RollingWindowLimiter {
    fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut admitted = self.admitted.lock().await;
                let now = Instant::now();

                while let Some(front) = admitted.front() {
                    if now.duration_since(*front) >= self.window {
                        admitted.pop_front();
                    } else {
                        break;
                    }
                }

                if admitted.len() < self.capacity {
                    admitted.push_back(now);
                    return;
                }

                // Oldest admission leaving the window frees the next slot.
                *admitted.front().expect("queue is at capacity") + self.window - now
            };

            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn controller(rate: u32, window_secs: u64) -> AdmissionController {
        AdmissionController::new(&AdmissionConfig {
            requests_per_window: rate,
            window_secs,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_capacity_immediately() {
        let ctrl = controller(3, 60);
        let start = Instant::now();
        for _ in 0..3 {
            ctrl.acquire("k").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_acquire_waits_for_window() {
        let ctrl = controller(3, 60);
        for _ in 0..3 {
            ctrl.acquire("k").await;
        }

        let start = Instant::now();
        ctrl.acquire("k").await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_rate_per_rolling_window() {
        const RATE: usize = 3;
        const WINDOW: Duration = Duration::from_secs(10);
        const TASKS: usize = 10;

        let ctrl = Arc::new(controller(RATE as u32, WINDOW.as_secs()));
        let admissions: Arc<StdMutex<Vec<Instant>>> = Arc::new(StdMutex::new(Vec::new()));

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let ctrl = Arc::clone(&ctrl);
                let admissions = Arc::clone(&admissions);
                tokio::spawn(async move {
                    ctrl.acquire("shared").await;
                    admissions.lock().unwrap().push(Instant::now());
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let mut times = admissions.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), TASKS);

        // Sliding check: every admission and the (RATE)th one after it
        // must be at least a full window apart.
        for pair in times.windows(RATE + 1) {
            let span = pair[RATE].duration_since(pair[0]);
            assert!(
                span >= WINDOW,
                "{} admissions inside {:?} window",
                RATE + 1,
                span
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let ctrl = controller(1, 60);
        ctrl.acquire("a").await;

        // A different key is not throttled by key "a" exhausting its slot.
        let start = Instant::now();
        ctrl.acquire("b").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(ctrl.tracked_keys(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_created_once_per_key() {
        let ctrl = Arc::new(controller(100, 60));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ctrl = Arc::clone(&ctrl);
                tokio::spawn(async move { ctrl.acquire("same").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ctrl.tracked_keys(), 1);
    }
}
