//! Async throttler for tokio tasks.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::window::{Admission, Snapshot, TimeWindow, Window, BOUNDARY_TICK};
use super::validate;
use crate::config::ThrottleConfig;
use crate::error::Result;

/// Reads tokio's clock so paused-time tests drive the window too.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

struct Shared {
    state: Mutex<Window>,
    rolled: Notify,
}

/// The tokio counterpart of [`super::Throttler`].
///
/// Waiting tasks sleep until the window can roll, or until another task rolls it.
/// Dropping an `acquire()` future cancels that wait without counting it.
#[derive(Clone)]
pub struct AsyncThrottler {
    shared: Arc<Shared>,
}

impl AsyncThrottler {
    /// Create a throttler admitting `limit` operations per one-unit `window`.
    pub fn new(window: TimeWindow, limit: u32) -> Result<Self> {
        Self::with_window(window.duration(), limit)
    }

    /// Create a throttler with an arbitrary window length.
    pub fn with_window(window: Duration, limit: u32) -> Result<Self> {
        validate(window, limit)?;
        debug!(limit = limit, window = ?window, "Creating async throttler");
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Window::new(limit, window, now())),
                rolled: Notify::new(),
            }),
        })
    }

    /// Create a throttler from its configuration section.
    pub fn from_config(config: &ThrottleConfig) -> Result<Self> {
        Self::new(config.window, config.limit)
    }

    /// Wait until the current window has room, then count this task.
    pub async fn acquire(&self) {
        loop {
            let notified;
            let remaining = {
                let mut state = self.shared.state.lock();
                match state.try_admit(now()) {
                    Admission::Admitted { rolled } => {
                        if rolled {
                            debug!("Window rolled over, waking waiters");
                            self.shared.rolled.notify_waiters();
                        }
                        trace!("Admitted");
                        return;
                    }
                    Admission::Wait { remaining } => {
                        // Registered under the lock so a concurrent rollover cannot be missed.
                        notified = self.shared.rolled.notified();
                        remaining
                    }
                }
            };

            let wait = if remaining.is_zero() {
                BOUNDARY_TICK
            } else {
                remaining
            };
            trace!(remaining = ?wait, "Window full, waiting");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = notified => {}
            }
        }
    }

    /// Count this task if the window has room, otherwise return how long until it may roll.
    pub fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut state = self.shared.state.lock();
        match state.try_admit(now()) {
            Admission::Admitted { rolled } => {
                if rolled {
                    self.shared.rolled.notify_waiters();
                }
                Ok(())
            }
            Admission::Wait { remaining } => Err(remaining),
        }
    }

    /// Current view of the window.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.state.lock().snapshot(now())
    }
}

impl std::fmt::Debug for AsyncThrottler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncThrottler")
            .field("window", &*self.shared.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThrottleError;
    use tokio::time::{sleep, timeout, Instant};
    use tokio_test::assert_pending;

    const WINDOW: Duration = Duration::from_secs(1);

    #[test]
    fn test_zero_limit_is_rejected() {
        let err = AsyncThrottler::new(TimeWindow::Second, 0).unwrap_err();
        assert!(matches!(err, ThrottleError::InvalidConfiguration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_until_window_rolls() {
        let t0 = Instant::now();
        let throttler = AsyncThrottler::with_window(WINDOW, 2).unwrap();
        throttler.acquire().await;
        throttler.acquire().await;

        let early = timeout(Duration::from_millis(999), throttler.acquire()).await;
        assert!(early.is_err());
        assert_eq!(throttler.snapshot().count, 2);

        throttler.acquire().await;
        assert!(t0.elapsed() > WINDOW);
        assert_eq!(throttler.snapshot().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_per_second_scenario() {
        let throttler = AsyncThrottler::with_window(WINDOW, 2).unwrap();

        throttler.acquire().await;
        sleep(Duration::from_millis(100)).await;
        throttler.acquire().await;
        sleep(Duration::from_millis(100)).await;

        let blocked_at = Instant::now();
        throttler.acquire().await;
        let waited = blocked_at.elapsed();

        assert!(waited > Duration::from_millis(800), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(810), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_is_not_counted() {
        let throttler = AsyncThrottler::new(TimeWindow::Minute, 1).unwrap();
        throttler.acquire().await;

        let mut waiter = tokio_test::task::spawn(throttler.acquire());
        assert_pending!(waiter.poll());
        drop(waiter);

        assert_eq!(throttler.snapshot().count, 1);
        assert!(throttler.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_tasks_respect_each_window() {
        let t0 = Instant::now();
        let throttler = AsyncThrottler::with_window(WINDOW, 2).unwrap();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let throttler = throttler.clone();
                tokio::spawn(async move {
                    throttler.acquire().await;
                    t0.elapsed()
                })
            })
            .collect();
        let admitted: Vec<Duration> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let within = |bound: Duration| admitted.iter().filter(|d| **d <= bound).count();
        assert_eq!(admitted.len(), 6);
        assert_eq!(within(WINDOW), 2);
        assert!(within(2 * WINDOW) <= 4);
        assert!(admitted.iter().all(|d| *d < 4 * WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollover_releases_every_eligible_waiter() {
        let t0 = Instant::now();
        let throttler = AsyncThrottler::with_window(WINDOW, 3).unwrap();
        for _ in 0..3 {
            throttler.acquire().await;
        }

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let throttler = throttler.clone();
                tokio::spawn(async move { throttler.acquire().await })
            })
            .collect();
        for result in futures::future::join_all(waiters).await {
            result.unwrap();
        }

        assert!(t0.elapsed() < WINDOW + Duration::from_millis(10));
        assert_eq!(throttler.snapshot().count, 3);
    }
}
