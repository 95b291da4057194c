//! Blocking throttler for OS threads.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::window::{Admission, Snapshot, TimeWindow, Window, BOUNDARY_TICK};
use super::validate;
use crate::config::ThrottleConfig;
use crate::error::{Result, ThrottleError};

struct Shared {
    state: Mutex<Window>,
    /// Signalled on every rollover and on every cancellation.
    available: Condvar,
}

/// A fixed-window admission gate shared by any number of threads.
///
/// Clones share the same window. Separate calls to [`Throttler::new`] produce
/// independent gates.
#[derive(Clone)]
pub struct Throttler {
    shared: Arc<Shared>,
}

impl Throttler {
    /// Create a throttler admitting `limit` operations per one-unit `window`.
    pub fn new(window: TimeWindow, limit: u32) -> Result<Self> {
        Self::with_window(window.duration(), limit)
    }

    /// Create a throttler with an arbitrary window length.
    pub fn with_window(window: Duration, limit: u32) -> Result<Self> {
        validate(window, limit)?;
        debug!(limit = limit, window = ?window, "Creating throttler");
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Window::new(limit, window, Instant::now())),
                available: Condvar::new(),
            }),
        })
    }

    /// Create a throttler from its configuration section.
    pub fn from_config(config: &ThrottleConfig) -> Result<Self> {
        Self::new(config.window, config.limit)
    }

    /// Block until the current window has room, then count this caller.
    pub fn acquire(&self) {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(wait) = self.admit_or_wait(&mut state) {
                self.shared.available.wait_for(&mut state, wait);
            } else {
                return;
            }
        }
    }

    /// Like [`Throttler::acquire`], but gives up with [`ThrottleError::Cancelled`]
    /// once `token` is cancelled. A cancelled caller is never counted.
    pub fn acquire_with(&self, token: &CancelToken) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if token.is_cancelled() {
                debug!("Acquire cancelled while waiting");
                return Err(ThrottleError::Cancelled);
            }
            match self.admit_or_wait(&mut state) {
                Some(wait) => {
                    self.shared.available.wait_for(&mut state, wait);
                }
                None => return Ok(()),
            }
        }
    }

    /// Count this caller if the window has room, otherwise return how long until it may roll.
    pub fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut state = self.shared.state.lock();
        match state.try_admit(Instant::now()) {
            Admission::Admitted { rolled } => {
                if rolled {
                    self.shared.available.notify_all();
                }
                Ok(())
            }
            Admission::Wait { remaining } => Err(remaining),
        }
    }

    /// Acquire, then run `action` outside the lock.
    pub fn throttled<T>(&self, action: impl FnOnce() -> T) -> T {
        self.acquire();
        action()
    }

    /// A token that can cancel waits on this throttler.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current view of the window.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.state.lock().snapshot(Instant::now())
    }

    /// One pass of the admission loop, run with the lock held.
    ///
    /// Returns `None` once the caller is counted, or the time to sleep before re-checking.
    fn admit_or_wait(&self, state: &mut Window) -> Option<Duration> {
        match state.try_admit(Instant::now()) {
            Admission::Admitted { rolled } => {
                if rolled {
                    debug!("Window rolled over, waking waiters");
                    self.shared.available.notify_all();
                }
                trace!("Admitted");
                None
            }
            Admission::Wait { remaining } if remaining.is_zero() => Some(BOUNDARY_TICK),
            Admission::Wait { remaining } => {
                trace!(remaining = ?remaining, "Window full, waiting");
                Some(remaining)
            }
        }
    }
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("window", &*self.shared.state.lock())
            .finish()
    }
}

/// Cancels waits on the throttler it was created from.
///
/// Clones share the same flag. Used with a different throttler, cancellation is
/// only noticed when that throttler's waiter next wakes.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl CancelToken {
    /// Cancel every wait using this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Waiters check the flag under the lock, so taking it here rules out a lost wakeup.
        let _state = self.shared.state.lock();
        self.shared.available.notify_all();
    }

    /// Whether [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
