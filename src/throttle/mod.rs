//! Fixed-window throttling for threads and tokio tasks.

mod blocking;
mod nonblocking;
mod window;

pub use blocking::{CancelToken, Throttler};
pub use nonblocking::AsyncThrottler;
pub use window::{Snapshot, TimeWindow};

use std::time::Duration;

use crate::error::{Result, ThrottleError};

/// Construction checks shared by both throttlers.
fn validate(window: Duration, limit: u32) -> Result<()> {
    if limit == 0 {
        return Err(ThrottleError::InvalidConfiguration(
            "limit must be positive".to_string(),
        ));
    }
    if window.is_zero() {
        return Err(ThrottleError::InvalidConfiguration(
            "window must be longer than zero".to_string(),
        ));
    }
    Ok(())
}
