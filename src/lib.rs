//! Tollgate - fixed-window request throttling
//!
//! This crate gates a rate-limited action behind a shared admission check: at most
//! `limit` callers are admitted per window, and the rest wait until the window
//! rolls over. Both a blocking gate for OS threads and an async gate for tokio
//! tasks are provided, along with a small dispatcher used by the `tollgate` binary.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod throttle;

pub use error::{Result, ThrottleError};
pub use throttle::{AsyncThrottler, CancelToken, Snapshot, Throttler, TimeWindow};
