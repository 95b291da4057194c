//! Fixed-window admission bookkeeping.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Wait used when the window is exactly at its boundary and cannot roll yet.
pub(crate) const BOUNDARY_TICK: Duration = Duration::from_millis(1);

/// Time window for throttling, one unit long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// One millisecond
    Millisecond,
    /// One second
    Second,
    /// One minute
    Minute,
    /// One hour
    Hour,
    /// One day
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Millisecond => Duration::from_millis(1),
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }
}

impl std::str::FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "millisecond" | "ms" => Ok(TimeWindow::Millisecond),
            "second" | "s" => Ok(TimeWindow::Second),
            "minute" | "m" => Ok(TimeWindow::Minute),
            "hour" | "h" => Ok(TimeWindow::Hour),
            "day" | "d" => Ok(TimeWindow::Day),
            other => Err(format!("unknown time window '{}'", other)),
        }
    }
}

/// Outcome of a single admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The caller was counted. `rolled` is set when this attempt opened a new window.
    Admitted { rolled: bool },
    /// The window is full; it can roll once `remaining` has passed.
    Wait { remaining: Duration },
}

/// Point-in-time view of a throttler's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Maximum admissions per window
    pub limit: u32,
    /// Admissions counted in the current window
    pub count: u32,
    /// Admissions still available in the current window
    pub remaining: u32,
    /// Window length
    pub window: Duration,
    /// Time until the current window can roll
    pub until_reset: Duration,
}

/// Window state shared by the blocking and async gates.
///
/// Holds no lock and reads no clock: callers own the exclusion and pass `now` in.
#[derive(Debug)]
pub(crate) struct Window {
    limit: u32,
    length: Duration,
    start: Instant,
    count: u32,
}

impl Window {
    pub(crate) fn new(limit: u32, length: Duration, now: Instant) -> Self {
        Self {
            limit,
            length,
            start: now,
            count: 0,
        }
    }

    /// Roll over if strictly more than one window length has passed since `start`.
    fn maybe_roll(&mut self, now: Instant) -> bool {
        if self.elapsed(now) > self.length {
            self.start = now;
            self.count = 0;
            true
        } else {
            false
        }
    }

    /// Count one admission if the window has room, rolling it first when expired.
    pub(crate) fn try_admit(&mut self, now: Instant) -> Admission {
        let rolled = self.maybe_roll(now);
        if self.count < self.limit {
            self.count += 1;
            Admission::Admitted { rolled }
        } else {
            Admission::Wait {
                remaining: self.remaining_time(now),
            }
        }
    }

    /// View of the window as of `now`, without mutating it.
    pub(crate) fn snapshot(&self, now: Instant) -> Snapshot {
        let expired = self.elapsed(now) > self.length;
        let count = if expired { 0 } else { self.count };
        Snapshot {
            limit: self.limit,
            count,
            remaining: self.limit.saturating_sub(count),
            window: self.length,
            until_reset: if expired {
                Duration::ZERO
            } else {
                self.remaining_time(now)
            },
        }
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }

    fn remaining_time(&self, now: Instant) -> Duration {
        self.length.saturating_sub(self.elapsed(now))
    }
}
