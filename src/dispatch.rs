//! Demo dispatcher that pushes simulated submissions through a throttler.
//!
//! Each submission stands in for the downstream call a throttler guards: the
//! worker waits for admission, records how long that took, then "performs" the
//! call by sleeping for a random latency outside the throttler's lock.

use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{Result, ThrottleError};
use crate::throttle::{AsyncThrottler, Throttler};

/// Outcome of one simulated submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    /// Submission identifier
    pub id: Uuid,
    /// Index of the worker that sent it
    pub worker: usize,
    /// Time spent waiting for admission
    #[serde(rename = "waited_ms", serialize_with = "as_millis")]
    pub waited: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Aggregate view over a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Number of submissions admitted
    pub total: usize,
    /// Submissions that had to wait for a later window
    pub delayed: usize,
    /// Longest admission wait in milliseconds
    pub max_wait_ms: u64,
}

impl DispatchSummary {
    /// Summarize reports; waits under `threshold` count as immediate admissions.
    pub fn from_reports(reports: &[SubmissionReport], threshold: Duration) -> Self {
        Self {
            total: reports.len(),
            delayed: reports.iter().filter(|r| r.waited >= threshold).count(),
            max_wait_ms: reports
                .iter()
                .map(|r| r.waited.as_millis() as u64)
                .max()
                .unwrap_or(0),
        }
    }
}

/// Fans submissions out over a pool of workers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher, rejecting a pool with no workers.
    pub fn new(config: DispatchConfig) -> Result<Self> {
        if config.workers == 0 {
            return Err(ThrottleError::InvalidConfiguration(
                "dispatcher needs at least one worker".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Run every submission on OS threads gated by a blocking throttler.
    pub fn run_threads(&self, throttler: &Throttler) -> Result<Vec<SubmissionReport>> {
        let next = AtomicUsize::new(0);
        info!(
            workers = self.config.workers,
            submissions = self.config.submissions,
            "Dispatching on threads"
        );

        let per_worker = std::thread::scope(|s| {
            let handles: Vec<_> = (0..self.config.workers)
                .map(|worker| {
                    let next = &next;
                    s.spawn(move || {
                        let mut reports = Vec::new();
                        while next.fetch_add(1, Ordering::SeqCst) < self.config.submissions {
                            let queued = Instant::now();
                            throttler.acquire();
                            let report = self.record(worker, queued.elapsed());
                            std::thread::sleep(self.simulated_latency());
                            reports.push(report);
                        }
                        reports
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .map_err(|_| ThrottleError::Worker("worker thread panicked".to_string()))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(per_worker.into_iter().flatten().collect())
    }

    /// Run every submission on tokio tasks gated by an async throttler.
    pub async fn run_tasks(&self, throttler: &AsyncThrottler) -> Result<Vec<SubmissionReport>> {
        let next = std::sync::Arc::new(AtomicUsize::new(0));
        info!(
            workers = self.config.workers,
            submissions = self.config.submissions,
            "Dispatching on tasks"
        );

        let handles: Vec<_> = (0..self.config.workers)
            .map(|worker| {
                let next = next.clone();
                let throttler = throttler.clone();
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    let mut reports = Vec::new();
                    while next.fetch_add(1, Ordering::SeqCst) < dispatcher.config.submissions {
                        let queued = tokio::time::Instant::now();
                        throttler.acquire().await;
                        let report = dispatcher.record(worker, queued.elapsed());
                        tokio::time::sleep(dispatcher.simulated_latency()).await;
                        reports.push(report);
                    }
                    reports
                })
            })
            .collect();

        let mut all = Vec::with_capacity(self.config.submissions);
        for result in futures::future::join_all(handles).await {
            let reports = result.map_err(|e| ThrottleError::Worker(e.to_string()))?;
            all.extend(reports);
        }
        Ok(all)
    }

    fn record(&self, worker: usize, waited: Duration) -> SubmissionReport {
        let report = SubmissionReport {
            id: Uuid::new_v4(),
            worker,
            waited,
        };
        debug!(
            id = %report.id,
            worker = worker,
            waited_ms = waited.as_millis() as u64,
            "Submission admitted"
        );
        report
    }

    fn simulated_latency(&self) -> Duration {
        if self.config.max_latency_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.config.max_latency_ms))
    }
}
