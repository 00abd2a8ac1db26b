//! Fake Progress
//!
//! Model calls report nothing until they finish. While one is in flight an
//! estimator task nudges the job's progress along a fixed time schedule so
//! clients see motion. The estimator only ever raises progress, and only
//! while the job stays in the status it was started for.

use std::sync::Arc;
use std::time::Duration;

use clipcheck_core::domain::job::JobStatus;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::JobStore;

/// Piecewise-linear progress curve of one long-running stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSchedule {
    /// 30 to 90 over 5 minutes, to 95 over the next 5, to 99 over the next 10
    FactCheck,
    /// 0 to 95 over 90 seconds
    Translation,
}

impl ProgressSchedule {
    /// Status the job must be in for the estimator to keep running
    pub fn status(self) -> JobStatus {
        match self {
            ProgressSchedule::FactCheck => JobStatus::FactChecking,
            ProgressSchedule::Translation => JobStatus::Translating,
        }
    }

    /// Target progress after `elapsed` time in the stage
    pub fn target(self, elapsed: Duration) -> u8 {
        let secs = elapsed.as_secs_f64();
        let value = match self {
            ProgressSchedule::FactCheck => {
                if secs <= 300.0 {
                    30.0 + 60.0 * secs / 300.0
                } else if secs <= 600.0 {
                    90.0 + 5.0 * (secs - 300.0) / 300.0
                } else if secs <= 1200.0 {
                    95.0 + 4.0 * (secs - 600.0) / 600.0
                } else {
                    99.0
                }
            }
            ProgressSchedule::Translation => (95.0 * secs / 90.0).min(95.0),
        };
        value.floor() as u8
    }
}

/// Handle to a running estimator
///
/// Dropping the handle aborts the estimator, so a pipeline that is itself
/// aborted never leaves one behind.
#[derive(Debug)]
pub struct ProgressTask {
    handle: Option<JoinHandle<()>>,
}

impl ProgressTask {
    pub fn spawn(store: Arc<JobStore>, job_id: String, schedule: ProgressSchedule) -> Self {
        let handle = tokio::spawn(run_estimator(store, job_id, schedule));
        Self {
            handle: Some(handle),
        }
    }

    /// Aborts the estimator and waits for it to finish
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_estimator(store: Arc<JobStore>, job_id: String, schedule: ProgressSchedule) {
    let started = Instant::now();
    let expected = schedule.status();
    let tick = store.settings.progress_tick;

    loop {
        tokio::time::sleep(tick).await;

        let Some(job) = store.get(&job_id).await else {
            return;
        };
        if job.status != expected {
            return;
        }

        let target = schedule.target(started.elapsed());
        if target <= job.progress {
            continue;
        }

        let result = store
            .update(&job_id, true, |job| {
                if job.status == expected && target > job.progress {
                    job.progress = target;
                }
            })
            .await;
        if let Err(e) = result {
            debug!("Progress estimator for job {} stopped: {}", job_id, e);
            return;
        }
    }
}
