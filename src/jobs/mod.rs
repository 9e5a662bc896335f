//! Fixed-interval scheduler jobs
//!
//! Each job runs as its own tokio task on a fixed interval and owns a
//! non-overlap guard: if a tick is still running when the timer fires
//! again, the new tick is skipped instead of double-transitioning streams.
//! A failed tick is logged and retried on the next interval; every
//! transition it performs is derived from durable, status-guarded state, so
//! retries are naturally idempotent.

pub mod finalize;
pub mod pre_live;
pub mod viewer_count;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::metrics;

pub use finalize::FinalizeJob;
pub use pre_live::PreLiveJob;
pub use viewer_count::ViewerCountJob;

#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// One pass over the streams this job is responsible for. A failure on
    /// one stream must not block the others; implementations isolate
    /// per-stream errors and only fail the tick on whole-tick problems.
    async fn tick(&self) -> anyhow::Result<()>;
}

/// Drive a job on its interval until the shutdown channel fires.
///
/// Ticks run detached from the timer loop; the owned try-lock is the
/// non-overlap guard between consecutive timer fires.
pub fn spawn_job(
    job: Arc<dyn ScheduledJob>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let guard = Arc::new(Mutex::new(()));
        let mut timer = interval(job.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            job = job.name(),
            interval_secs = job.interval().as_secs_f64(),
            "starting job loop"
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let Ok(lock) = guard.clone().try_lock_owned() else {
                        warn!(job = job.name(), "previous tick still running, skipping");
                        metrics::job_tick(job.name(), "skipped");
                        continue;
                    };

                    let job = job.clone();
                    tokio::spawn(async move {
                        let _lock = lock;
                        match job.tick().await {
                            Ok(()) => metrics::job_tick(job.name(), "ok"),
                            Err(e) => {
                                error!(
                                    job = job.name(),
                                    error = %e,
                                    "tick failed, retrying on next interval"
                                );
                                metrics::job_tick(job.name(), "error");
                            }
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!(job = job.name(), "job loop shutting down");
                    break;
                }
            }
        }
    })
}
