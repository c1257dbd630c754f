//! The recording worker.
//!
//! One job at a time: lease the oldest queued row, run ffmpeg against its
//! source while a watcher polls the row for a stop request, then upload the
//! file and write the terminal status. Exactly-once processing across worker
//! instances rests on the conditional claim in [`lease`].

pub mod capture;
pub mod ffmpeg;
pub mod finalizer;
pub mod lease;
pub mod reaper;
pub mod status;
pub mod watcher;

#[cfg(test)]
mod fakes;

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::settings::RecorderSettings;
use crate::infrastructure::storage::BlobStore;
use crate::modules::recording::model::{JobOutcome, RecordingJob};
use crate::modules::recording::repository::JobStore;
use capture::{CaptureEngine, CapturePlan, ProcessSignaller, redact_uri};
use lease::Lease;
use status::StatusBoard;

pub struct RecorderWorker {
    settings: RecorderSettings,
    store: Arc<dyn JobStore>,
    blob: Arc<dyn BlobStore>,
    engine: Arc<dyn CaptureEngine>,
    signaller: Arc<dyn ProcessSignaller>,
    status: StatusBoard,
}

impl RecorderWorker {
    pub fn new(
        settings: RecorderSettings,
        store: Arc<dyn JobStore>,
        blob: Arc<dyn BlobStore>,
        engine: Arc<dyn CaptureEngine>,
        signaller: Arc<dyn ProcessSignaller>,
        status: StatusBoard,
    ) -> Self {
        let settings = {
            let floored = settings.clone().with_floors();
            if floored != settings {
                warn!(
                    worker_id = %settings.worker_id,
                    "raised recorder timings to their minimums: {:?}",
                    floored
                );
            }
            floored
        };

        Self {
            settings,
            store,
            blob,
            engine,
            signaller,
            status,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    /// Lease loop. Returns once `shutdown` is cancelled and the job in hand,
    /// if any, has been finalized.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.settings.worker_id, "🎥 Recorder worker started");

        let mut next_reap = Instant::now();

        while !shutdown.is_cancelled() {
            if Instant::now() >= next_reap {
                self.reap_orphans().await;
                next_reap = Instant::now() + self.settings.reap_interval();
            }

            let delay = match self.try_lease_next().await {
                Ok(Lease::Claimed(job)) => {
                    self.process_job(job, &shutdown).await;
                    continue;
                }
                Ok(Lease::RaceLost) => continue,
                Ok(Lease::Idle) => self.settings.idle_interval,
                Err(e) => {
                    warn!(worker_id = %self.settings.worker_id, "lease attempt failed: {}", e);
                    self.settings.poll_interval
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(worker_id = %self.settings.worker_id, "Recorder worker stopped");
    }

    /// Capture, upload and finalize one claimed job. Never fails: every error
    /// ends up in the job's terminal status.
    pub async fn process_job(&self, job: RecordingJob, shutdown: &CancellationToken) -> JobOutcome {
        if shutdown.is_cancelled() {
            return self.abandon(job).await;
        }

        let plan = CapturePlan::new(&job, &self.settings.scratch_dir, OffsetDateTime::now_utc());
        info!(
            job_id = %job.id,
            worker_id = %self.settings.worker_id,
            source = %redact_uri(&job.source_uri),
            remote = %plan.remote_path,
            "start recording"
        );

        self.status.begin(job.id).await;
        let report = self.supervise(&job, &plan, shutdown).await;
        let outcome = self.finalize(&job, &plan, report).await;
        self.status.finish(&outcome).await;

        outcome
    }

    /// Settles a job claimed while shutdown was already under way, without
    /// starting a capture for it.
    async fn abandon(&self, job: RecordingJob) -> JobOutcome {
        let worker_id = self.settings.worker_id.as_str();
        warn!(job_id = %job.id, worker_id, "shutdown began during lease, not starting capture");

        let outcome = JobOutcome::Error {
            detail: "Worker shut down before recording started".to_string(),
        };
        match self.store.finalize(job.id, worker_id, &outcome).await {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %job.id, worker_id, "job is no longer active for this worker"),
            Err(e) => error!(job_id = %job.id, worker_id, "failed to write terminal status: {}", e),
        }
        self.status.finish(&outcome).await;
        outcome
    }
}
