use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::RecorderWorker;
use super::watcher::{self, StopWatch};
use crate::common::error::Result;
use crate::modules::recording::model::RecordingJob;

const ARTIFACT_EXT: &str = "mp4";

/// What the capture engine is asked to record.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub source_uri: String,
    pub output_path: PathBuf,
    pub max_seconds: u32,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stderr: String,
}

impl CaptureExit {
    /// Short human-readable reason for a failed capture, if there is one.
    pub fn diagnostics(&self) -> Option<String> {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return Some(stderr.to_string());
        }
        match self.code {
            Some(0) => None,
            Some(code) => Some(format!("exit code {}", code)),
            None => Some("terminated by signal".to_string()),
        }
    }
}

/// Starts capture subprocesses. Implemented by ffmpeg in production.
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    async fn spawn(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureProcess>>;
}

#[async_trait]
pub trait CaptureProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Resolves once the process has exited. Safe to call again after exit.
    async fn wait(&mut self) -> Result<CaptureExit>;

    /// Forceful termination. Only used once a graceful stop has timed out.
    async fn kill(&mut self) -> Result<()>;
}

/// Delivers the graceful interrupt to a process by id. Separate from
/// `CaptureProcess` because the pid may come from the job row rather than a
/// handle this process owns.
pub trait ProcessSignaller: Send + Sync {
    fn interrupt(&self, pid: u32) -> Result<()>;
}

/// Local scratch file and remote artifact key for one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePlan {
    pub local_path: PathBuf,
    pub remote_path: String,
}

impl CapturePlan {
    pub fn new(job: &RecordingJob, scratch_dir: &Path, started_at: OffsetDateTime) -> Self {
        let stamp = capture_stamp(started_at);
        Self {
            local_path: scratch_dir.join(format!("{}-{}.{}", job.id, stamp, ARTIFACT_EXT)),
            remote_path: format!("{}/{}/{}.{}", job.owner_id, job.id, stamp, ARTIFACT_EXT),
        }
    }
}

fn capture_stamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
        .replace([':', '.'], "-")
}

/// Strips credentials, query and fragment so signed playlist URLs can be logged.
pub fn redact_uri(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(None);
            let _ = parsed.set_username("");
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => "<unparseable uri>".to_string(),
    }
}

/// Set once when a stop is requested for the running capture.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Returns true for the call that actually flipped the flag.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn requested(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug)]
pub struct CaptureReport {
    pub exit: Result<CaptureExit>,
    pub stop_requested: bool,
}

impl RecorderWorker {
    /// Runs the capture subprocess for a claimed job until it exits, with the
    /// cancellation watcher polling alongside it.
    pub(crate) async fn supervise(
        &self,
        job: &RecordingJob,
        plan: &CapturePlan,
        shutdown: &CancellationToken,
    ) -> CaptureReport {
        let worker_id = self.settings.worker_id.as_str();
        let request = CaptureRequest {
            source_uri: job.source_uri.clone(),
            output_path: plan.local_path.clone(),
            max_seconds: self.settings.effective_max_seconds(job.max_duration_seconds),
            read_timeout: self.settings.read_timeout,
        };

        let mut process = match self.engine.spawn(&request).await {
            Ok(process) => process,
            Err(e) => {
                return CaptureReport {
                    exit: Err(e),
                    stop_requested: false,
                };
            }
        };

        let pid = process.pid();
        info!(job_id = %job.id, worker_id, pid, max_seconds = request.max_seconds, "capture started");

        if let Some(pid) = pid {
            if let Err(e) = self
                .store
                .set_subprocess_handle(job.id, worker_id, Some(pid as i32))
                .await
            {
                warn!(job_id = %job.id, worker_id, "failed to record subprocess handle: {}", e);
            }
        }

        let stop = Arc::new(StopSignal::default());
        let watcher_token = CancellationToken::new();
        let watcher = tokio::spawn(watcher::watch_for_stop(
            StopWatch {
                store: self.store.clone(),
                signaller: self.signaller.clone(),
                job_id: job.id,
                worker_id: self.settings.worker_id.clone(),
                interval: self.settings.poll_interval,
            },
            stop.clone(),
            watcher_token.clone(),
        ));

        let exit = tokio::select! {
            res = process.wait() => res,
            _ = stop.requested() => {
                self.wait_after_stop(job, &mut process).await
            }
            _ = shutdown.cancelled() => {
                warn!(job_id = %job.id, worker_id, "shutdown requested, interrupting capture");
                if stop.request() {
                    match pid {
                        Some(pid) => {
                            if let Err(e) = self.signaller.interrupt(pid) {
                                warn!(job_id = %job.id, worker_id, "{}", e);
                            }
                        }
                        None => warn!(job_id = %job.id, worker_id, "capture has no pid to interrupt"),
                    }
                }
                self.wait_after_stop(job, &mut process).await
            }
        };

        watcher_token.cancel();
        match watcher.await {
            Ok(interrupts) => debug!(job_id = %job.id, worker_id, interrupts, "cancellation watcher stopped"),
            Err(e) => warn!(job_id = %job.id, worker_id, "cancellation watcher ended abnormally: {}", e),
        }

        CaptureReport {
            exit,
            stop_requested: stop.is_requested(),
        }
    }

    async fn wait_after_stop(
        &self,
        job: &RecordingJob,
        process: &mut Box<dyn CaptureProcess>,
    ) -> Result<CaptureExit> {
        match tokio::time::timeout(self.settings.graceful_stop, process.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                warn!(
                    job_id = %job.id,
                    worker_id = %self.settings.worker_id,
                    grace_ms = self.settings.graceful_stop.as_millis() as u64,
                    "capture ignored interrupt, killing"
                );
                process.kill().await?;
                process.wait().await
            }
        }
    }
}
