use std::io::ErrorKind;

use tracing::{error, info, warn};

use super::RecorderWorker;
use super::capture::{CapturePlan, CaptureReport};
use super::watcher;
use crate::common::error::RecorderError;
use crate::modules::recording::model::{JobOutcome, RecordingJob};

impl RecorderWorker {
    /// Decides the terminal outcome, writes it once, then removes the scratch
    /// file and clears the subprocess handle whatever happened before.
    ///
    /// Returns what the row ended up with: when another actor finalized the
    /// job first (the reaper), that state wins and a fresh upload is removed.
    pub(crate) async fn finalize(
        &self,
        job: &RecordingJob,
        plan: &CapturePlan,
        report: CaptureReport,
    ) -> JobOutcome {
        let worker_id = self.settings.worker_id.as_str();
        let outcome = watcher::with_heartbeat(
            self.store.as_ref(),
            job.id,
            worker_id,
            self.settings.poll_interval,
            self.resolve_outcome(job, plan, report),
        )
        .await;

        let committed = match self.store.finalize(job.id, worker_id, &outcome).await {
            Ok(true) => {
                match &outcome {
                    JobOutcome::Completed {
                        result_path,
                        result_bytes,
                    } => info!(
                        job_id = %job.id,
                        worker_id,
                        bytes = *result_bytes,
                        "uploaded {} -> {}",
                        job.id,
                        result_path
                    ),
                    other => warn!(
                        job_id = %job.id,
                        worker_id,
                        status = %other.status(),
                        "{}",
                        other.detail().unwrap_or_default()
                    ),
                }
                outcome
            }
            Ok(false) => {
                warn!(
                    job_id = %job.id,
                    worker_id,
                    "job is no longer active for this worker, terminal status not written"
                );
                self.superseded(job, outcome).await
            }
            Err(e) => {
                error!(job_id = %job.id, worker_id, "failed to write terminal status: {}", e);
                outcome
            }
        };

        self.cleanup(job, plan).await;
        committed
    }

    /// Reads back the state someone else committed and drops our artifact if
    /// the row does not point at it.
    async fn superseded(&self, job: &RecordingJob, outcome: JobOutcome) -> JobOutcome {
        let worker_id = self.settings.worker_id.as_str();

        let committed = match self.store.fetch(job.id).await {
            Ok(Some(row)) => JobOutcome::committed(&row),
            Ok(None) => None,
            Err(e) => {
                warn!(job_id = %job.id, worker_id, "could not read back job: {}", e);
                None
            }
        };

        if let JobOutcome::Completed { result_path, .. } = &outcome {
            let kept = matches!(
                &committed,
                Some(JobOutcome::Completed { result_path: row_path, .. }) if row_path == result_path
            );
            if !kept {
                match self.blob.delete(result_path).await {
                    Ok(()) => info!(job_id = %job.id, worker_id, "removed orphaned upload {}", result_path),
                    Err(e) => warn!(job_id = %job.id, worker_id, "failed to remove orphaned upload {}: {}", result_path, e),
                }
            }
        }

        committed.unwrap_or(outcome)
    }

    async fn resolve_outcome(
        &self,
        job: &RecordingJob,
        plan: &CapturePlan,
        report: CaptureReport,
    ) -> JobOutcome {
        let diagnostics = match report.exit {
            Ok(exit) => exit.diagnostics(),
            Err(e @ RecorderError::Spawn(_)) => {
                return JobOutcome::Error {
                    detail: e.to_string(),
                };
            }
            Err(e) => Some(e.to_string()),
        };

        let bytes = match tokio::fs::metadata(&plan.local_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        if bytes == 0 {
            return if report.stop_requested {
                JobOutcome::Cancelled {
                    detail: "Cancelled: no data written".to_string(),
                }
            } else {
                JobOutcome::Error {
                    detail: match diagnostics {
                        Some(reason) => format!("No data written: {}", reason),
                        None => "No data written".to_string(),
                    },
                }
            };
        }

        let content_type = mime_guess::from_path(&plan.local_path).first_or_octet_stream();
        match self
            .blob
            .put_file(&plan.remote_path, &plan.local_path, content_type.essence_str())
            .await
        {
            Ok(_) => JobOutcome::Completed {
                result_path: plan.remote_path.clone(),
                result_bytes: bytes as i64,
            },
            Err(e) => {
                error!(job_id = %job.id, worker_id = %self.settings.worker_id, "upload failed: {}", e);
                JobOutcome::Error {
                    detail: match e {
                        RecorderError::Upload(_) => e.to_string(),
                        other => format!("storage upload failed: {}", other),
                    },
                }
            }
        }
    }

    async fn cleanup(&self, job: &RecordingJob, plan: &CapturePlan) {
        let worker_id = self.settings.worker_id.as_str();

        match tokio::fs::remove_file(&plan.local_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_id = %job.id,
                worker_id,
                "failed to remove {}: {}",
                plan.local_path.display(),
                e
            ),
        }

        if let Err(e) = self.store.set_subprocess_handle(job.id, worker_id, None).await {
            warn!(job_id = %job.id, worker_id, "failed to clear subprocess handle: {}", e);
        }
    }
}
