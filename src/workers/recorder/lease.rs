use tracing::{debug, info};

use super::RecorderWorker;
use crate::common::error::Result;
use crate::modules::recording::model::RecordingJob;

#[derive(Debug)]
pub enum Lease {
    Claimed(RecordingJob),
    /// Nothing eligible in the queue.
    Idle,
    /// A candidate existed but another worker claimed it first.
    RaceLost,
}

impl RecorderWorker {
    /// Takes the oldest eligible job, if this worker wins the conditional claim.
    pub async fn try_lease_next(&self) -> Result<Lease> {
        let worker_id = self.settings.worker_id.as_str();

        let Some(candidate) = self.store.find_next_queued().await? else {
            return Ok(Lease::Idle);
        };

        match self.store.try_claim(candidate.id, worker_id).await? {
            Some(job) => {
                info!(job_id = %job.id, worker_id, "claimed job");
                Ok(Lease::Claimed(job))
            }
            None => {
                debug!(job_id = %candidate.id, worker_id, "lost claim race");
                Ok(Lease::RaceLost)
            }
        }
    }
}
