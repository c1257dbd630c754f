use tracing::{info, warn};

use super::RecorderWorker;

impl RecorderWorker {
    /// Resolves jobs nobody will ever finalize: active claims whose heartbeat
    /// went stale, and stop requests on jobs that were never claimed.
    pub(crate) async fn reap_orphans(&self) {
        let worker_id = self.settings.worker_id.as_str();

        match self.store.reap_stale_claims(self.settings.stale_claim).await {
            Ok(ids) => {
                for id in ids {
                    warn!(job_id = %id, worker_id, "failed stale claim");
                }
            }
            Err(e) => warn!(worker_id, "stale claim sweep failed: {}", e),
        }

        match self.store.cancel_unclaimed_stops().await {
            Ok(ids) => {
                for id in ids {
                    info!(job_id = %id, worker_id, "cancelled job stopped before it was claimed");
                }
            }
            Err(e) => warn!(worker_id, "unclaimed stop sweep failed: {}", e),
        }
    }
}
