use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::modules::recording::model::{JobOutcome, RecordingStatus};

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub current_job: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_job_started_at: Option<OffsetDateTime>,
    pub jobs_finalized: u64,
    pub last_status: Option<RecordingStatus>,
}

/// In-process view of what the worker is doing, read by the health endpoint.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<WorkerSnapshot>>,
}

impl StatusBoard {
    pub fn new(worker_id: &str) -> Self {
        Self {
            inner: Arc::new(RwLock::new(WorkerSnapshot {
                worker_id: worker_id.to_string(),
                current_job: None,
                current_job_started_at: None,
                jobs_finalized: 0,
                last_status: None,
            })),
        }
    }

    pub async fn begin(&self, job_id: Uuid) {
        let mut snapshot = self.inner.write().await;
        snapshot.current_job = Some(job_id);
        snapshot.current_job_started_at = Some(OffsetDateTime::now_utc());
    }

    pub async fn finish(&self, outcome: &JobOutcome) {
        let mut snapshot = self.inner.write().await;
        snapshot.current_job = None;
        snapshot.current_job_started_at = None;
        snapshot.jobs_finalized += 1;
        snapshot.last_status = Some(outcome.status());
    }

    pub async fn snapshot(&self) -> WorkerSnapshot {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn board_tracks_current_job_and_counts_finalized() {
        let board = StatusBoard::new("wrk-0000beef");
        let job = Uuid::new_v4();

        board.begin(job).await;
        let during = board.snapshot().await;
        assert_eq!(during.current_job, Some(job));
        assert!(during.current_job_started_at.is_some());

        board
            .finish(&JobOutcome::Cancelled {
                detail: "Cancelled: no data written".to_string(),
            })
            .await;
        let after = board.snapshot().await;
        assert_eq!(after.current_job, None);
        assert_eq!(after.jobs_finalized, 1);
        assert_eq!(after.last_status, Some(RecordingStatus::Cancelled));

        let json = serde_json::to_value(&after).unwrap();
        assert_eq!(json["last_status"], "cancelled");
        assert_eq!(json["worker_id"], "wrk-0000beef");
    }
}
