use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{JobOutcome, RecordingJob, RecordingStatus};
use crate::common::error::Result;

const JOB_COLUMNS: &str = "id, owner_id, source_uri, max_duration_seconds, status, claimed_by, \
     claimed_at, subprocess_handle, started_at, ended_at, result_path, result_bytes, \
     error_detail, created_at";

/// Queue store operations the recorder needs.
///
/// Every write after the claim is scoped to `claimed_by = worker_id`, so a
/// worker can only ever touch rows it leased itself.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Oldest job that is queued and has never been claimed.
    async fn find_next_queued(&self) -> Result<Option<RecordingJob>>;

    async fn fetch(&self, id: Uuid) -> Result<Option<RecordingJob>>;

    /// Conditional claim guarded by `claimed_at IS NULL`. `None` means another
    /// worker got there first.
    async fn try_claim(&self, id: Uuid, worker_id: &str) -> Result<Option<RecordingJob>>;

    async fn set_subprocess_handle(&self, id: Uuid, worker_id: &str, handle: Option<i32>)
    -> Result<()>;

    async fn fetch_subprocess_handle(&self, id: Uuid) -> Result<Option<i32>>;

    /// Reads the current status and stamps the claim heartbeat in one statement.
    async fn poll_status(&self, id: Uuid, worker_id: &str) -> Result<Option<RecordingStatus>>;

    /// Terminal write. Returns false when the row was not in an active state
    /// owned by this worker, in which case nothing changed.
    async fn finalize(&self, id: Uuid, worker_id: &str, outcome: &JobOutcome) -> Result<bool>;

    /// Fails active jobs whose heartbeat is older than `stale_after`.
    async fn reap_stale_claims(&self, stale_after: Duration) -> Result<Vec<Uuid>>;

    /// Cancels jobs a producer asked to stop before any worker claimed them.
    async fn cancel_unclaimed_stops(&self) -> Result<Vec<Uuid>>;
}

pub struct RecordingRepository {
    pool: PgPool,
}

impl RecordingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for RecordingRepository {
    async fn find_next_queued(&self) -> Result<Option<RecordingJob>> {
        let job = sqlx::query_as::<_, RecordingJob>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM live_recordings
            WHERE status = 'queued' AND claimed_at IS NULL
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<RecordingJob>> {
        let job = sqlx::query_as::<_, RecordingJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM live_recordings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn try_claim(&self, id: Uuid, worker_id: &str) -> Result<Option<RecordingJob>> {
        let job = sqlx::query_as::<_, RecordingJob>(&format!(
            r#"
            UPDATE live_recordings
            SET
                claimed_by = $2,
                claimed_at = NOW(),
                heartbeat_at = NOW(),
                status = 'recording',
                started_at = NOW(),
                error_detail = NULL
            WHERE id = $1 AND claimed_at IS NULL AND status = 'queued'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn set_subprocess_handle(
        &self,
        id: Uuid,
        worker_id: &str,
        handle: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE live_recordings SET subprocess_handle = $3 WHERE id = $1 AND claimed_by = $2",
        )
        .bind(id)
        .bind(worker_id)
        .bind(handle)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_subprocess_handle(&self, id: Uuid) -> Result<Option<i32>> {
        let handle = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT subprocess_handle FROM live_recordings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(handle.flatten())
    }

    async fn poll_status(&self, id: Uuid, worker_id: &str) -> Result<Option<RecordingStatus>> {
        let status = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE live_recordings
            SET heartbeat_at = NOW()
            WHERE id = $1 AND claimed_by = $2
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        status.map(|s| s.parse::<RecordingStatus>()).transpose()
    }

    async fn finalize(&self, id: Uuid, worker_id: &str, outcome: &JobOutcome) -> Result<bool> {
        let (result_path, result_bytes) = match outcome {
            JobOutcome::Completed {
                result_path,
                result_bytes,
            } => (Some(result_path.as_str()), Some(*result_bytes)),
            _ => (None, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE live_recordings
            SET
                status = $3,
                result_path = $4,
                result_bytes = $5,
                error_detail = $6,
                ended_at = NOW()
            WHERE id = $1 AND claimed_by = $2 AND status IN ('recording', 'stopping')
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(outcome.status().as_str())
        .bind(result_path)
        .bind(result_bytes)
        .bind(outcome.detail())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reap_stale_claims(&self, stale_after: Duration) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE live_recordings
            SET
                status = 'error',
                error_detail = 'Worker lost: claim went stale',
                subprocess_handle = NULL,
                ended_at = NOW()
            WHERE status IN ('recording', 'stopping')
              AND claimed_at IS NOT NULL
              AND COALESCE(heartbeat_at, claimed_at) < NOW() - make_interval(secs => $1)
            RETURNING id
            "#,
        )
        .bind(stale_after.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn cancel_unclaimed_stops(&self) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE live_recordings
            SET
                status = 'cancelled',
                error_detail = 'Cancelled before recording started',
                ended_at = NOW()
            WHERE status = 'stopping' AND claimed_at IS NULL
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
