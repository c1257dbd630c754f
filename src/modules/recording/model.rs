use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::common::error::RecorderError;

/// Lifecycle of a recording job. `Stopping` is only ever written by producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Queued,
    Recording,
    Stopping,
    Completed,
    Error,
    Cancelled,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Queued => "queued",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Stopping => "stopping",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Error => "error",
            RecordingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordingStatus::Completed | RecordingStatus::Error | RecordingStatus::Cancelled
        )
    }

    /// Position in the forward-only order. `Stopping` shares the rank of
    /// `Recording` since it is an overlay on an active capture.
    #[cfg(test)]
    pub fn rank(&self) -> u8 {
        match self {
            RecordingStatus::Queued => 0,
            RecordingStatus::Recording | RecordingStatus::Stopping => 1,
            RecordingStatus::Completed | RecordingStatus::Error | RecordingStatus::Cancelled => 2,
        }
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingStatus {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RecordingStatus::Queued),
            "recording" => Ok(RecordingStatus::Recording),
            "stopping" => Ok(RecordingStatus::Stopping),
            "completed" => Ok(RecordingStatus::Completed),
            "error" => Ok(RecordingStatus::Error),
            "cancelled" => Ok(RecordingStatus::Cancelled),
            other => Err(RecorderError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RecordingJob {
    pub id: Uuid,
    pub owner_id: String,
    pub source_uri: String,
    pub max_duration_seconds: Option<i32>,
    pub status: String, // stored as text, see `status()`
    pub claimed_by: Option<String>,
    pub claimed_at: Option<OffsetDateTime>,
    pub subprocess_handle: Option<i32>,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    pub result_path: Option<String>,
    pub result_bytes: Option<i64>,
    pub error_detail: Option<String>,
    pub created_at: OffsetDateTime,
}

impl RecordingJob {
    pub fn status(&self) -> Result<RecordingStatus, RecorderError> {
        self.status.parse()
    }
}

/// Terminal write applied once by the finalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { result_path: String, result_bytes: i64 },
    Error { detail: String },
    Cancelled { detail: String },
}

impl JobOutcome {
    pub fn status(&self) -> RecordingStatus {
        match self {
            JobOutcome::Completed { .. } => RecordingStatus::Completed,
            JobOutcome::Error { .. } => RecordingStatus::Error,
            JobOutcome::Cancelled { .. } => RecordingStatus::Cancelled,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed { .. } => None,
            JobOutcome::Error { detail } | JobOutcome::Cancelled { detail } => Some(detail),
        }
    }

    /// The terminal state a row already carries, `None` while it is still active.
    pub fn committed(job: &RecordingJob) -> Option<Self> {
        let status = job.status().ok()?;
        if !status.is_terminal() {
            return None;
        }

        let detail = job.error_detail.clone().unwrap_or_default();
        Some(match status {
            RecordingStatus::Completed => JobOutcome::Completed {
                result_path: job.result_path.clone().unwrap_or_default(),
                result_bytes: job.result_bytes.unwrap_or_default(),
            },
            RecordingStatus::Cancelled => JobOutcome::Cancelled { detail },
            _ => JobOutcome::Error { detail },
        })
    }
}
