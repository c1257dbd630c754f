//! In-memory stand-ins for the queue store, blob store and capture engine.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::capture::{CaptureEngine, CaptureExit, CaptureProcess, CaptureRequest, ProcessSignaller};
use crate::common::error::{RecorderError, Result};
use crate::infrastructure::storage::BlobStore;
use crate::modules::recording::model::{JobOutcome, RecordingJob, RecordingStatus};
use crate::modules::recording::repository::JobStore;

#[derive(Default)]
struct StoreState {
    jobs: HashMap<Uuid, RecordingJob>,
    heartbeats: HashMap<Uuid, OffsetDateTime>,
    history: HashMap<Uuid, Vec<RecordingStatus>>,
}

impl StoreState {
    fn set_status(&mut self, id: Uuid, status: RecordingStatus) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.status = status.as_str().to_string();
            self.history.entry(id).or_default().push(status);
        }
    }
}

/// Queue store with the same conditional-update semantics as the SQL one.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
    failures: Mutex<HashMap<&'static str, u32>>,
}

impl InMemoryJobStore {
    /// Makes the next `times` calls to `op` fail as if the database dropped.
    pub fn fail_next(&self, op: &'static str, times: u32) {
        self.failures.lock().unwrap().insert(op, times);
    }

    pub fn pending_failures(&self, op: &'static str) -> u32 {
        self.failures.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn check(&self, op: &'static str) -> Result<()> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(RecorderError::Database(sqlx::Error::PoolTimedOut))
            }
            _ => Ok(()),
        }
    }

    pub fn insert_queued(&self, owner_id: &str, source_uri: &str, max_seconds: Option<i32>) -> Uuid {
        let id = Uuid::new_v4();
        let mut state = self.state.lock().unwrap();
        // strictly increasing so oldest-first ordering is deterministic
        let created_at = OffsetDateTime::now_utc() + Duration::from_micros(state.jobs.len() as u64);
        state.jobs.insert(
            id,
            RecordingJob {
                id,
                owner_id: owner_id.to_string(),
                source_uri: source_uri.to_string(),
                max_duration_seconds: max_seconds,
                status: RecordingStatus::Queued.as_str().to_string(),
                claimed_by: None,
                claimed_at: None,
                subprocess_handle: None,
                started_at: None,
                ended_at: None,
                result_path: None,
                result_bytes: None,
                error_detail: None,
                created_at,
            },
        );
        state.history.insert(id, vec![RecordingStatus::Queued]);
        id
    }

    /// What a producer does when a user presses stop.
    pub fn request_stop(&self, id: Uuid) {
        self.state.lock().unwrap().set_status(id, RecordingStatus::Stopping);
    }

    pub fn age_heartbeat(&self, id: Uuid, by: Duration) {
        let mut state = self.state.lock().unwrap();
        if let Some(hb) = state.heartbeats.get_mut(&id) {
            *hb -= by;
        }
        if let Some(job) = state.jobs.get_mut(&id) {
            job.claimed_at = job.claimed_at.map(|at| at - by);
        }
    }

    pub fn get(&self, id: Uuid) -> RecordingJob {
        self.state.lock().unwrap().jobs[&id].clone()
    }

    pub fn status_of(&self, id: Uuid) -> RecordingStatus {
        self.get(id).status().unwrap()
    }

    pub fn history(&self, id: Uuid) -> Vec<RecordingStatus> {
        self.state.lock().unwrap().history[&id].clone()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn find_next_queued(&self) -> Result<Option<RecordingJob>> {
        self.check("find_next_queued")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .values()
            .filter(|job| job.status == "queued" && job.claimed_at.is_none())
            .min_by_key(|job| job.created_at)
            .cloned())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<RecordingJob>> {
        self.check("fetch")?;
        Ok(self.state.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn try_claim(&self, id: Uuid, worker_id: &str) -> Result<Option<RecordingJob>> {
        // let racing callers interleave between the scan and the claim
        tokio::task::yield_now().await;
        self.check("try_claim")?;

        let mut state = self.state.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        let eligible = matches!(
            state.jobs.get(&id),
            Some(job) if job.claimed_at.is_none() && job.status == "queued"
        );
        if !eligible {
            return Ok(None);
        }

        state.set_status(id, RecordingStatus::Recording);
        state.heartbeats.insert(id, now);
        let job = state.jobs.get_mut(&id).expect("checked above");
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(now);
        job.started_at = Some(now);
        job.error_detail = None;
        Ok(Some(job.clone()))
    }

    async fn set_subprocess_handle(
        &self,
        id: Uuid,
        worker_id: &str,
        handle: Option<i32>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&id) {
            if job.claimed_by.as_deref() == Some(worker_id) {
                job.subprocess_handle = handle;
            }
        }
        Ok(())
    }

    async fn fetch_subprocess_handle(&self, id: Uuid) -> Result<Option<i32>> {
        self.check("fetch_subprocess_handle")?;
        let state = self.state.lock().unwrap();
        Ok(state.jobs.get(&id).and_then(|job| job.subprocess_handle))
    }

    async fn poll_status(&self, id: Uuid, worker_id: &str) -> Result<Option<RecordingStatus>> {
        self.check("poll_status")?;
        let mut state = self.state.lock().unwrap();
        let status = match state.jobs.get(&id) {
            Some(job) if job.claimed_by.as_deref() == Some(worker_id) => job.status.clone(),
            _ => return Ok(None),
        };
        state.heartbeats.insert(id, OffsetDateTime::now_utc());
        status.parse::<RecordingStatus>().map(Some)
    }

    async fn finalize(&self, id: Uuid, worker_id: &str, outcome: &JobOutcome) -> Result<bool> {
        self.check("finalize")?;
        let mut state = self.state.lock().unwrap();
        let active = matches!(
            state.jobs.get(&id),
            Some(job) if job.claimed_by.as_deref() == Some(worker_id)
                && matches!(job.status.as_str(), "recording" | "stopping")
        );
        if !active {
            return Ok(false);
        }

        state.set_status(id, outcome.status());
        let job = state.jobs.get_mut(&id).expect("checked above");
        job.ended_at = Some(OffsetDateTime::now_utc());
        job.error_detail = outcome.detail().map(str::to_string);
        if let JobOutcome::Completed {
            result_path,
            result_bytes,
        } = outcome
        {
            job.result_path = Some(result_path.clone());
            job.result_bytes = Some(*result_bytes);
        }
        Ok(true)
    }

    async fn reap_stale_claims(&self, stale_after: Duration) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock().unwrap();
        let cutoff = OffsetDateTime::now_utc() - stale_after;
        let stale: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|job| matches!(job.status.as_str(), "recording" | "stopping"))
            .filter(|job| {
                let last_seen = state.heartbeats.get(&job.id).copied().or(job.claimed_at);
                last_seen.is_some_and(|at| at < cutoff)
            })
            .map(|job| job.id)
            .collect();

        for id in &stale {
            state.set_status(*id, RecordingStatus::Error);
            let job = state.jobs.get_mut(id).expect("collected above");
            job.error_detail = Some("Worker lost: claim went stale".to_string());
            job.subprocess_handle = None;
            job.ended_at = Some(OffsetDateTime::now_utc());
        }
        Ok(stale)
    }

    async fn cancel_unclaimed_stops(&self) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|job| job.status == "stopping" && job.claimed_at.is_none())
            .map(|job| job.id)
            .collect();

        for id in &ids {
            state.set_status(*id, RecordingStatus::Cancelled);
            let job = state.jobs.get_mut(id).expect("collected above");
            job.error_detail = Some("Cancelled before recording started".to_string());
            job.ended_at = Some(OffsetDateTime::now_utc());
        }
        Ok(ids)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: String,
    pub bytes: u64,
    pub content_type: String,
}

#[derive(Default)]
pub struct FakeBlobStore {
    pub fail_with: Option<String>,
    /// How long each put takes.
    pub put_delay: Duration,
    puts: Mutex<Vec<StoredBlob>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeBlobStore {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn slow(put_delay: Duration) -> Self {
        Self {
            put_delay,
            ..Self::default()
        }
    }

    pub fn puts(&self) -> Vec<StoredBlob> {
        self.puts.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<u64> {
        tokio::time::sleep(self.put_delay).await;
        if let Some(message) = &self.fail_with {
            return Err(RecorderError::Upload(message.clone()));
        }
        let bytes = tokio::fs::metadata(path).await?.len();
        self.puts.lock().unwrap().push(StoredBlob {
            key: key.to_string(),
            bytes,
            content_type: content_type.to_string(),
        });
        Ok(bytes)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Fake process table shared by the fake engine and the fake signaller, so an
/// interrupt sent by pid reaches the right fake process.
#[derive(Default)]
pub struct FakeOs {
    next_pid: AtomicU32,
    interrupts: Mutex<HashMap<u32, Arc<Interrupt>>>,
    delivered: Mutex<Vec<u32>>,
    killed: Mutex<Vec<u32>>,
}

/// Pending SIGINT for one fake process. The flag survives a dropped `wait`
/// future, the same way a real signal does.
#[derive(Default)]
struct Interrupt {
    raised: AtomicBool,
    notify: Notify,
}

impl FakeOs {
    pub fn interrupts_sent(&self) -> Vec<u32> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }
}

pub struct FakeSignaller(pub Arc<FakeOs>);

impl ProcessSignaller for FakeSignaller {
    fn interrupt(&self, pid: u32) -> Result<()> {
        let os = &self.0;
        os.delivered.lock().unwrap().push(pid);
        match os.interrupts.lock().unwrap().get(&pid) {
            Some(interrupt) => {
                interrupt.raised.store(true, Ordering::SeqCst);
                interrupt.notify.notify_waiters();
                Ok(())
            }
            None => Err(RecorderError::Signal {
                pid,
                reason: "no such process".to_string(),
            }),
        }
    }
}

/// How a fake capture behaves once spawned.
#[derive(Debug, Clone)]
pub struct Script {
    pub fail_spawn: bool,
    /// Bytes in the output file when the process exits on its own or on interrupt.
    pub bytes: usize,
    /// Natural run time before the process exits by itself.
    pub runs_for: Duration,
    /// Time between receiving an interrupt and exiting.
    pub flush_delay: Duration,
    pub ignores_interrupt: bool,
    pub exit_code: i32,
    pub stderr: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_spawn: false,
            bytes: 4096,
            runs_for: Duration::from_millis(50),
            flush_delay: Duration::ZERO,
            ignores_interrupt: false,
            exit_code: 0,
            stderr: String::new(),
        }
    }
}

pub struct FakeEngine {
    pub os: Arc<FakeOs>,
    pub script: Script,
    seen: Mutex<Vec<CaptureRequest>>,
}

impl FakeEngine {
    pub fn new(os: Arc<FakeOs>, script: Script) -> Self {
        Self {
            os,
            script,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureEngine for FakeEngine {
    async fn spawn(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureProcess>> {
        self.seen.lock().unwrap().push(request.clone());
        if self.script.fail_spawn {
            return Err(RecorderError::Spawn("ffmpeg: No such file or directory".to_string()));
        }

        let pid = 1000 + self.os.next_pid.fetch_add(1, Ordering::SeqCst);
        let interrupt = Arc::new(Interrupt::default());
        self.os
            .interrupts
            .lock()
            .unwrap()
            .insert(pid, interrupt.clone());

        Ok(Box::new(FakeProcess {
            pid,
            os: self.os.clone(),
            script: self.script.clone(),
            output: request.output_path.clone(),
            deadline: Instant::now() + self.script.runs_for,
            interrupt,
            exit: None,
        }))
    }
}

struct FakeProcess {
    pid: u32,
    os: Arc<FakeOs>,
    script: Script,
    output: std::path::PathBuf,
    deadline: Instant,
    interrupt: Arc<Interrupt>,
    exit: Option<CaptureExit>,
}

impl FakeProcess {
    async fn write_output(&self, bytes: usize) {
        if bytes > 0 {
            tokio::fs::write(&self.output, vec![0u8; bytes]).await.unwrap();
        }
    }
}

#[async_trait]
impl CaptureProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> Result<CaptureExit> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }

        let interrupted = loop {
            let notified = self.interrupt.notify.notified();
            if !self.script.ignores_interrupt && self.interrupt.raised.load(Ordering::SeqCst) {
                break true;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(self.deadline) => break false,
                _ = notified => {}
            }
        };

        if interrupted {
            tokio::time::sleep(self.script.flush_delay).await;
        }
        self.write_output(self.script.bytes).await;

        let exit = CaptureExit {
            code: Some(if interrupted { 255 } else { self.script.exit_code }),
            stderr: self.script.stderr.clone(),
        };
        self.exit = Some(exit.clone());
        Ok(exit)
    }

    async fn kill(&mut self) -> Result<()> {
        self.os.killed.lock().unwrap().push(self.pid);
        self.exit = Some(CaptureExit {
            code: None,
            stderr: String::new(),
        });
        Ok(())
    }
}
