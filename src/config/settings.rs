use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;

use crate::config::env::{self, EnvKey};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub run_migrations: bool,
    pub minio_url: String,
    pub minio_region: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub recorder: RecorderSettings,
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: env::get(EnvKey::DatabaseUrl)?,
            run_migrations: env::get_parsed(EnvKey::RunMigrations, false),
            minio_url: env::get(EnvKey::MinioUrl)?,
            minio_region: env::get_or(EnvKey::MinioRegion, "us-east-1"),
            minio_bucket: env::get_or(EnvKey::RecordingBucket, "live-recordings"),
            minio_access_key: env::get(EnvKey::MinioAccessKey)?,
            minio_secret_key: env::get(EnvKey::MinioSecretKey)?,
            recorder: RecorderSettings::from_env(),
        })
    }
}

/// Shortest idle or poll interval the worker accepts.
const MIN_TICK: Duration = Duration::from_millis(10);
/// A claim must miss this many heartbeats before it counts as stale.
const STALE_CLAIM_MIN_POLLS: u32 = 5;

/// Tunables shared by every recorder component.
///
/// Built once at startup and handed out by value; nothing mutates it afterwards,
/// the worker identity included.
#[derive(Clone, Debug, PartialEq)]
pub struct RecorderSettings {
    pub worker_id: String,
    pub scratch_dir: PathBuf,
    pub ffmpeg_path: String,
    pub idle_interval: Duration,
    pub poll_interval: Duration,
    pub graceful_stop: Duration,
    pub read_timeout: Duration,
    pub stale_claim: Duration,
    pub default_max_seconds: u32,
}

impl RecorderSettings {
    pub fn from_env() -> Self {
        Self {
            worker_id: env::get_opt(EnvKey::WorkerId).unwrap_or_else(generate_worker_id),
            scratch_dir: PathBuf::from(env::get_or(EnvKey::ScratchDir, "/tmp")),
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            idle_interval: Duration::from_millis(env::get_parsed(EnvKey::IdleDelayMs, 4000)),
            poll_interval: Duration::from_millis(env::get_parsed(EnvKey::PollIntervalMs, 2000)),
            graceful_stop: Duration::from_millis(env::get_parsed(EnvKey::GracefulStopMs, 8000)),
            read_timeout: Duration::from_secs(env::get_parsed(EnvKey::ReadTimeoutSeconds, 15)),
            stale_claim: Duration::from_secs(env::get_parsed(EnvKey::StaleClaimSeconds, 300)),
            default_max_seconds: env::get_parsed(EnvKey::DefaultMaxSeconds, 3600u32).max(1),
        }
        .with_floors()
    }

    /// Capture ceiling for a job, falling back to the process default when the
    /// row carries nothing usable.
    pub fn effective_max_seconds(&self, requested: Option<i32>) -> u32 {
        match requested {
            Some(secs) if secs > 0 => secs as u32,
            _ => self.default_max_seconds,
        }
    }

    /// Raises timings that would break the worker to usable minimums: a zero
    /// interval cannot tick, and a stale bound shorter than a few heartbeats
    /// would fail every active claim.
    pub fn with_floors(mut self) -> Self {
        self.idle_interval = self.idle_interval.max(MIN_TICK);
        self.poll_interval = self.poll_interval.max(MIN_TICK);
        self.read_timeout = self.read_timeout.max(Duration::from_secs(1));
        self.stale_claim = self
            .stale_claim
            .max(self.poll_interval * STALE_CLAIM_MIN_POLLS);
        self
    }

    pub fn reap_interval(&self) -> Duration {
        self.stale_claim / 2
    }
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            worker_id: generate_worker_id(),
            scratch_dir: std::env::temp_dir(),
            ffmpeg_path: "ffmpeg".to_string(),
            idle_interval: Duration::from_secs(4),
            poll_interval: Duration::from_secs(2),
            graceful_stop: Duration::from_secs(8),
            read_timeout: Duration::from_secs(15),
            stale_claim: Duration::from_secs(300),
            default_max_seconds: 3600,
        }
    }
}

pub fn generate_worker_id() -> String {
    let suffix: u32 = rand::rng().random();
    format!("wrk-{:08x}", suffix)
}
