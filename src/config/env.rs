use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    RunMigrations,
    MinioUrl,
    MinioRegion,
    RecordingBucket,
    MinioAccessKey,
    MinioSecretKey,
    ScratchDir,
    WorkerId,
    IdleDelayMs,
    PollIntervalMs,
    GracefulStopMs,
    DefaultMaxSeconds,
    FfmpegPath,
    ReadTimeoutSeconds,
    StaleClaimSeconds,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RunMigrations => "RUN_MIGRATIONS",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioRegion => "AWS_REGION",
            EnvKey::RecordingBucket => "REC_BUCKET",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::ScratchDir => "TMP_DIR",
            EnvKey::WorkerId => "WORKER_ID",
            EnvKey::IdleDelayMs => "LOOP_DELAY_IDLE_MS",
            EnvKey::PollIntervalMs => "POLL_INTERVAL_MS",
            EnvKey::GracefulStopMs => "GRACEFUL_STOP_MS",
            EnvKey::DefaultMaxSeconds => "DEFAULT_MAX_SECONDS",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::ReadTimeoutSeconds => "READ_TIMEOUT_SECONDS",
            EnvKey::StaleClaimSeconds => "STALE_CLAIM_SECONDS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    get_opt(key).unwrap_or_else(|| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
