//! ffmpeg-backed capture engine.
//!
//! ffmpeg copies the playlist's streams into an mp4 without re-encoding and
//! stops on its own after `-t` seconds. On SIGINT it finishes the container so
//! a stopped recording stays playable.

use std::collections::VecDeque;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use super::capture::{CaptureEngine, CaptureExit, CaptureProcess, CaptureRequest, ProcessSignaller};
use crate::common::error::{RecorderError, Result};

/// Lines of stderr kept for the job's error detail.
const STDERR_TAIL_LINES: usize = 20;

pub struct FfmpegCapture {
    program: String,
}

impl FfmpegCapture {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

pub fn capture_args(request: &CaptureRequest) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-rw_timeout".to_string(),
        request.read_timeout.as_micros().to_string(),
        "-i".to_string(),
        request.source_uri.clone(),
        "-c".to_string(),
        "copy".to_string(),
        "-t".to_string(),
        request.max_seconds.to_string(),
        request.output_path.to_string_lossy().into_owned(),
    ]
}

#[async_trait]
impl CaptureEngine for FfmpegCapture {
    async fn spawn(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureProcess>> {
        let mut child = Command::new(&self.program)
            .args(capture_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::Spawn(format!("{}: {}", self.program, e)))?;

        let pid = child.id();
        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(stderr, pid)));

        Ok(Box::new(FfmpegProcess {
            child,
            pid,
            stderr,
            exit: None,
        }))
    }
}

async fn collect_stderr(stderr: ChildStderr, pid: Option<u32>) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        debug!(pid, "[ffmpeg] {}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

struct FfmpegProcess {
    child: Child,
    pid: Option<u32>,
    stderr: Option<JoinHandle<String>>,
    exit: Option<CaptureExit>,
}

#[async_trait]
impl CaptureProcess for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> Result<CaptureExit> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }

        let status = self
            .child
            .wait()
            .await
            .map_err(|e| RecorderError::Capture(format!("waiting for ffmpeg: {}", e)))?;

        // keep the handle until it resolves so a cancelled wait can resume
        let stderr = match self.stderr.as_mut() {
            Some(task) => {
                let tail = task.await.unwrap_or_default();
                self.stderr = None;
                tail
            }
            None => String::new(),
        };

        let exit = CaptureExit {
            code: status.code(),
            stderr,
        };
        self.exit = Some(exit.clone());
        Ok(exit)
    }

    async fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| RecorderError::Capture(format!("killing ffmpeg: {}", e)))
    }
}

/// Sends SIGINT, the signal ffmpeg treats as "finish the file and exit".
pub struct SigintSignaller;

impl ProcessSignaller for SigintSignaller {
    #[cfg(unix)]
    fn interrupt(&self, pid: u32) -> Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGINT).map_err(|e| RecorderError::Signal {
            pid,
            reason: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn interrupt(&self, pid: u32) -> Result<()> {
        Err(RecorderError::Signal {
            pid,
            reason: "interrupt signals are only supported on unix".to_string(),
        })
    }
}
