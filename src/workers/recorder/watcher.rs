use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::capture::{ProcessSignaller, StopSignal};
use crate::modules::recording::model::RecordingStatus;
use crate::modules::recording::repository::JobStore;

pub struct StopWatch {
    pub store: Arc<dyn JobStore>,
    pub signaller: Arc<dyn ProcessSignaller>,
    pub job_id: Uuid,
    pub worker_id: String,
    pub interval: Duration,
}

/// Polls the job row until `token` is cancelled and turns a `stopping` status
/// into a single interrupt for the pid recorded on the row.
///
/// Returns the number of interrupts delivered, which is at most one.
pub async fn watch_for_stop(
    watch: StopWatch,
    stop: Arc<StopSignal>,
    token: CancellationToken,
) -> u32 {
    let job_id = watch.job_id;
    let worker_id = watch.worker_id.as_str();

    let mut ticker = tokio::time::interval(watch.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately; the capture has only just started
    ticker.tick().await;

    let mut sent = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let status = match watch.store.poll_status(job_id, worker_id).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(%job_id, worker_id, "job row is no longer claimed by this worker");
                continue;
            }
            Err(e) => {
                warn!(%job_id, worker_id, "status poll failed: {}", e);
                continue;
            }
        };

        if status != RecordingStatus::Stopping || stop.is_requested() {
            continue;
        }

        let handle = match watch.store.fetch_subprocess_handle(job_id).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%job_id, worker_id, "could not read subprocess handle: {}", e);
                continue;
            }
        };

        if !stop.request() {
            continue;
        }
        info!(%job_id, worker_id, "stopping requested");

        match handle.filter(|pid| *pid > 0) {
            Some(pid) => match watch.signaller.interrupt(pid as u32) {
                Ok(()) => {
                    sent += 1;
                    debug!(%job_id, worker_id, pid, "sent interrupt");
                }
                Err(e) => warn!(%job_id, worker_id, "{}", e),
            },
            None => warn!(%job_id, worker_id, "no subprocess handle recorded, cannot interrupt"),
        }
    }

    sent
}

/// Drives `work` to completion while stamping the claim heartbeat every
/// `interval`. Covers the stretch after the capture exits, when the stop
/// watcher is gone but the row is still active (uploads can outlast the
/// stale-claim bound).
pub async fn with_heartbeat<F: Future>(
    store: &dyn JobStore,
    job_id: Uuid,
    worker_id: &str,
    interval: Duration,
    work: F,
) -> F::Output {
    tokio::pin!(work);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            out = &mut work => return out,
            _ = ticker.tick() => {
                match store.poll_status(job_id, worker_id).await {
                    Ok(Some(_)) => {}
                    Ok(None) => warn!(%job_id, worker_id, "heartbeat found the row no longer claimed by this worker"),
                    Err(e) => warn!(%job_id, worker_id, "heartbeat failed: {}", e),
                }
            }
        }
    }
}
