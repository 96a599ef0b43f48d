//! WorkerGroup: `concurrency` tasks draining the engine.
//!
//! Each worker loops claim -> perform -> complete. `perform` runs on its own
//! task so a panic or a timeout becomes an ordinary failed attempt instead of
//! taking the worker down with it.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::engine::{Claim, Engine};
use crate::domain::RequestError;
use crate::typed::{Heartbeat, RequestContext};

/// Worker group handle.
/// - `request_shutdown` stops new claims; running attempts finish and are recorded
/// - dropping the handle has the same effect
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub(crate) fn spawn(n: usize, engine: Arc<Engine>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let engine = Arc::clone(&engine);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker_loop(worker_id, engine, rx)));
        }

        Self { shutdown_tx, joins }
    }

    pub(crate) fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for every worker's current attempt to be recorded.
    pub(crate) async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(error) = join.await {
                warn!(%error, "worker task ended abnormally");
            }
        }
    }
}

async fn worker_loop(worker_id: usize, engine: Arc<Engine>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!(worker_id, "worker started");
    while let Some(claim) = engine.claim(&mut shutdown_rx).await {
        let result = run_attempt(&engine, &claim).await;
        if let Err(error) = &result {
            debug!(worker_id, request_id = %claim.id, attempt = claim.attempt, %error, "attempt returned an error");
        }
        engine.complete(claim, result).await;
    }
    debug!(worker_id, "worker stopped");
}

/// Run one attempt under the heartbeat-extended timeout.
async fn run_attempt(engine: &Arc<Engine>, claim: &Claim) -> Result<(), RequestError> {
    let heartbeat = Arc::new(Heartbeat::new(engine.config().request_timeout));
    let ctx = RequestContext::new(
        claim.id,
        claim.attempt,
        Arc::downgrade(engine),
        Arc::clone(&heartbeat),
        Arc::clone(&claim.cancelled),
    );
    let request = Arc::clone(&claim.request);
    let mut attempt = tokio::spawn(async move { request.perform(ctx).await });

    loop {
        tokio::select! {
            joined = &mut attempt => {
                return match joined {
                    Ok(result) => result,
                    Err(error) if error.is_panic() => {
                        warn!(request_id = %claim.id, kind = %claim.kind, "request panicked during perform");
                        Err(RequestError::unknown("request panicked during perform"))
                    }
                    Err(_) => Err(RequestError::unknown("attempt was aborted")),
                };
            }
            _ = tokio::time::sleep_until(heartbeat.deadline()) => {
                // A heartbeat may have landed while we slept.
                if Instant::now() >= heartbeat.deadline() {
                    attempt.abort();
                    warn!(request_id = %claim.id, kind = %claim.kind, attempt = claim.attempt, "attempt timed out");
                    return Err(RequestError::timeout(format!(
                        "no result or heartbeat within {:?}",
                        heartbeat.limit()
                    )));
                }
            }
        }
    }
}
