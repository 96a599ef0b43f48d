//! Manager: the public face of the request queue.

use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::engine::Engine;
use super::worker_loop::WorkerGroup;
use crate::domain::{ProgressSummary, QueueError, RequestId};
use crate::ports::QueueObserver;
use crate::queue::{EntrySnapshot, EntryStatus};
use crate::typed::{DecoderRegistry, Request};

enum Phase {
    Built,
    Running(WorkerGroup),
    ShutDown,
}

/// Owns the queue, its workers, and its store.
///
/// Lifecycle: `ManagerBuilder::build()` -> `start()` (restore + spawn
/// workers) -> `enqueue` etc. -> `shutdown()`. Dropping a running manager
/// stops claims after the in-flight attempts.
pub struct Manager {
    engine: Arc<Engine>,
    registry: DecoderRegistry,
    phase: Mutex<Phase>,
}

impl Manager {
    pub(crate) fn new(engine: Arc<Engine>, registry: DecoderRegistry) -> Self {
        Self {
            engine,
            registry,
            phase: Mutex::new(Phase::Built),
        }
    }

    /// Restore the stored queue and start the workers.
    ///
    /// Returns how many stored entries came back.
    pub async fn start(&self) -> Result<usize, QueueError> {
        let mut phase = self.phase.lock().await;
        match *phase {
            Phase::Built => {}
            Phase::Running(_) => return Err(QueueError::AlreadyStarted),
            Phase::ShutDown => return Err(QueueError::ShutDown),
        }
        let restored = self.engine.restore(&self.registry).await;
        let concurrency = self.engine.config().concurrency;
        *phase = Phase::Running(WorkerGroup::spawn(concurrency, Arc::clone(&self.engine)));
        info!(concurrency, restored, "request manager started");
        Ok(restored)
    }

    async fn ensure_running(&self) -> Result<(), QueueError> {
        match *self.phase.lock().await {
            Phase::Running(_) => Ok(()),
            Phase::Built => Err(QueueError::NotStarted),
            Phase::ShutDown => Err(QueueError::ShutDown),
        }
    }

    /// Persist `request` and hand it to the workers.
    ///
    /// A storage failure is logged, not returned: the request is queued in
    /// memory and the next successful save persists it.
    pub async fn enqueue<R: Request>(&self, request: R) -> Result<RequestId, QueueError> {
        self.enqueue_arc(Arc::new(request)).await
    }

    pub async fn enqueue_arc(&self, request: Arc<dyn Request>) -> Result<RequestId, QueueError> {
        self.ensure_running().await?;
        self.engine.enqueue(request).await
    }

    /// Stop claiming new entries. Running attempts finish and are recorded.
    pub fn pause(&self) {
        self.engine.pause();
    }

    pub fn resume(&self) {
        self.engine.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    /// Connectivity input. While disconnected nothing is claimed; the
    /// observer hears every change.
    pub fn set_connected(&self, connected: bool) {
        self.engine.set_connected(connected);
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Track a connectivity signal until it closes or the manager is dropped.
    pub fn follow_connectivity(&self, mut rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine: Weak<Engine> = Arc::downgrade(&self.engine);
        tokio::spawn(async move {
            loop {
                let connected = *rx.borrow_and_update();
                match engine.upgrade() {
                    Some(engine) => engine.set_connected(connected),
                    None => break,
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Register the single observer, replacing any previous one. Only a weak
    /// reference is kept.
    pub fn set_observer<O: QueueObserver + 'static>(&self, observer: &Arc<O>) {
        let weak: Weak<O> = Arc::downgrade(observer);
        self.engine.notifier.set_observer(weak);
    }

    pub fn clear_observer(&self) {
        self.engine.notifier.clear_observer();
    }

    pub fn summary(&self) -> ProgressSummary {
        self.engine.notifier.summary()
    }

    /// Every pushed summary, as a watch channel.
    pub fn watch_progress(&self) -> watch::Receiver<ProgressSummary> {
        self.engine.notifier.subscribe()
    }

    /// Queued entries in claim order.
    pub async fn entries(&self) -> Vec<EntrySnapshot> {
        self.engine.snapshots().await
    }

    pub async fn failed_entries(&self) -> Vec<EntrySnapshot> {
        self.entries()
            .await
            .into_iter()
            .filter(|entry| entry.status == EntryStatus::PermanentlyFailed)
            .collect()
    }

    pub async fn entry(&self, id: RequestId) -> Option<EntrySnapshot> {
        self.engine.snapshot(id).await
    }

    /// Give a permanently failed entry a fresh set of attempts.
    pub async fn requeue_failed(&self, id: RequestId) -> Result<(), QueueError> {
        self.engine.requeue_failed(id).await
    }

    /// Remove an entry. An attempt already running is left to finish and its
    /// result is discarded.
    pub async fn cancel(&self, id: RequestId) -> Result<(), QueueError> {
        self.engine.cancel(id).await
    }

    /// Remove every entry and reset the session counters. Returns how many
    /// entries were removed.
    pub async fn clear(&self) -> usize {
        self.engine.clear().await
    }

    /// Stop claiming, wait for running attempts to be recorded, and make a
    /// last attempt at any save that failed earlier.
    pub async fn shutdown(&self) {
        let previous = {
            let mut phase = self.phase.lock().await;
            std::mem::replace(&mut *phase, Phase::ShutDown)
        };
        match previous {
            Phase::Running(workers) => workers.shutdown_and_join().await,
            Phase::Built | Phase::ShutDown => {}
        }
        if !self.engine.flush().await {
            warn!("queue could not be saved at shutdown");
        }
        info!("request manager shut down");
    }
}
