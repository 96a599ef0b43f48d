//! Engine: the queue, its store, and the claim / complete cycle.
//!
//! Locking:
//! - `state` (tokio Mutex) guards the entry queue and is held across every
//!   store save, so memory and store never differ by more than one mutation
//!   and no entry is handed to two workers.
//! - The notifier has its own short std Mutex for progress reports.
//! - Observer callbacks run after both are released.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, info, warn};

use super::config::ManagerConfig;
use super::notifier::ProgressNotifier;
use crate::domain::{
    Decider, Decision, DecodeError, QueueCounts, QueueError, RequestError, RequestId, RequestKind,
    Representation,
};
use crate::ports::{Clock, IdGenerator, RequestStore};
use crate::queue::{EntryQueue, EntrySnapshot, EntryStatus, FailureRecord, QueueEntry, StoredEntry};
use crate::typed::{DecoderRegistry, Request};

/// Everything behind the queue lock.
#[derive(Default)]
struct QueueState {
    queue: EntryQueue,
    /// Entries that succeeded this session (removed from the queue on success).
    succeeded: usize,
    /// Permanently failed entries removed because `retain_failed` is off.
    dropped_failed: usize,
    /// A save failed since the last successful one.
    dirty: bool,
    /// Cancel flags of attempts still running. A cancelled attempt stays
    /// here until it returns, which keeps its id out of the queue.
    in_flight: HashMap<RequestId, Arc<AtomicBool>>,
}

impl QueueState {
    fn counts(&self) -> QueueCounts {
        let mut counts = self.queue.counts();
        counts.succeeded += self.succeeded;
        counts.permanently_failed += self.dropped_failed;
        counts
    }
}

/// An entry handed to a worker for one attempt.
pub(crate) struct Claim {
    pub(crate) id: RequestId,
    pub(crate) kind: RequestKind,
    pub(crate) attempt: u32,
    pub(crate) request: Arc<dyn Request>,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl Claim {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// What the observer hears after a completion is committed.
enum Verdict {
    Finished,
    Failed(RequestError),
    Retrying,
    Discarded,
}

pub(crate) struct Engine {
    state: Mutex<QueueState>,
    store: Arc<dyn RequestStore>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: ManagerConfig,
    pub(crate) notifier: ProgressNotifier,
    wake: Notify,
    paused: AtomicBool,
    connected: AtomicBool,
}

impl Engine {
    pub(crate) fn new(
        store: Arc<dyn RequestStore>,
        decider: Arc<dyn Decider>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            store,
            decider,
            clock,
            ids,
            config,
            notifier: ProgressNotifier::new(),
            wake: Notify::new(),
            paused: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        }
    }

    pub(crate) fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Save the whole queue. A failure is logged and leaves the state dirty;
    /// the next mutation saves everything again.
    async fn persist(&self, state: &mut QueueState) -> bool {
        let entries = state.queue.to_stored();
        match self.store.save(&entries).await {
            Ok(()) => {
                if state.dirty {
                    info!(entries = entries.len(), "queue saved after earlier failure");
                }
                state.dirty = false;
                true
            }
            Err(error) => {
                warn!(%error, entries = entries.len(), "queue save failed, keeping in-memory state");
                state.dirty = true;
                false
            }
        }
    }

    /// Save if an earlier save failed. Returns whether the store is current.
    pub(crate) async fn flush(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return true;
        }
        self.persist(&mut state).await
    }

    /// Load the stored queue and rebuild it through `registry`.
    ///
    /// Entries that cannot be decoded are dropped with a warning; a store
    /// that cannot be read at all means starting empty. Returns how many
    /// entries were restored.
    pub(crate) async fn restore(&self, registry: &DecoderRegistry) -> usize {
        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(%error, "stored queue could not be loaded, starting empty");
                Vec::new()
            }
        };

        let mut changed = false;
        let mut restored = Vec::with_capacity(stored.len());
        for entry in &stored {
            if entry.status == EntryStatus::Succeeded {
                debug!(seq = entry.seq, "dropping stored request that already succeeded");
                changed = true;
                continue;
            }
            match decode_stored(registry, entry) {
                Ok(decoded) => {
                    if entry.status == EntryStatus::InFlight {
                        debug!(request_id = %decoded.id, "resetting interrupted attempt to pending");
                        changed = true;
                    }
                    restored.push(decoded);
                }
                Err(error) => {
                    warn!(seq = entry.seq, %error, "dropping stored request that cannot be decoded");
                    changed = true;
                }
            }
        }

        let (queue, duplicates) = EntryQueue::from_restored(restored);
        for duplicate in &duplicates {
            warn!(request_id = %duplicate.id, seq = duplicate.seq, "dropping duplicate stored request");
            changed = true;
        }

        let count = queue.len();
        {
            let mut state = self.state.lock().await;
            state.queue = queue;
            if changed {
                self.persist(&mut state).await;
            }
            self.notifier.store_counts(state.counts());
        }
        self.notifier.push();
        info!(restored = count, dropped = stored.len() - count, "queue restored");
        count
    }

    // ------------------------------------------------------------------
    // Owner operations
    // ------------------------------------------------------------------

    pub(crate) async fn enqueue(&self, request: Arc<dyn Request>) -> Result<RequestId, QueueError> {
        let representation = request.encode()?;
        let id = request.id().unwrap_or_else(|| self.ids.generate_request_id());
        let kind = representation.kind().clone();
        {
            let mut state = self.state.lock().await;
            if state.queue.contains(id) || state.in_flight.contains_key(&id) {
                return Err(QueueError::AlreadyQueued(id));
            }
            let seq = state.queue.allocate_seq();
            state.queue.push(QueueEntry::new(seq, id, request, representation));
            self.persist(&mut state).await;
            self.notifier.store_counts(state.counts());
        }
        info!(request_id = %id, %kind, "request enqueued");
        self.notifier.push();
        self.wake.notify_waiters();
        Ok(id)
    }

    pub(crate) async fn cancel(&self, id: RequestId) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            if state.queue.remove(id).is_none() {
                return Err(QueueError::NotFound(id));
            }
            if let Some(flag) = state.in_flight.get(&id) {
                flag.store(true, Ordering::Release);
                debug!(request_id = %id, "cancelled while in flight, result will be discarded");
            }
            self.notifier.finish(id);
            self.persist(&mut state).await;
            self.notifier.store_counts(state.counts());
        }
        info!(request_id = %id, "request cancelled");
        self.notifier.push();
        Ok(())
    }

    pub(crate) async fn requeue_failed(&self, id: RequestId) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            let entry = state.queue.get_mut(id).ok_or(QueueError::NotFound(id))?;
            if entry.status != EntryStatus::PermanentlyFailed {
                return Err(QueueError::NotFailed(id));
            }
            entry.requeue();
            self.persist(&mut state).await;
            self.notifier.store_counts(state.counts());
        }
        info!(request_id = %id, "failed request requeued");
        self.notifier.push();
        self.wake.notify_waiters();
        Ok(())
    }

    /// Drop every entry and reset the session counters.
    pub(crate) async fn clear(&self) -> usize {
        let removed = {
            let mut state = self.state.lock().await;
            let removed = state.queue.clear().len();
            for flag in state.in_flight.values() {
                flag.store(true, Ordering::Release);
            }
            state.succeeded = 0;
            state.dropped_failed = 0;
            self.notifier.reset_progress();
            self.persist(&mut state).await;
            self.notifier.store_counts(state.counts());
            removed
        };
        info!(removed, "queue cleared");
        self.notifier.push();
        removed
    }

    // ------------------------------------------------------------------
    // Dispatch gating
    // ------------------------------------------------------------------

    pub(crate) fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            info!("dispatch paused");
        }
    }

    pub(crate) fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            info!("dispatch resumed");
        }
        self.wake.notify_waiters();
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::AcqRel) == connected {
            return;
        }
        info!(connected, "connectivity changed");
        self.notifier.connection_changed(connected);
        if connected {
            self.wake.notify_waiters();
        }
    }

    fn can_dispatch(&self) -> bool {
        !self.is_paused() && self.is_connected()
    }

    // ------------------------------------------------------------------
    // Worker side
    // ------------------------------------------------------------------

    /// Wait for the next claimable entry. `None` once shutdown is requested.
    ///
    /// Sleeps until woken (enqueue, resume, completion, requeue, reconnect)
    /// or until the earliest scheduled retry is due. Shutdown is only
    /// observed while waiting, never halfway through a claim.
    pub(crate) async fn claim(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Claim> {
        loop {
            if *shutdown.borrow() {
                return None;
            }

            let mut notified = pin!(self.wake.notified());
            notified.as_mut().enable();

            let (claimed, next_retry) = {
                let mut state = self.state.lock().await;
                if self.can_dispatch() {
                    let now = self.clock.now();
                    match self.try_claim(&mut state, now).await {
                        Some(claim) => (Some(claim), None),
                        None => (None, state.queue.earliest_retry()),
                    }
                } else {
                    (None, None)
                }
            };

            if let Some(claim) = claimed {
                self.notifier.push();
                return Some(claim);
            }

            let retry_sleep = next_retry.map(|at| self.until(at));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(retry_sleep.unwrap_or_default()), if retry_sleep.is_some() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    fn until(&self, at: DateTime<Utc>) -> std::time::Duration {
        (at - self.clock.now()).to_std().unwrap_or_default()
    }

    async fn try_claim(&self, state: &mut QueueState, now: DateTime<Utc>) -> Option<Claim> {
        let entry = state.queue.next_ready_mut(now)?;
        entry.start_attempt();
        let claim = Claim {
            id: entry.id,
            kind: entry.kind().clone(),
            attempt: entry.attempts,
            request: Arc::clone(&entry.request),
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        state.in_flight.insert(claim.id, Arc::clone(&claim.cancelled));
        self.notifier.begin(claim.id);
        self.persist(state).await;
        self.notifier.store_counts(state.counts());
        debug!(request_id = %claim.id, kind = %claim.kind, attempt = claim.attempt, "claimed");
        Some(claim)
    }

    /// Record the result of an attempt and decide what happens next.
    pub(crate) async fn complete(&self, claim: Claim, result: Result<(), RequestError>) {
        // Asked before taking the lock: the observer may call back into us.
        let vetoed = match &result {
            Err(error) if !claim.is_cancelled() && claim.request.should_attempt_resubmission(error) => {
                !self.notifier.should_reattempt(claim.id, error)
            }
            _ => false,
        };

        let verdict = {
            let mut state = self.state.lock().await;
            let current = state
                .in_flight
                .get(&claim.id)
                .is_some_and(|flag| Arc::ptr_eq(flag, &claim.cancelled));
            if current {
                state.in_flight.remove(&claim.id);
                self.notifier.finish(claim.id);
            }

            let verdict = if !current || claim.is_cancelled() || !state.queue.contains(claim.id) {
                debug!(request_id = %claim.id, "discarding result of cancelled attempt");
                Verdict::Discarded
            } else {
                self.apply(&mut state, &claim, result, vetoed)
            };

            if !matches!(verdict, Verdict::Discarded) {
                self.persist(&mut state).await;
            }
            self.notifier.store_counts(state.counts());
            verdict
        };

        self.notifier.push();
        match verdict {
            Verdict::Finished => self.notifier.request_finished(claim.id),
            Verdict::Failed(error) => self.notifier.request_failed(claim.id, &error),
            Verdict::Retrying | Verdict::Discarded => {}
        }
        self.wake.notify_waiters();
    }

    fn apply(
        &self,
        state: &mut QueueState,
        claim: &Claim,
        result: Result<(), RequestError>,
        vetoed: bool,
    ) -> Verdict {
        let now = self.clock.now();
        let error = match result {
            Ok(()) => {
                state.queue.remove(claim.id);
                state.succeeded += 1;
                info!(request_id = %claim.id, kind = %claim.kind, attempt = claim.attempt, "request succeeded");
                return Verdict::Finished;
            }
            Err(error) => error,
        };

        let Some(entry) = state.queue.get_mut(claim.id) else {
            return Verdict::Discarded;
        };
        let decision = match self.decider.decide(entry, &error) {
            Decision::Retry { .. } if vetoed => Decision::PermanentFailure {
                reason: "retry declined by observer".to_string(),
            },
            decision => decision,
        };
        let failure = FailureRecord::new(now, &error);

        match decision {
            Decision::Retry { delay, reason } => {
                let delay_ms = delay.as_millis() as u64;
                let delay = chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::days(365));
                entry.schedule_retry(now + delay, failure);
                info!(
                    request_id = %claim.id,
                    kind = %claim.kind,
                    attempt = claim.attempt,
                    delay_ms,
                    %error,
                    %reason,
                    "attempt failed, retry scheduled"
                );
                Verdict::Retrying
            }
            Decision::PermanentFailure { reason } => {
                entry.mark_permanently_failed(failure);
                warn!(
                    request_id = %claim.id,
                    kind = %claim.kind,
                    attempt = claim.attempt,
                    %error,
                    %reason,
                    "request permanently failed"
                );
                if !self.config.retain_failed {
                    state.queue.remove(claim.id);
                    state.dropped_failed += 1;
                }
                Verdict::Failed(error)
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls from running requests
    // ------------------------------------------------------------------

    pub(crate) fn report_progress(&self, id: RequestId, fraction: f64) {
        if self.notifier.set_progress(id, fraction) {
            self.notifier.push();
        }
    }

    /// Re-encode a running request and persist its new representation.
    pub(crate) async fn resave(&self, id: RequestId) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.queue.get_mut(id) else {
            return false;
        };
        match entry.request.encode() {
            Ok(representation) => {
                entry.representation = representation.with_id(id);
            }
            Err(error) => {
                warn!(request_id = %id, %error, "request could not be re-encoded");
                return false;
            }
        }
        let saved = self.persist(&mut state).await;
        debug!(request_id = %id, saved, "request representation re-saved");
        saved
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub(crate) async fn snapshots(&self) -> Vec<EntrySnapshot> {
        let state = self.state.lock().await;
        state
            .queue
            .iter()
            .map(|entry| entry.snapshot(self.notifier.progress_of(entry.id)))
            .collect()
    }

    pub(crate) async fn snapshot(&self, id: RequestId) -> Option<EntrySnapshot> {
        let state = self.state.lock().await;
        state
            .queue
            .get(id)
            .map(|entry| entry.snapshot(self.notifier.progress_of(id)))
    }
}

fn decode_stored(registry: &DecoderRegistry, stored: &StoredEntry) -> Result<QueueEntry, DecodeError> {
    let representation = Representation::from_value(stored.request.clone())?;
    let id = representation.require_id()?;
    let request = registry.decode(&representation)?;
    if request.kind() != *representation.kind() {
        return Err(DecodeError::KindMismatch {
            expected: representation.kind().to_string(),
            found: request.kind().to_string(),
        });
    }
    Ok(QueueEntry::restore(stored, id, request, representation))
}
