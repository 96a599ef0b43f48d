//! ProgressNotifier: aggregate progress and observer fan-out.
//!
//! Holds its own short `std::sync::Mutex`, never the queue lock, so running
//! requests can report progress while a save is in flight. Observer callbacks
//! are always made after that mutex is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;

use crate::domain::{ProgressSummary, QueueCounts, RequestError, RequestId};
use crate::ports::QueueObserver;

#[derive(Default)]
struct NotifierState {
    counts: QueueCounts,
    /// Last progress of each in-flight attempt.
    progress: HashMap<RequestId, f64>,
    observer: Option<Weak<dyn QueueObserver>>,
}

pub(crate) struct ProgressNotifier {
    state: Mutex<NotifierState>,
    summary_tx: watch::Sender<ProgressSummary>,
}

impl ProgressNotifier {
    pub(crate) fn new() -> Self {
        let (summary_tx, _) = watch::channel(ProgressSummary::from_counts(QueueCounts::default(), 0.0));
        Self {
            state: Mutex::new(NotifierState::default()),
            summary_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_observer(&self, observer: Weak<dyn QueueObserver>) {
        self.lock().observer = Some(observer);
    }

    pub(crate) fn clear_observer(&self) {
        self.lock().observer = None;
    }

    fn observer(&self) -> Option<Arc<dyn QueueObserver>> {
        self.lock().observer.as_ref().and_then(Weak::upgrade)
    }

    /// Record fresh counts. Called with the queue lock held, right after a mutation.
    pub(crate) fn store_counts(&self, counts: QueueCounts) {
        self.lock().counts = counts;
    }

    pub(crate) fn begin(&self, id: RequestId) {
        self.lock().progress.insert(id, 0.0);
    }

    pub(crate) fn finish(&self, id: RequestId) {
        self.lock().progress.remove(&id);
    }

    pub(crate) fn reset_progress(&self) {
        self.lock().progress.clear();
    }

    /// Update an in-flight attempt's progress. Reports for attempts that have
    /// already finished are ignored. Returns whether anything changed.
    pub(crate) fn set_progress(&self, id: RequestId, fraction: f64) -> bool {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let mut state = self.lock();
        match state.progress.get_mut(&id) {
            Some(current) if *current != fraction => {
                *current = fraction;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn progress_of(&self, id: RequestId) -> f64 {
        self.lock().progress.get(&id).copied().unwrap_or(0.0)
    }

    pub(crate) fn summary(&self) -> ProgressSummary {
        let state = self.lock();
        ProgressSummary::from_counts(state.counts, state.progress.values().sum())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ProgressSummary> {
        self.summary_tx.subscribe()
    }

    /// Publish the current summary to the observer and to watch subscribers.
    pub(crate) fn push(&self) {
        let (summary, observer) = {
            let state = self.lock();
            let summary =
                ProgressSummary::from_counts(state.counts, state.progress.values().sum());
            (summary, state.observer.as_ref().and_then(Weak::upgrade))
        };
        self.summary_tx.send_replace(summary.clone());
        if let Some(observer) = observer {
            observer.on_progress(&summary);
        }
    }

    pub(crate) fn connection_changed(&self, connected: bool) {
        if let Some(observer) = self.observer() {
            observer.on_connection_status(connected);
        }
    }

    pub(crate) fn request_finished(&self, id: RequestId) {
        if let Some(observer) = self.observer() {
            observer.on_request_finished(id);
        }
    }

    pub(crate) fn request_failed(&self, id: RequestId, error: &RequestError) {
        if let Some(observer) = self.observer() {
            observer.on_request_failed(id, error);
        }
    }

    /// The observer's veto on a retry; no observer means no veto.
    pub(crate) fn should_reattempt(&self, id: RequestId, error: &RequestError) -> bool {
        self.observer()
            .is_none_or(|observer| observer.should_reattempt(id, error))
    }
}
