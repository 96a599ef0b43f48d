//! Scripted request kinds and observers shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use ulid::Ulid;

use crate::domain::{
    DecodeError, EncodeError, ErrorKind, ProgressSummary, Representation, RequestError, RequestId,
    RequestKind,
};
use crate::ports::QueueObserver;
use crate::queue::QueueEntry;
use crate::typed::{Decode, DecoderRegistry, Request, RequestContext};

pub(crate) const SCRIPTED_KIND: &str = "test.scripted.v1";

/// One step of a scripted attempt. An attempt that runs out of steps succeeds.
#[derive(Clone)]
pub(crate) enum Step {
    Sleep(Duration),
    Progress(f64),
    Heartbeat,
    /// Record an upload offset and ask for a re-save.
    Checkpoint(u64),
    /// Block until the test releases the gate.
    Wait(Arc<Notify>),
    Hang,
    Fail(RequestError),
}

pub(crate) type Attempt = Vec<Step>;

pub(crate) fn fail(error: RequestError) -> Attempt {
    vec![Step::Fail(error)]
}

pub(crate) fn ok() -> Attempt {
    Vec::new()
}

#[derive(Default)]
struct HarnessState {
    scripts: HashMap<String, VecDeque<Attempt>>,
    calls: HashMap<String, usize>,
    active: HashMap<String, usize>,
    active_total: usize,
    max_active: usize,
    overlapped: bool,
    finished: Vec<String>,
    saves: Vec<bool>,
    saw_cancel: Vec<String>,
}

/// Shared script and bookkeeping for `ScriptedRequest`s.
#[derive(Clone, Default)]
pub(crate) struct Harness {
    state: Arc<Mutex<HarnessState>>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HarnessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn request(&self, label: &str) -> ScriptedRequest {
        ScriptedRequest {
            id: None,
            label: label.to_string(),
            resubmit: true,
            offset: AtomicU64::new(0),
            harness: self.clone(),
        }
    }

    /// Queue up attempt scripts for `label`, in order.
    pub(crate) fn script(&self, label: &str, attempts: Vec<Attempt>) {
        self.lock()
            .scripts
            .entry(label.to_string())
            .or_default()
            .extend(attempts);
    }

    pub(crate) fn entry(&self, seq: u64, request: ScriptedRequest) -> QueueEntry {
        let representation = request.encode().unwrap();
        QueueEntry::new(
            seq,
            RequestId::from_ulid(Ulid::new()),
            Arc::new(request),
            representation,
        )
    }

    /// A registry that decodes scripted requests back onto this harness.
    pub(crate) fn registry(&self) -> DecoderRegistry {
        let mut registry = DecoderRegistry::new();
        let harness = self.clone();
        registry
            .register_fn(SCRIPTED_KIND, move |repr| {
                let payload: ScriptedPayload = repr.payload()?;
                Ok(Arc::new(ScriptedRequest {
                    id: repr.id(),
                    label: payload.label,
                    resubmit: payload.resubmit,
                    offset: AtomicU64::new(payload.offset),
                    harness: harness.clone(),
                }) as Arc<dyn Request>)
            })
            .unwrap();
        registry
    }

    pub(crate) fn calls(&self, label: &str) -> usize {
        self.lock().calls.get(label).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub(crate) fn active(&self) -> usize {
        self.lock().active_total
    }

    pub(crate) fn max_active(&self) -> usize {
        self.lock().max_active
    }

    /// Did two attempts of the same request ever run at once?
    pub(crate) fn overlapped(&self) -> bool {
        self.lock().overlapped
    }

    /// Labels whose attempt returned `Ok`, in completion order.
    pub(crate) fn finished(&self) -> Vec<String> {
        self.lock().finished.clone()
    }

    /// Results of `request_save` calls made by checkpoints.
    pub(crate) fn saves(&self) -> Vec<bool> {
        self.lock().saves.clone()
    }

    /// Labels whose attempt ended with the cancelled flag set.
    pub(crate) fn saw_cancel(&self) -> Vec<String> {
        self.lock().saw_cancel.clone()
    }

    fn begin(&self, label: &str) -> (Attempt, ActiveGuard) {
        let mut state = self.lock();
        *state.calls.entry(label.to_string()).or_default() += 1;
        let active = state.active.entry(label.to_string()).or_default();
        *active += 1;
        if *active > 1 {
            state.overlapped = true;
        }
        state.active_total += 1;
        state.max_active = state.max_active.max(state.active_total);
        let attempt = state
            .scripts
            .get_mut(label)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        (
            attempt,
            ActiveGuard {
                harness: self.clone(),
                label: label.to_string(),
            },
        )
    }
}

/// Decrements the active counters even when the attempt is aborted.
struct ActiveGuard {
    harness: Harness,
    label: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut state = self.harness.lock();
        if let Some(active) = state.active.get_mut(&self.label) {
            *active = active.saturating_sub(1);
        }
        state.active_total = state.active_total.saturating_sub(1);
    }
}

#[derive(Serialize, Deserialize)]
struct ScriptedPayload {
    label: String,
    resubmit: bool,
    #[serde(default)]
    offset: u64,
}

pub(crate) struct ScriptedRequest {
    id: Option<RequestId>,
    label: String,
    resubmit: bool,
    offset: AtomicU64,
    harness: Harness,
}

impl ScriptedRequest {
    pub(crate) fn never_resubmit(mut self) -> Self {
        self.resubmit = false;
        self
    }
}

#[async_trait]
impl Request for ScriptedRequest {
    fn kind(&self) -> RequestKind {
        SCRIPTED_KIND.into()
    }

    fn id(&self) -> Option<RequestId> {
        self.id
    }

    fn encode(&self) -> Result<Representation, EncodeError> {
        Representation::from_payload(
            SCRIPTED_KIND,
            &ScriptedPayload {
                label: self.label.clone(),
                resubmit: self.resubmit,
                offset: self.offset.load(Ordering::SeqCst),
            },
        )
    }

    async fn perform(&self, ctx: RequestContext) -> Result<(), RequestError> {
        let (attempt, _guard) = self.harness.begin(&self.label);
        for step in attempt {
            match step {
                Step::Sleep(duration) => tokio::time::sleep(duration).await,
                Step::Progress(fraction) => ctx.report_progress(fraction),
                Step::Heartbeat => ctx.heartbeat(),
                Step::Checkpoint(offset) => {
                    self.offset.store(offset, Ordering::SeqCst);
                    let saved = ctx.request_save().await;
                    self.harness.lock().saves.push(saved);
                }
                Step::Wait(gate) => gate.notified().await,
                Step::Hang => std::future::pending::<()>().await,
                Step::Fail(error) => {
                    self.record_cancel(&ctx);
                    return Err(error);
                }
            }
        }
        self.record_cancel(&ctx);
        self.harness.lock().finished.push(self.label.clone());
        Ok(())
    }

    fn should_attempt_resubmission(&self, error: &RequestError) -> bool {
        self.resubmit && error.is_retryable()
    }
}

impl ScriptedRequest {
    fn record_cancel(&self, ctx: &RequestContext) {
        if ctx.is_cancelled() {
            self.harness.lock().saw_cancel.push(self.label.clone());
        }
    }
}

/// Minimal `Decode` kind with no outside dependencies.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Note {
    text: String,
}

impl Note {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

#[async_trait]
impl Request for Note {
    fn kind(&self) -> RequestKind {
        Self::KIND.into()
    }

    fn encode(&self) -> Result<Representation, EncodeError> {
        Representation::from_payload(Self::KIND, self)
    }

    async fn perform(&self, _ctx: RequestContext) -> Result<(), RequestError> {
        Ok(())
    }
}

impl Decode for Note {
    const KIND: &'static str = "test.note.v1";

    fn decode(representation: &Representation) -> Result<Self, DecodeError> {
        representation.expect_kind(Self::KIND)?;
        representation.payload()
    }
}

/// Observer that records every callback.
#[derive(Default)]
pub(crate) struct Recorder {
    summaries: Mutex<Vec<ProgressSummary>>,
    finished: Mutex<Vec<RequestId>>,
    failed: Mutex<Vec<(RequestId, ErrorKind)>>,
    connection: Mutex<Vec<bool>>,
    veto: AtomicBool,
    veto_calls: AtomicUsize,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn vetoing() -> Arc<Self> {
        let recorder = Self::default();
        recorder.veto.store(true, Ordering::SeqCst);
        Arc::new(recorder)
    }

    pub(crate) fn summaries(&self) -> Vec<ProgressSummary> {
        self.summaries.lock().unwrap().clone()
    }

    pub(crate) fn finished(&self) -> Vec<RequestId> {
        self.finished.lock().unwrap().clone()
    }

    pub(crate) fn failed(&self) -> Vec<(RequestId, ErrorKind)> {
        self.failed.lock().unwrap().clone()
    }

    pub(crate) fn connection(&self) -> Vec<bool> {
        self.connection.lock().unwrap().clone()
    }

    pub(crate) fn veto_calls(&self) -> usize {
        self.veto_calls.load(Ordering::SeqCst)
    }
}

impl QueueObserver for Recorder {
    fn on_progress(&self, summary: &ProgressSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }

    fn on_connection_status(&self, connected: bool) {
        self.connection.lock().unwrap().push(connected);
    }

    fn on_request_finished(&self, id: RequestId) {
        self.finished.lock().unwrap().push(id);
    }

    fn on_request_failed(&self, id: RequestId, error: &RequestError) {
        self.failed.lock().unwrap().push((id, error.kind()));
    }

    fn should_reattempt(&self, _id: RequestId, _error: &RequestError) -> bool {
        self.veto_calls.fetch_add(1, Ordering::SeqCst);
        !self.veto.load(Ordering::SeqCst)
    }
}

/// Poll `check` until it holds, failing the test after five seconds.
pub(crate) async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
