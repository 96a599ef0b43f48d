//! RequestContext: a running request's handle back to its manager.
//!
//! The handle is non-owning. If the manager is gone by the time the request
//! reports something, the report is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;

use crate::app::engine::Engine;
use crate::domain::RequestId;

/// Longest attempt limit honored; larger ones would overflow `Instant`.
const MAX_LIMIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Attempt deadline that heartbeats push forward.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    limit: Duration,
    last: Mutex<Instant>,
}

impl Heartbeat {
    pub(crate) fn new(limit: Duration) -> Self {
        Self {
            limit: limit.min(MAX_LIMIT),
            last: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn beat(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn deadline(&self) -> Instant {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) + self.limit
    }

    pub(crate) fn limit(&self) -> Duration {
        self.limit
    }
}

/// Passed to `Request::perform` for one attempt.
#[derive(Clone)]
pub struct RequestContext {
    id: RequestId,
    attempt: u32,
    engine: Weak<Engine>,
    heartbeat: Arc<Heartbeat>,
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    pub(crate) fn new(
        id: RequestId,
        attempt: u32,
        engine: Weak<Engine>,
        heartbeat: Arc<Heartbeat>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            attempt,
            engine,
            heartbeat,
            cancelled,
        }
    }

    /// A context attached to no manager: reports go nowhere. Useful for
    /// exercising a request kind on its own.
    pub fn detached(id: RequestId) -> Self {
        Self::new(
            id,
            1,
            Weak::new(),
            Arc::new(Heartbeat::new(MAX_LIMIT)),
            Arc::new(AtomicBool::new(false)),
        )
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report incremental progress in `[0, 1]` (values outside are clamped).
    pub fn report_progress(&self, fraction: f64) {
        if self.is_cancelled() {
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.report_progress(self.id, fraction);
        }
    }

    /// Still alive: pushes the attempt's timeout out by one full limit.
    pub fn heartbeat(&self) {
        self.heartbeat.beat();
    }

    /// Ask for the request to be re-encoded and its stored representation
    /// replaced, e.g. after recording an upload offset.
    ///
    /// Returns whether the new representation reached the store.
    pub async fn request_save(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        match self.engine.upgrade() {
            Some(engine) => engine.resave(self.id).await,
            None => false,
        }
    }

    /// Set when the entry was cancelled or cleared while this attempt ran.
    /// The result of a cancelled attempt is discarded either way.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
