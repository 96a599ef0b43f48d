use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::{
    Decode, DecodeError, EncodeError, JsonFileStore, ManagerBuilder, ManagerConfig,
    ProgressSummary, QueueObserver, Representation, Request, RequestContext, RequestError,
    RequestId, RequestKind, RetryPolicy,
};

/// Stand-in for a remote API: slow, occasionally flaky, and strict about names.
struct FlakyEndpoint {
    calls: AtomicU32,
    fail_every: u32,
}

impl FlakyEndpoint {
    fn new(fail_every: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_every,
        }
    }

    async fn send_chunk(&self, name: &str, offset: u64, len: u64) -> Result<(), RequestError> {
        sleep(Duration::from_millis(40)).await;
        if name.starts_with("bad") {
            return Err(RequestError::permanent(format!("422: '{name}' rejected")));
        }
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if call % self.fail_every == 0 {
            return Err(RequestError::transient(format!(
                "connection reset at {name}@{offset}+{len}"
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct UploadPayload {
    name: String,
    size: u64,
    #[serde(default)]
    offset: u64,
}

/// Chunked upload that resumes from its last saved offset.
struct UploadRequest {
    id: Option<RequestId>,
    name: String,
    size: u64,
    offset: AtomicU64,
    endpoint: Arc<FlakyEndpoint>,
}

impl UploadRequest {
    const KIND: &'static str = "demo.files.upload.v1";
    const CHUNK: u64 = 256;

    fn new(name: &str, size: u64, endpoint: Arc<FlakyEndpoint>) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            size,
            offset: AtomicU64::new(0),
            endpoint,
        }
    }

    fn decode_with(
        repr: &Representation,
        endpoint: Arc<FlakyEndpoint>,
    ) -> Result<Arc<dyn Request>, DecodeError> {
        repr.expect_kind(Self::KIND)?;
        let payload: UploadPayload = repr.payload()?;
        Ok(Arc::new(Self {
            id: repr.id(),
            name: payload.name,
            size: payload.size,
            offset: AtomicU64::new(payload.offset),
            endpoint,
        }))
    }
}

#[async_trait]
impl Request for UploadRequest {
    fn kind(&self) -> RequestKind {
        Self::KIND.into()
    }

    fn id(&self) -> Option<RequestId> {
        self.id
    }

    fn encode(&self) -> Result<Representation, EncodeError> {
        Representation::from_payload(
            Self::KIND,
            &UploadPayload {
                name: self.name.clone(),
                size: self.size,
                offset: self.offset.load(Ordering::SeqCst),
            },
        )
    }

    async fn perform(&self, ctx: RequestContext) -> Result<(), RequestError> {
        let mut offset = self.offset.load(Ordering::SeqCst);
        while offset < self.size {
            if ctx.is_cancelled() {
                return Err(RequestError::unknown("upload cancelled"));
            }
            let len = Self::CHUNK.min(self.size - offset);
            self.endpoint.send_chunk(&self.name, offset, len).await?;
            offset += len;
            self.offset.store(offset, Ordering::SeqCst);
            ctx.heartbeat();
            ctx.report_progress(offset as f64 / self.size as f64);
            ctx.request_save().await;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Ping {
    host: String,
}

#[async_trait]
impl Request for Ping {
    fn kind(&self) -> RequestKind {
        Self::KIND.into()
    }

    fn encode(&self) -> Result<Representation, EncodeError> {
        Representation::from_payload(Self::KIND, self)
    }

    async fn perform(&self, _ctx: RequestContext) -> Result<(), RequestError> {
        sleep(Duration::from_millis(20)).await;
        info!(host = %self.host, "pong");
        Ok(())
    }
}

impl Decode for Ping {
    const KIND: &'static str = "demo.net.ping.v1";

    fn decode(representation: &Representation) -> Result<Self, DecodeError> {
        representation.expect_kind(Self::KIND)?;
        representation.payload()
    }
}

struct ConsoleObserver;

impl QueueObserver for ConsoleObserver {
    fn on_progress(&self, summary: &ProgressSummary) {
        info!(
            total = summary.total,
            pending = summary.pending,
            in_flight = summary.in_flight,
            succeeded = summary.succeeded,
            failed = summary.permanently_failed,
            "progress {:.0}%",
            summary.fraction_complete * 100.0
        );
    }

    fn on_connection_status(&self, connected: bool) {
        info!(connected, "connection status");
    }

    fn on_request_finished(&self, id: RequestId) {
        info!(request_id = %id, "finished");
    }

    fn on_request_failed(&self, id: RequestId, error: &RequestError) {
        warn!(request_id = %id, %error, "gave up");
    }
}

fn load_config() -> Result<ManagerConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(ManagerConfig {
            retry: RetryPolicy {
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(2),
                ..RetryPolicy::default_v1()
            },
            ..ManagerConfig::default_v1()
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let store_path: PathBuf = std::env::temp_dir().join("relay-demo").join("queue.json");
    info!(path = %store_path.display(), ?config, "starting demo");

    let endpoint = Arc::new(FlakyEndpoint::new(4));
    let decode_endpoint = Arc::clone(&endpoint);
    let manager = ManagerBuilder::new()
        .register::<Ping>()?
        .register_fn(UploadRequest::KIND, move |repr| {
            UploadRequest::decode_with(repr, Arc::clone(&decode_endpoint))
        })?
        .expect_kinds(&[Ping::KIND, UploadRequest::KIND])
        .store(JsonFileStore::new(&store_path))
        .config(config)
        .build()?;

    let observer = Arc::new(ConsoleObserver);
    manager.set_observer(&observer);

    let restored = manager.start().await?;
    if restored > 0 {
        info!(restored, "resuming requests left over from a previous run");
    }

    let (online_tx, online_rx) = watch::channel(true);
    let follower = manager.follow_connectivity(online_rx);

    manager
        .enqueue(UploadRequest::new("holiday.jpg", 1024, Arc::clone(&endpoint)))
        .await?;
    manager
        .enqueue(UploadRequest::new("notes.txt", 300, Arc::clone(&endpoint)))
        .await?;
    manager
        .enqueue(UploadRequest::new("bad-name.exe", 512, Arc::clone(&endpoint)))
        .await?;
    manager
        .enqueue(Ping {
            host: "api.example.com".to_string(),
        })
        .await?;

    sleep(Duration::from_millis(150)).await;
    info!("simulating loss of connectivity");
    online_tx.send(false)?;
    sleep(Duration::from_millis(500)).await;
    info!("connectivity restored");
    online_tx.send(true)?;

    let mut progress = manager.watch_progress();
    progress.wait_for(|summary| summary.pending == 0).await?;

    for entry in manager.failed_entries().await {
        let reason = entry
            .last_failure
            .as_ref()
            .map(|failure| failure.message.as_str())
            .unwrap_or("unknown");
        warn!(request_id = %entry.id, kind = %entry.kind, attempts = entry.attempts, reason, "left in store as failed");
    }

    drop(online_tx);
    follower.await?;
    manager.shutdown().await;
    Ok(())
}
