//! The request contract.

use async_trait::async_trait;

use super::context::RequestContext;
use crate::domain::{DecodeError, EncodeError, RequestError, RequestId, RequestKind, Representation};

/// A unit of outgoing work that must eventually reach the remote service.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Ping { host: String }
///
/// #[async_trait]
/// impl Request for Ping {
///     fn kind(&self) -> RequestKind { Self::KIND.into() }
///
///     fn encode(&self) -> Result<Representation, EncodeError> {
///         Representation::from_payload(Self::KIND, self)
///     }
///
///     async fn perform(&self, ctx: RequestContext) -> Result<(), RequestError> {
///         ctx.report_progress(0.5);
///         transport.ping(&self.host).await.map_err(classify)
///     }
/// }
/// ```
///
/// The engine guarantees `perform` never runs twice at once for the same
/// queue entry.
#[async_trait]
pub trait Request: Send + Sync + 'static {
    fn kind(&self) -> RequestKind;

    /// Identity the request already carries (e.g. after being decoded).
    /// `None` lets the manager assign one at enqueue.
    fn id(&self) -> Option<RequestId> {
        None
    }

    /// Capture everything needed to rebuild this request after a restart.
    ///
    /// The manager adds `kind` / `id`; only kind-specific fields are needed.
    fn encode(&self) -> Result<Representation, EncodeError>;

    /// Run the network action. The returned future resolves exactly once.
    async fn perform(&self, ctx: RequestContext) -> Result<(), RequestError>;

    /// Is a failure of this class worth another attempt?
    ///
    /// Must be deterministic for the same error classification.
    fn should_attempt_resubmission(&self, error: &RequestError) -> bool {
        error.is_retryable()
    }
}

/// Request kinds that can rebuild themselves from a representation.
///
/// Registered with `DecoderRegistry::register::<T>()`. Kinds that need
/// outside state to decode (a shared HTTP client, say) register a closure
/// with `register_fn` instead.
pub trait Decode: Request + Sized {
    const KIND: &'static str;

    fn decode(representation: &Representation) -> Result<Self, DecodeError>;
}
