//! DecoderRegistry: kind tag -> decoder.
//!
//! Restore looks up each stored entry's `kind` here. A kind with no decoder
//! cannot come back after a restart.

use std::collections::HashMap;
use std::sync::Arc;

use super::request::{Decode, Request};
use crate::domain::{DecodeError, Representation};

type DecodeFn = dyn Fn(&Representation) -> Result<Arc<dyn Request>, DecodeError> + Send + Sync;

/// Maps kind tags to decoders.
///
/// # Example
/// ```ignore
/// let mut registry = DecoderRegistry::new();
/// registry.register::<Ping>()?;
///
/// let client = Arc::new(HttpClient::new());
/// registry.register_fn("acme.photos.upload.v1", move |repr| {
///     Upload::from_representation(repr, client.clone()).map(|r| Arc::new(r) as _)
/// })?;
/// ```
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Arc<DecodeFn>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("decoder for kind '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Decode>(&mut self) -> Result<(), RegistryError> {
        self.register_fn(T::KIND, |repr| {
            T::decode(repr).map(|request| Arc::new(request) as Arc<dyn Request>)
        })
    }

    pub fn register_fn<F>(&mut self, kind: impl Into<String>, decode: F) -> Result<(), RegistryError>
    where
        F: Fn(&Representation) -> Result<Arc<dyn Request>, DecodeError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.decoders.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.decoders.insert(kind, Arc::new(decode));
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    pub fn registered_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.decoders.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode with the decoder registered for the representation's kind.
    pub fn decode(&self, representation: &Representation) -> Result<Arc<dyn Request>, DecodeError> {
        let decoder = self
            .decoders
            .get(representation.kind().as_str())
            .ok_or_else(|| DecodeError::UnknownKind(representation.kind().to_string()))?;
        decoder(representation)
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("kinds", &self.registered_kinds())
            .finish()
    }
}
