//! ManagerBuilder: wiring and fail-fast validation.

use std::sync::Arc;

use super::config::{ConfigError, ManagerConfig};
use super::engine::Engine;
use super::manager::Manager;
use crate::domain::{DecodeError, Decider, DefaultDecider, Representation};
use crate::ports::{Clock, IdGenerator, RequestStore, SystemClock, UlidGenerator};
use crate::typed::{Decode, DecoderRegistry, RegistryError, Request};

/// Builds a `Manager`.
///
/// # Example
/// ```ignore
/// let manager = ManagerBuilder::new()
///     .register::<Ping>()?
///     .register_fn(Upload::KIND, move |repr| Upload::decode_with(repr, client.clone()))?
///     .expect_kinds(&[Ping::KIND, Upload::KIND])
///     .store(JsonFileStore::new(data_dir.join("queue.json")))
///     .config(config)
///     .build()?;
/// manager.start().await?;
/// ```
///
/// # Fail-fast
/// - `expect_kinds()` lists kinds this process must be able to restore
/// - `build()` checks expected ⊆ registered and validates the config
pub struct ManagerBuilder {
    registry: DecoderRegistry,
    expected_kinds: Option<Vec<String>>,
    store: Option<Arc<dyn RequestStore>>,
    config: ManagerConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing request kinds: {0:?}. These kinds were expected but have no decoder.")]
    MissingKinds(Vec<String>),

    #[error("no request store configured")]
    MissingStore,

    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self {
            registry: DecoderRegistry::new(),
            expected_kinds: None,
            store: None,
            config: ManagerConfig::default_v1(),
            clock: None,
            ids: None,
            decider: None,
        }
    }

    pub fn register<T: Decode>(mut self) -> Result<Self, RegistryError> {
        self.registry.register::<T>()?;
        Ok(self)
    }

    /// Register a decoder closure, for kinds that need captured state to decode.
    pub fn register_fn<F>(mut self, kind: impl Into<String>, decode: F) -> Result<Self, RegistryError>
    where
        F: Fn(&Representation) -> Result<Arc<dyn Request>, DecodeError> + Send + Sync + 'static,
    {
        self.registry.register_fn(kind, decode)?;
        Ok(self)
    }

    /// Replace the registry wholesale.
    pub fn registry(mut self, registry: DecoderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn expect_kinds(mut self, kinds: &[&str]) -> Self {
        self.expected_kinds = Some(kinds.iter().map(|kind| kind.to_string()).collect());
        self
    }

    pub fn store<S: RequestStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Override the resubmission policy (default: `DefaultDecider` from the config).
    pub fn decider<D: Decider + 'static>(mut self, decider: D) -> Self {
        self.decider = Some(Arc::new(decider));
        self
    }

    pub fn build(self) -> Result<Manager, BuildError> {
        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<String> = expected
                .iter()
                .filter(|kind| !self.registry.contains(kind))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingKinds(missing));
            }
        }
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(DefaultDecider::new(
                self.config.retry.clone(),
                self.config.max_attempts,
            ))
        });

        let engine = Engine::new(store, decider, clock, ids, self.config);
        Ok(Manager::new(Arc::new(engine), self.registry))
    }
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryStore;
    use crate::testing::{Harness, Note, SCRIPTED_KIND};

    #[test]
    fn build_success() {
        let manager = ManagerBuilder::new()
            .register::<Note>()
            .unwrap()
            .expect_kinds(&[Note::KIND])
            .store(MemoryStore::new())
            .build();
        assert!(manager.is_ok());
    }

    #[test]
    fn build_missing_kinds() {
        let result = ManagerBuilder::new()
            .register::<Note>()
            .unwrap()
            .expect_kinds(&[Note::KIND, SCRIPTED_KIND])
            .store(MemoryStore::new())
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingKinds(missing)) if missing == vec![SCRIPTED_KIND.to_string()]
        ));
    }

    #[test]
    fn registry_can_be_supplied_whole() {
        let harness = Harness::new();
        let result = ManagerBuilder::new()
            .registry(harness.registry())
            .expect_kinds(&[SCRIPTED_KIND])
            .store(MemoryStore::new())
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn duplicate_registration_fails_at_register() {
        let result = ManagerBuilder::new().register::<Note>().unwrap().register::<Note>();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[test]
    fn store_is_required() {
        let result = ManagerBuilder::new().register::<Note>().unwrap().build();
        assert!(matches!(result, Err(BuildError::MissingStore)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ManagerConfig {
            concurrency: 0,
            ..ManagerConfig::default_v1()
        };
        let result = ManagerBuilder::new()
            .store(MemoryStore::new())
            .config(config)
            .build();
        assert!(matches!(
            result,
            Err(BuildError::InvalidConfig(ConfigError::ZeroConcurrency))
        ));
    }
}
