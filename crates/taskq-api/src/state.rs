//! Application state
//!
//! Centralizes the registry, stores and processor shared across handlers.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use taskq_core::Registry;
use taskq_engine::{LockManager, Processor};
use taskq_store::TaskStore;

/// Shared state for the trigger and management handlers.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
    store: Arc<dyn TaskStore>,
    locks: LockManager,
    processor: Arc<Processor>,
    secret: Option<String>,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn TaskStore>,
        locks: LockManager,
        processor: Arc<Processor>,
        secret: Option<String>,
    ) -> Self {
        Self {
            registry,
            store,
            locks,
            processor,
            secret,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Constant-time comparison against the configured shared secret.
    /// Fails when no secret is configured at all.
    pub fn verify_secret(&self, provided: &str) -> bool {
        match &self.secret {
            Some(secret) => secret.as_bytes().ct_eq(provided.as_bytes()).into(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskq_store::{MemoryLockStore, MemoryTaskStore};

    fn state(secret: Option<&str>) -> AppState {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(MemoryTaskStore::new());
        let locks = LockManager::new(Arc::new(MemoryLockStore::new()));
        let processor = Arc::new(Processor::new(
            registry.clone(),
            store.clone(),
            locks.clone(),
        ));
        AppState::new(
            registry,
            store,
            locks,
            processor,
            secret.map(String::from),
        )
    }

    #[test]
    fn secret_verification() {
        let s = state(Some("hunter2"));
        assert!(s.verify_secret("hunter2"));
        assert!(!s.verify_secret("hunter3"));
        assert!(!s.verify_secret(""));
    }

    #[test]
    fn missing_secret_rejects_everything() {
        let s = state(None);
        assert!(!s.verify_secret(""));
        assert!(!s.verify_secret("anything"));
    }
}
