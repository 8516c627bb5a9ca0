use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use tether_core::CredentialSet;

use crate::durable::DurableStore;
use crate::error::DurableStoreError;

/// In-process durable store. Counts calls and can be told to fail, for
/// exercising the synchronizer without a network.
#[derive(Default)]
pub struct MemoryDurableStore {
    stored: Mutex<Option<CredentialSet>>,
    failing: AtomicBool,
    saves: AtomicUsize,
    fetches: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(set: CredentialSet) -> Self {
        let store = Self::default();
        *store.stored.lock() = Some(set);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Option<CredentialSet> {
        self.stored.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), DurableStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DurableStoreError::Http("store unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn save(&self, credentials: &CredentialSet) -> Result<(), DurableStoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        *self.stored.lock() = Some(credentials.clone());
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<CredentialSet>, DurableStoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.stored.lock().clone())
    }

    async fn delete(&self) -> Result<(), DurableStoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        *self.stored.lock() = None;
        Ok(())
    }
}
