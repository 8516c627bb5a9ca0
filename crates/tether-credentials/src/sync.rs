//! Hybrid credential persistence.
//!
//! The local cache is authoritative for every read after startup and is
//! written synchronously. The durable store is a recovery copy: it is read
//! only when the local cache is empty, and written in the background.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::{CredentialDelta, CredentialSet};
use tether_store::{CredentialCache, StoreError};

use crate::durable::DurableStore;
use crate::error::{DurableStoreError, SyncError};

struct Inner {
    cache: CredentialCache,
    durable: Option<Arc<dyn DurableStore>>,
    push_signal: Notify,
    push_lock: AsyncMutex<()>,
    dirty: AtomicU64,
    pushed: AtomicU64,
}

#[derive(Clone)]
pub struct CredentialSync {
    inner: Arc<Inner>,
}

impl CredentialSync {
    pub fn new(cache: CredentialCache, durable: Option<Arc<dyn DurableStore>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                durable,
                push_signal: Notify::new(),
                push_lock: AsyncMutex::new(()),
                dirty: AtomicU64::new(0),
                pushed: AtomicU64::new(0),
            }),
        }
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.inner.cache
    }

    pub fn has_durable_store(&self) -> bool {
        self.inner.durable.is_some()
    }

    /// Load credentials for a connect attempt.
    ///
    /// A populated local cache is returned as-is without touching the
    /// durable store. An empty one is restored from the durable copy when
    /// there is one. Durable failures degrade to an empty set so a fresh
    /// pairing can proceed; only a local read failure is returned.
    pub async fn load_or_restore(&self) -> Result<CredentialSet, StoreError> {
        let local = self.inner.cache.load()?;
        if !local.is_empty() {
            debug!(slots = local.len(), "using local credential cache");
            return Ok(local);
        }
        let Some(durable) = &self.inner.durable else {
            return Ok(local);
        };

        match durable.fetch().await {
            Ok(Some(restored)) => {
                if let Err(e) = self.inner.cache.replace_all(&restored) {
                    warn!(error = %e, "failed to write restored credentials to local cache");
                }
                info!(slots = restored.len(), "restored credentials from durable store");
                Ok(restored)
            }
            Ok(None) => {
                info!("no durable credentials, starting fresh");
                Ok(local)
            }
            Err(e) => {
                warn!(error = %e, "durable credential restore failed, starting fresh");
                Ok(local)
            }
        }
    }

    /// Apply a credential update to the local cache and schedule a
    /// background push. The local write completes before this returns.
    pub fn persist(&self, delta: &CredentialDelta) -> Result<(), StoreError> {
        if delta.is_empty() {
            return Ok(());
        }
        self.inner.cache.apply(delta)?;
        let _ = self.inner.dirty.fetch_add(1, Ordering::SeqCst);
        self.inner.push_signal.notify_one();
        Ok(())
    }

    /// Push the full current cache to the durable store now.
    pub async fn sync_now(&self) -> Result<(), SyncError> {
        let _ = self.push(true).await?;
        Ok(())
    }

    /// Drop credentials everywhere. Waits for any in-flight push so a
    /// stale save cannot land after the durable delete.
    pub async fn invalidate(&self) -> Result<(), StoreError> {
        let _guard = self.inner.push_lock.lock().await;
        let local = self.inner.cache.clear();
        self.inner
            .pushed
            .store(self.inner.dirty.load(Ordering::SeqCst), Ordering::SeqCst);

        if let Some(durable) = &self.inner.durable {
            if let Err(e) = durable.delete().await {
                warn!(error = %e, "failed to delete durable credentials");
            }
        }
        if local.is_ok() {
            info!("credentials invalidated");
        }
        local
    }

    /// Background worker draining push requests. Requests that arrive
    /// while a push is running collapse into a single follow-up push,
    /// which always reads the latest cache.
    pub fn spawn_push_worker(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let sync = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = sync.inner.push_signal.notified() => {
                        match sync.push(false).await {
                            Ok(true) => debug!("credentials pushed to durable store"),
                            Ok(false) => {}
                            Err(SyncError::Durable(DurableStoreError::Disabled)) => {}
                            Err(e) => warn!(error = %e, "background credential push failed"),
                        }
                    }
                }
            }
            debug!("credential push worker stopped");
        })
    }

    async fn push(&self, force: bool) -> Result<bool, SyncError> {
        let Some(durable) = &self.inner.durable else {
            return Err(DurableStoreError::Disabled.into());
        };
        let _guard = self.inner.push_lock.lock().await;
        let version = self.inner.dirty.load(Ordering::SeqCst);
        if !force && version == self.inner.pushed.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let set = self.inner.cache.load()?;
        if set.is_empty() {
            debug!("local cache empty, skipping durable push");
            return Ok(false);
        }
        durable.save(&set).await?;
        let _ = self.inner.pushed.fetch_max(version, Ordering::SeqCst);
        Ok(true)
    }
}
