//! Locked facade over [`DocumentStore`].
//!
//! Every operation takes the remote lock and reloads the index before touching
//! it, so decisions about duplicate or unknown titles are made against the
//! authoritative index rather than a stale in-memory copy.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::{LockError, StoreError};
use crate::lock::LockManager;
use crate::remote::{Credential, RemoteStore};
use crate::settings::LockSettings;
use crate::store::DocumentStore;

pub struct Database {
    lock: LockManager,
    store: DocumentStore,
}

impl Database {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        credential: Credential,
        index_path: impl Into<String>,
        settings: LockSettings,
    ) -> Self {
        Self {
            lock: LockManager::new(remote.clone(), credential.clone(), settings),
            store: DocumentStore::new(remote, credential, index_path),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.lock = self.lock.with_clock(clock);
        self
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Run an arbitrary sequence against the store under the lock. The index is
    /// not reloaded automatically.
    pub async fn with_lock<'a, F, Fut, T>(&'a mut self, task: F) -> Result<T, LockError>
    where
        F: FnOnce(&'a mut DocumentStore) -> Fut,
        Fut: Future<Output = T> + 'a,
    {
        let store = &mut self.store;
        self.lock.with_lock(async move { task(store).await }).await
    }

    /// Create `title` unless it already exists. `Ok(None)` on duplicate.
    pub async fn insert<T: Serialize + ?Sized>(
        &mut self,
        title: &str,
        value: &T,
    ) -> Result<Option<String>, StoreError> {
        let store = &mut self.store;
        self.lock
            .with_lock(async {
                store.load_index().await?;
                let created = store.create_item(title, value).await?;
                if created.is_some() {
                    store.save_index().await?;
                }
                Ok::<_, StoreError>(created)
            })
            .await?
    }

    /// Overwrite `title`. `Ok(false)` when it does not exist.
    pub async fn update<T: Serialize + ?Sized>(
        &mut self,
        title: &str,
        value: &T,
    ) -> Result<bool, StoreError> {
        let store = &mut self.store;
        self.lock
            .with_lock(async {
                store.load_index().await?;
                store.update_item(title, value).await
            })
            .await?
    }

    /// Create or overwrite `title`. Returns `true` when the item was created.
    pub async fn upsert<T: Serialize + ?Sized>(
        &mut self,
        title: &str,
        value: &T,
    ) -> Result<bool, StoreError> {
        let store = &mut self.store;
        self.lock
            .with_lock(async {
                store.load_index().await?;
                if store.update_item(title, value).await? {
                    return Ok::<_, StoreError>(false);
                }
                store.create_item(title, value).await?;
                store.save_index().await?;
                Ok(true)
            })
            .await?
    }

    pub async fn fetch<T: DeserializeOwned>(&mut self, title: &str) -> Result<Option<T>, StoreError> {
        let store = &mut self.store;
        self.lock
            .with_lock(async {
                store.load_index().await?;
                store.get_item::<T>(title).await
            })
            .await?
    }

    pub async fn titles(&mut self) -> Result<Vec<String>, StoreError> {
        let store = &mut self.store;
        self.lock
            .with_lock(async {
                store.load_index().await?;
                Ok::<_, StoreError>(store.item_titles())
            })
            .await?
    }
}
