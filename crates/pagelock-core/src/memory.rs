//! In-process [`RemoteStore`] used by tests and offline runs.
//!
//! Supports injected latency and a budget of failing calls so lock races and
//! transient errors can be reproduced deterministically under a paused tokio
//! clock.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::RemoteError;
use crate::remote::{Credential, LockRecord, LockUpdate, RemoteResult, RemoteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    lock: LockRecord,
    documents: HashMap<String, StoredDocument>,
    next_page: u64,
    latency: Duration,
    failures_left: u32,
    lock_writes: u64,
    document_writes: u64,
}

#[derive(Debug)]
pub struct MemoryRemote {
    token: String,
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new(credential: &Credential) -> Self {
        Self {
            token: credential.expose().to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Delay applied to every subsequent call.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Make the next `count` calls fail with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures_left = count;
    }

    pub fn lock_record(&self) -> LockRecord {
        self.state.lock().lock.clone()
    }

    pub fn set_lock_record(&self, record: LockRecord) {
        self.state.lock().lock = record;
    }

    pub fn lock_writes(&self) -> u64 {
        self.state.lock().lock_writes
    }

    /// Creates and overwrites of documents so far.
    pub fn document_writes(&self) -> u64 {
        self.state.lock().document_writes
    }

    pub fn document(&self, path: &str) -> Option<StoredDocument> {
        self.state.lock().documents.get(path).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.state.lock().documents.len()
    }

    /// Seed a document at a caller-chosen path.
    pub fn put_document(&self, path: &str, title: &str, content: &str) {
        self.state.lock().documents.insert(
            path.to_string(),
            StoredDocument {
                title: title.to_string(),
                content: content.to_string(),
            },
        );
    }

    async fn enter(&self, credential: &Credential) -> RemoteResult<()> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if credential.expose() != self.token {
            return Err(RemoteError::Rejected("ACCESS_TOKEN_INVALID".into()));
        }
        let mut state = self.state.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(RemoteError::Transport("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn read_lock(&self, credential: &Credential) -> RemoteResult<LockRecord> {
        self.enter(credential).await?;
        Ok(self.state.lock().lock.clone())
    }

    async fn write_lock(&self, credential: &Credential, update: &LockUpdate) -> RemoteResult<()> {
        self.enter(credential).await?;
        let mut state = self.state.lock();
        if let Some(holder) = &update.holder {
            state.lock.holder = holder.clone();
        }
        if let Some(timestamp) = &update.timestamp {
            state.lock.timestamp = timestamp.clone();
        }
        state.lock_writes += 1;
        Ok(())
    }

    async fn create_document(
        &self,
        credential: &Credential,
        title: &str,
        content: &str,
    ) -> RemoteResult<String> {
        self.enter(credential).await?;
        let mut state = self.state.lock();
        state.next_page += 1;
        let path = format!("{}-{:04}", slug(title), state.next_page);
        state.documents.insert(
            path.clone(),
            StoredDocument {
                title: title.to_string(),
                content: content.to_string(),
            },
        );
        state.document_writes += 1;
        Ok(path)
    }

    async fn read_document(&self, credential: &Credential, path: &str) -> RemoteResult<String> {
        self.enter(credential).await?;
        self.state
            .lock()
            .documents
            .get(path)
            .map(|doc| doc.content.clone())
            .ok_or(RemoteError::NotFound)
    }

    async fn overwrite_document(
        &self,
        credential: &Credential,
        path: &str,
        title: &str,
        content: &str,
    ) -> RemoteResult<()> {
        self.enter(credential).await?;
        let mut state = self.state.lock();
        let doc = state.documents.get_mut(path).ok_or(RemoteError::NotFound)?;
        doc.title = title.to_string();
        doc.content = content.to_string();
        state.document_writes += 1;
        Ok(())
    }
}

fn slug(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if slug.is_empty() {
        "page".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn documents_get_distinct_paths() {
        let cred = Credential::new("tok");
        let remote = MemoryRemote::new(&cred);
        let a = remote.create_document(&cred, "same", "1").await.unwrap();
        let b = remote.create_document(&cred, "same", "2").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(remote.read_document(&cred, &a).await.unwrap(), "1");
        assert_eq!(
            remote.read_document(&cred, "missing").await,
            Err(RemoteError::NotFound)
        );
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let remote = MemoryRemote::new(&Credential::new("tok"));
        let err = remote.read_lock(&Credential::new("other")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn partial_lock_update_keeps_other_field() {
        let cred = Credential::new("tok");
        let remote = MemoryRemote::new(&cred);
        remote
            .write_lock(&cred, &LockUpdate::claim("me", "0a".into()))
            .await
            .unwrap();
        remote.write_lock(&cred, &LockUpdate::clear()).await.unwrap();
        let record = remote.lock_record();
        assert!(record.is_unlocked());
        assert_eq!(record.timestamp, "0a");
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let cred = Credential::new("tok");
        let remote = MemoryRemote::new(&cred);
        remote.fail_next(2);
        assert!(remote.read_lock(&cred).await.is_err());
        assert!(remote.read_lock(&cred).await.is_err());
        assert!(remote.read_lock(&cred).await.is_ok());
    }
}
