//! Contract consumed from the remote document service.
//!
//! The service exposes one account with two mutable scalar fields (used as the
//! lock record) and a set of text documents addressed by server-assigned paths.
//! Nothing here is transactional.

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::RemoteError;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Secret scoping every call to one remote account. Also the sole input of the
/// document key derivation.
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Snapshot of the account's two coordination fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockRecord {
    /// Identity of the current claimant, empty when unlocked.
    pub holder: String,
    /// Encoded acquisition time, see [`crate::lock::encode_timestamp`].
    pub timestamp: String,
}

impl LockRecord {
    pub fn is_unlocked(&self) -> bool {
        self.holder.is_empty()
    }
}

/// Fields to overwrite on the lock record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockUpdate {
    pub holder: Option<String>,
    pub timestamp: Option<String>,
}

impl LockUpdate {
    pub fn claim(holder: &str, timestamp: String) -> Self {
        Self {
            holder: Some(holder.to_string()),
            timestamp: Some(timestamp),
        }
    }

    pub fn clear() -> Self {
        Self {
            holder: Some(String::new()),
            timestamp: None,
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn read_lock(&self, credential: &Credential) -> RemoteResult<LockRecord>;

    async fn write_lock(&self, credential: &Credential, update: &LockUpdate) -> RemoteResult<()>;

    /// Create a document and return its server-assigned path.
    async fn create_document(
        &self,
        credential: &Credential,
        title: &str,
        content: &str,
    ) -> RemoteResult<String>;

    async fn read_document(&self, credential: &Credential, path: &str) -> RemoteResult<String>;

    async fn overwrite_document(
        &self,
        credential: &Credential,
        path: &str,
        title: &str,
        content: &str,
    ) -> RemoteResult<()>;
}
