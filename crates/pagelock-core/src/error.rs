use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("document encryption failed")]
    Encrypt,

    #[error("document decryption failed (wrong credential or tampered content)")]
    Decrypt,

    #[error("document too short for nonce prefix ({0} bytes)")]
    Truncated(usize),

    #[error("transport decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Failure of a single remote call. Every variant is treated as transient by
/// the lock protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote object not found")]
    NotFound,

    #[error("remote call exceeded its budget")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("could not acquire remote lock within {waited:?}")]
    Timeout { waited: Duration },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("document corrupted: {0}")]
    Corrupt(#[from] CodecError),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Remote(_))
    }
}
