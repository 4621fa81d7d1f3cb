//! Encrypted key-value items addressed through a remote index document.
//!
//! The index maps item titles to server-assigned document paths and is itself an
//! encrypted document at a fixed path. It is held in memory and only refreshed by
//! [`DocumentStore::load_index`]; the store never locks. Callers wrap
//! load/mutate/save sequences in [`crate::lock::LockManager::with_lock`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{decrypt_document, encrypt_document, DocumentKey};
use crate::error::{RemoteError, StoreError};
use crate::remote::{Credential, RemoteStore};

pub const INDEX_TITLE: &str = "__index__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub title: String,
    pub path: String,
}

/// Persisted form of the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub index: Vec<IndexEntry>,
}

impl IndexDocument {
    pub fn from_entries(entries: &[IndexEntry]) -> Self {
        Self {
            count: entries.len(),
            index: entries.to_vec(),
        }
    }
}

pub struct DocumentStore {
    remote: Arc<dyn RemoteStore>,
    credential: Credential,
    key: DocumentKey,
    index_path: String,
    index: Vec<IndexEntry>,
}

impl DocumentStore {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        credential: Credential,
        index_path: impl Into<String>,
    ) -> Self {
        let key = DocumentKey::derive(credential.expose());
        Self {
            remote,
            credential,
            key,
            index_path: index_path.into(),
            index: Vec::new(),
        }
    }

    /// Create an empty index document and return its path.
    pub async fn create_index(
        remote: &dyn RemoteStore,
        credential: &Credential,
    ) -> Result<String, StoreError> {
        let key = DocumentKey::derive(credential.expose());
        let wire = encode(&key, &IndexDocument::default())?;
        let path = remote.create_document(credential, INDEX_TITLE, &wire).await?;
        info!(path = %path, "index document created");
        Ok(path)
    }

    pub fn index_path(&self) -> &str {
        &self.index_path
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn path_of(&self, title: &str) -> Option<&str> {
        self.index
            .iter()
            .find(|entry| entry.title == title)
            .map(|entry| entry.path.as_str())
    }

    /// Replace the in-memory index with the remote copy.
    ///
    /// A missing or undecodable index document yields an empty index. Transient
    /// failures are returned and leave the in-memory index as it was.
    pub async fn load_index(&mut self) -> Result<(), StoreError> {
        let loaded = match self
            .remote
            .read_document(&self.credential, &self.index_path)
            .await
        {
            Ok(wire) => match decode::<IndexDocument>(&self.key, &wire) {
                Ok(doc) => doc.index,
                Err(err) => {
                    warn!(path = %self.index_path, error = %err, "index document unreadable; starting empty");
                    Vec::new()
                }
            },
            Err(RemoteError::NotFound) => {
                warn!(path = %self.index_path, "index document missing; starting empty");
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };
        self.index = loaded;
        debug!(entries = self.index.len(), "index loaded");
        Ok(())
    }

    pub async fn save_index(&self) -> Result<(), StoreError> {
        let wire = encode(&self.key, &IndexDocument::from_entries(&self.index))?;
        self.remote
            .overwrite_document(&self.credential, &self.index_path, INDEX_TITLE, &wire)
            .await?;
        debug!(entries = self.index.len(), "index saved");
        Ok(())
    }

    /// `Ok(None)` when `title` is not indexed or its document has disappeared.
    pub async fn get_item<T: DeserializeOwned>(&self, title: &str) -> Result<Option<T>, StoreError> {
        let Some(path) = self.path_of(title) else {
            return Ok(None);
        };
        match self.remote.read_document(&self.credential, path).await {
            Ok(wire) => Ok(Some(decode(&self.key, &wire)?)),
            Err(RemoteError::NotFound) => {
                warn!(title, path, "indexed document missing");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Store a new item. Returns `Ok(None)` without any remote call when the
    /// title is already indexed. The index is not saved.
    pub async fn create_item<T: Serialize + ?Sized>(
        &mut self,
        title: &str,
        value: &T,
    ) -> Result<Option<String>, StoreError> {
        if self.path_of(title).is_some() {
            debug!(title, "duplicate title rejected");
            return Ok(None);
        }
        let wire = encode(&self.key, value)?;
        let path = self
            .remote
            .create_document(&self.credential, title, &wire)
            .await?;
        debug!(title, path = %path, "item created");
        self.index.push(IndexEntry {
            title: title.to_string(),
            path,
        });
        Ok(Some(title.to_string()))
    }

    /// Overwrite an existing item. Returns `Ok(false)` without any remote call
    /// when the title is not indexed.
    pub async fn update_item<T: Serialize + ?Sized>(
        &self,
        title: &str,
        value: &T,
    ) -> Result<bool, StoreError> {
        let Some(path) = self.path_of(title) else {
            return Ok(false);
        };
        let wire = encode(&self.key, value)?;
        self.remote
            .overwrite_document(&self.credential, path, title, &wire)
            .await?;
        debug!(title, path, "item updated");
        Ok(true)
    }

    pub fn item_titles(&self) -> Vec<String> {
        self.index.iter().map(|entry| entry.title.clone()).collect()
    }
}

fn encode<T: Serialize + ?Sized>(key: &DocumentKey, value: &T) -> Result<String, StoreError> {
    let json = Zeroizing::new(serde_json::to_vec(value)?);
    Ok(encrypt_document(key, &json)?)
}

fn decode<T: DeserializeOwned>(key: &DocumentKey, wire: &str) -> Result<T, StoreError> {
    let plaintext = decrypt_document(key, wire)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_document_layout() {
        let entries = vec![
            IndexEntry {
                title: "a".into(),
                path: "a-0001".into(),
            },
            IndexEntry {
                title: "b".into(),
                path: "b-0002".into(),
            },
        ];
        let json = serde_json::to_value(IndexDocument::from_entries(&entries)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "count": 2,
                "index": [
                    {"title": "a", "path": "a-0001"},
                    {"title": "b", "path": "b-0002"}
                ]
            })
        );
    }

    #[test]
    fn index_document_tolerates_missing_fields() {
        let doc: IndexDocument = serde_json::from_str("{}").unwrap();
        assert!(doc.index.is_empty());
        let doc: IndexDocument =
            serde_json::from_str(r#"{"index":[{"title":"x","path":"x-1"}]}"#).unwrap();
        assert_eq!(doc.index.len(), 1);
    }
}
