//! [`pagelock_core::RemoteStore`] over the telegra.ph page API.
//!
//! The account's `author_name` carries the lock holder and `short_name` the
//! claim timestamp. Each document is a page whose body is one `code` node.

mod api_client;

pub use api_client::{
    document_nodes, extract_document, lock_params, parse_lock_record, unwrap_envelope, ApiClient,
    DEFAULT_BASE_URL, HOLDER_FIELD, TIMESTAMP_FIELD,
};
