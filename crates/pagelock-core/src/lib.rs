//! pagelock-core: an encrypted key-value store on top of a remote document
//! service that has no locking primitives of its own.
//!
//! # Module layout
//! - `remote`   - contract consumed from the remote service
//! - `lock`     - best-effort mutex over the account's two scalar fields
//! - `crypto`   - document encryption and transport encoding
//! - `store`    - index-addressed encrypted items
//! - `db`       - store facade that runs every operation under the lock
//! - `memory`   - in-process remote for tests and offline use
//! - `clock`    - wall-clock sources for lock timestamps
//! - `settings` - lock timing budgets
//! - `error`    - error types

pub mod clock;
pub mod crypto;
pub mod db;
pub mod error;
pub mod lock;
pub mod memory;
pub mod remote;
pub mod settings;
pub mod store;

pub use db::Database;
pub use error::{CodecError, LockError, RemoteError, StoreError};
pub use lock::{LockGuard, LockManager};
pub use remote::{Credential, LockRecord, LockUpdate, RemoteStore};
pub use settings::LockSettings;
pub use store::DocumentStore;
