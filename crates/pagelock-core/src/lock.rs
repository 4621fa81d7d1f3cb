//! Best-effort mutual exclusion over the remote account's two scalar fields.
//!
//! The remote offers no compare-and-swap, so acquisition is optimistic: read the
//! lock record, write a claim when it is free or stale, wait for competing writes
//! to settle, then read again and keep the lock only if the claim survived.
//! Two requesters whose claims interleave within the confirmation delay can
//! both pass; the protocol accepts that window.

use std::future::Future;
use std::sync::Arc;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{LockError, RemoteError};
use crate::remote::{Credential, LockRecord, LockUpdate, RemoteResult, RemoteStore};
use crate::settings::LockSettings;

/// Width of the hexadecimal timestamp written to the remote field.
pub const TIMESTAMP_WIDTH: usize = 16;

pub fn encode_timestamp(ms: u64) -> String {
    format!("{ms:0width$x}", width = TIMESTAMP_WIDTH)
}

pub fn decode_timestamp(raw: &str) -> Option<u64> {
    u64::from_str_radix(raw.trim(), 16).ok()
}

/// Token identifying one `acquire` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequesterId(String);

impl RequesterId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequesterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
enum AttemptFailure {
    Read(RemoteError),
    Held { holder: String, age_ms: u64 },
    Write(RemoteError),
    Confirm(RemoteError),
    Lost { winner: String },
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(err) => write!(f, "lock read failed: {err}"),
            Self::Held { holder, age_ms } => write!(f, "held by {holder} for {age_ms} ms"),
            Self::Write(err) => write!(f, "claim write failed: {err}"),
            Self::Confirm(err) => write!(f, "confirming read failed: {err}"),
            Self::Lost { winner } => write!(f, "claim overwritten by {winner}"),
        }
    }
}

#[derive(Clone)]
pub struct LockManager {
    remote: Arc<dyn RemoteStore>,
    credential: Credential,
    settings: LockSettings,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(remote: Arc<dyn RemoteStore>, credential: Credential, settings: LockSettings) -> Self {
        Self {
            remote,
            credential,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Block until this client holds the lock or the acquire budget runs out.
    pub async fn acquire(&self) -> Result<LockGuard, LockError> {
        let started = Instant::now();
        let budget = self.settings.acquire_budget();
        let requester = RequesterId::generate();
        let mut attempt: u32 = 0;

        loop {
            if started.elapsed() >= budget {
                warn!(
                    requester = %requester,
                    attempts = attempt,
                    "giving up on remote lock"
                );
                return Err(LockError::Timeout {
                    waited: started.elapsed(),
                });
            }
            attempt += 1;
            match self.try_claim(&requester).await {
                Ok(guard) => {
                    info!(
                        requester = %requester,
                        attempts = attempt,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "remote lock acquired"
                    );
                    return Ok(guard);
                }
                Err(reason) => {
                    debug!(requester = %requester, attempt, reason = %reason, "lock attempt failed");
                }
            }
            sleep(self.settings.confirm_delay()).await;
        }
    }

    /// Clear the holder field. Failures are logged, never retried.
    pub async fn release(&self) {
        clear_holder(self.remote.as_ref(), &self.credential).await;
    }

    /// Run `task` while holding the lock.
    ///
    /// Release is attempted on every exit from the task: normal completion,
    /// panic, or the returned future being dropped mid-task. `task` is never
    /// polled if acquisition fails.
    pub async fn with_lock<F, T>(&self, task: F) -> Result<T, LockError>
    where
        F: Future<Output = T>,
    {
        let guard = self.acquire().await?;
        let output = task.await;
        guard.release().await;
        Ok(output)
    }

    /// One read, claim, settle, confirm round. Once the claim is written an
    /// armed guard exists, so dropping this future mid-confirmation still
    /// clears the holder.
    async fn try_claim(&self, requester: &RequesterId) -> Result<LockGuard, AttemptFailure> {
        let record = self
            .bounded(self.remote.read_lock(&self.credential))
            .await
            .map_err(AttemptFailure::Read)?;
        if let Some(age_ms) = self.live_foreign_claim(&record, requester) {
            return Err(AttemptFailure::Held {
                holder: record.holder,
                age_ms,
            });
        }

        let claim = LockUpdate::claim(requester.as_str(), encode_timestamp(self.clock.now_ms()));
        self.bounded(self.remote.write_lock(&self.credential, &claim))
            .await
            .map_err(AttemptFailure::Write)?;
        let guard = LockGuard {
            remote: self.remote.clone(),
            credential: self.credential.clone(),
            requester: requester.clone(),
            armed: true,
        };

        sleep(self.settings.confirm_delay()).await;

        // The next attempt decides what to do with a claim we could not
        // confirm, and a lost claim belongs to the winner now.
        let record = match self.bounded(self.remote.read_lock(&self.credential)).await {
            Ok(record) => record,
            Err(err) => {
                guard.disarm();
                return Err(AttemptFailure::Confirm(err));
            }
        };
        if record.holder != requester.as_str() {
            guard.disarm();
            return Err(AttemptFailure::Lost {
                winner: record.holder,
            });
        }
        Ok(guard)
    }

    /// Age of the record's claim when it belongs to someone else and is not
    /// yet stale.
    fn live_foreign_claim(&self, record: &LockRecord, requester: &RequesterId) -> Option<u64> {
        if record.is_unlocked() || record.holder == requester.as_str() {
            return None;
        }
        // An unreadable timestamp counts as infinitely old.
        let claimed_at = decode_timestamp(&record.timestamp)?;
        let age_ms = self.clock.now_ms().saturating_sub(claimed_at);
        (age_ms < self.settings.stale_after_ms).then_some(age_ms)
    }

    async fn bounded<T>(&self, call: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        match timeout(self.settings.request_budget(), call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }
}

/// Proof of a successful `acquire`.
///
/// Dropping an unreleased guard schedules the release on the current tokio
/// runtime.
#[must_use = "dropping the guard releases the lock in the background"]
pub struct LockGuard {
    remote: Arc<dyn RemoteStore>,
    credential: Credential,
    requester: RequesterId,
    armed: bool,
}

impl LockGuard {
    pub fn requester(&self) -> &RequesterId {
        &self.requester
    }

    pub async fn release(mut self) {
        self.armed = false;
        clear_holder(self.remote.as_ref(), &self.credential).await;
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("requester", &self.requester)
            .finish_non_exhaustive()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let remote = self.remote.clone();
                let credential = self.credential.clone();
                handle.spawn(async move {
                    clear_holder(remote.as_ref(), &credential).await;
                });
            }
            Err(_) => warn!(
                requester = %self.requester,
                "lock guard dropped outside a runtime; lock expires after the staleness threshold"
            ),
        }
    }
}

async fn clear_holder(remote: &dyn RemoteStore, credential: &Credential) {
    match remote.write_lock(credential, &LockUpdate::clear()).await {
        Ok(()) => debug!("remote lock released"),
        Err(err) => warn!(error = %err, "remote lock release failed"),
    }
}
