use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing budgets of the remote lock protocol, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Max wait for one remote read or write before it counts as failed.
    pub request_budget_ms: u64,
    /// Backoff between attempts and settle time before the confirming read.
    pub confirm_delay_ms: u64,
    /// Age after which a held lock is presumed abandoned.
    pub stale_after_ms: u64,
    /// Total budget for one `acquire`.
    pub acquire_budget_ms: u64,
}

impl LockSettings {
    pub fn request_budget(&self) -> Duration {
        Duration::from_millis(self.request_budget_ms)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn acquire_budget(&self) -> Duration {
        Duration::from_millis(self.acquire_budget_ms)
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            request_budget_ms: 2_000,
            confirm_delay_ms: 2_500,
            stale_after_ms: 10_000,
            acquire_budget_ms: 30_000,
        }
    }
}
