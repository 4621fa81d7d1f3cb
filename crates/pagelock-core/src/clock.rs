use chrono::Utc;
use tokio::time::Instant;

/// Wall-clock source for lock timestamps, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Epoch time anchored once and then advanced by the tokio clock.
///
/// Follows `tokio::time::pause`/`advance`, so timestamps stay consistent with
/// the lock's sleeps under a paused runtime. `offset_ms` shifts the reading to
/// model a skewed peer.
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    anchor_ms: u64,
    origin: Instant,
}

impl AnchoredClock {
    pub fn new(anchor_ms: u64) -> Self {
        Self {
            anchor_ms,
            origin: Instant::now(),
        }
    }

    pub fn from_system() -> Self {
        Self::new(SystemClock.now_ms())
    }

    pub fn skewed(&self, offset_ms: i64) -> Self {
        Self {
            anchor_ms: self.anchor_ms.saturating_add_signed(offset_ms),
            origin: self.origin,
        }
    }
}

impl Clock for AnchoredClock {
    fn now_ms(&self) -> u64 {
        self.anchor_ms + self.origin.elapsed().as_millis() as u64
    }
}
