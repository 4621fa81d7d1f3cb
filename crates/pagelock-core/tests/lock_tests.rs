use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pagelock_core::clock::{AnchoredClock, Clock};
use pagelock_core::lock::encode_timestamp;
use pagelock_core::memory::MemoryRemote;
use pagelock_core::{
    Credential, LockError, LockManager, LockRecord, LockSettings, LockUpdate, RemoteStore,
};
use tokio::time::{sleep, Instant};

const EPOCH_MS: u64 = 1_700_000_000_000;

fn remote() -> (Arc<MemoryRemote>, Credential) {
    let credential = Credential::new("d3b07384d113edec49eaa6238ad5ff00");
    (Arc::new(MemoryRemote::new(&credential)), credential)
}

fn manager(remote: &Arc<MemoryRemote>, credential: &Credential, clock: &AnchoredClock) -> LockManager {
    let shared: Arc<dyn RemoteStore> = remote.clone();
    LockManager::new(shared, credential.clone(), LockSettings::default())
        .with_clock(Arc::new(clock.clone()))
}

fn explode() {
    panic!("task failed");
}

#[tokio::test(start_paused = true)]
async fn uncontended_acquire_takes_one_confirmation() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);

    let started = Instant::now();
    let guard = locks.acquire().await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(2_500));
    assert!(waited < Duration::from_millis(3_000));

    let record = remote.lock_record();
    assert_eq!(record.holder, guard.requester().as_str());
    assert_eq!(record.timestamp, encode_timestamp(EPOCH_MS));

    guard.release().await;
    let record = remote.lock_record();
    assert!(record.is_unlocked());
    // release leaves the timestamp alone
    assert_eq!(record.timestamp, encode_timestamp(EPOCH_MS));
}

#[tokio::test(start_paused = true)]
async fn two_skewed_clients_never_overlap() {
    let (remote, cred) = remote();
    let base = AnchoredClock::new(EPOCH_MS);
    let a = manager(&remote, &cred, &base.skewed(2_000));
    let b = manager(&remote, &cred, &base.skewed(-2_000));

    let inside = Arc::new(AtomicBool::new(false));
    let entries = Arc::new(AtomicUsize::new(0));

    let client = |locks: LockManager| {
        let inside = inside.clone();
        let entries = entries.clone();
        async move {
            for _ in 0..2 {
                locks
                    .with_lock(async {
                        assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                        entries.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_secs(1)).await;
                        inside.store(false, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }
        }
    };

    tokio::join!(client(a), client(b));
    assert_eq!(entries.load(Ordering::SeqCst), 4);
    assert!(remote.lock_record().is_unlocked());
}

#[tokio::test(start_paused = true)]
async fn abandoned_lock_is_taken_over_after_staleness() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    remote.set_lock_record(LockRecord {
        holder: "crashed-client".into(),
        timestamp: encode_timestamp(clock.now_ms()),
    });
    let locks = manager(&remote, &cred, &clock);

    let started = Instant::now();
    let guard = locks.acquire().await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(10));
    assert!(waited < LockSettings::default().acquire_budget());
    assert_eq!(remote.lock_record().holder, guard.requester().as_str());
    guard.release().await;
}

#[tokio::test(start_paused = true)]
async fn unreadable_timestamp_counts_as_stale() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    remote.set_lock_record(LockRecord {
        holder: "someone".into(),
        timestamp: "garbage".into(),
    });
    let locks = manager(&remote, &cred, &clock);

    let started = Instant::now();
    let guard = locks.acquire().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    guard.release().await;
}

#[tokio::test(start_paused = true)]
async fn perpetual_rewrites_exhaust_the_budget() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);

    let intruder = {
        let remote = remote.clone();
        let cred = cred.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            for n in 0u64.. {
                let claim = LockUpdate::claim(&format!("intruder-{n}"), encode_timestamp(clock.now_ms()));
                let _ = remote.write_lock(&cred, &claim).await;
                sleep(Duration::from_millis(1_000)).await;
            }
        })
    };

    let ran = AtomicBool::new(false);
    let started = Instant::now();
    let result = locks
        .with_lock(async {
            ran.store(true, Ordering::SeqCst);
        })
        .await;
    intruder.abort();

    assert!(matches!(result, Err(LockError::Timeout { .. })));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn stalled_remote_times_out_every_request() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);
    remote.set_latency(Duration::from_secs(3));

    let started = Instant::now();
    let err = locks.acquire().await.unwrap_err();
    assert!(matches!(err, LockError::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(remote.lock_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);
    remote.fail_next(3);

    let started = Instant::now();
    let guard = locks.acquire().await.unwrap();
    // three failed reads, each followed by a backoff, then one full attempt
    assert!(started.elapsed() >= Duration::from_millis(10_000));
    assert_eq!(remote.lock_record().holder, guard.requester().as_str());
    guard.release().await;
}

#[tokio::test(start_paused = true)]
async fn claim_overwritten_during_confirmation_is_abandoned() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);

    let rival = {
        let remote = remote.clone();
        let cred = cred.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1_000)).await;
            let claim = LockUpdate::claim("rival", encode_timestamp(clock.now_ms()));
            remote.write_lock(&cred, &claim).await.unwrap();
        })
    };

    let started = Instant::now();
    let guard = locks.acquire().await.unwrap();
    rival.await.unwrap();
    // the rival's claim from t=1s must go stale before ours can win
    assert!(started.elapsed() >= Duration::from_secs(11));
    assert_eq!(remote.lock_record().holder, guard.requester().as_str());
    guard.release().await;
}

#[tokio::test(start_paused = true)]
async fn failed_task_still_releases() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);

    let result = locks.with_lock(async { Err::<(), &str>("boom") }).await.unwrap();
    assert_eq!(result, Err("boom"));
    assert!(remote.lock_record().is_unlocked());
}

#[tokio::test(start_paused = true)]
async fn panicking_task_still_releases() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);

    let handle = tokio::spawn(async move { locks.with_lock(async { explode() }).await });
    assert!(handle.await.unwrap_err().is_panic());

    sleep(Duration::from_millis(10)).await;
    assert!(remote.lock_record().is_unlocked());
    assert_eq!(remote.lock_writes(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_task_still_releases() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        locks.with_lock(sleep(Duration::from_secs(60))),
    )
    .await;
    assert!(outcome.is_err());

    sleep(Duration::from_millis(10)).await;
    assert!(remote.lock_record().is_unlocked());
}

#[tokio::test(start_paused = true)]
async fn cancelled_acquire_clears_its_claim() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let a = manager(&remote, &cred, &clock);
    let b = manager(&remote, &cred, &clock);

    // cut off during the confirmation delay, after the claim was written
    let outcome = tokio::time::timeout(Duration::from_secs(1), a.with_lock(async {})).await;
    assert!(outcome.is_err());
    assert_eq!(remote.lock_writes(), 1);

    sleep(Duration::from_millis(10)).await;
    assert!(remote.lock_record().is_unlocked());

    let started = Instant::now();
    let guard = b.acquire().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    guard.release().await;
}

#[tokio::test(start_paused = true)]
async fn lost_claim_leaves_the_winner_alone() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);

    let rival = {
        let remote = remote.clone();
        let cred = cred.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1_000)).await;
            let claim = LockUpdate::claim("rival", encode_timestamp(clock.now_ms()));
            remote.write_lock(&cred, &claim).await.unwrap();
        })
    };

    // stop after the lost confirmation but before the next attempt writes
    let outcome = tokio::time::timeout(Duration::from_secs(4), locks.acquire()).await;
    assert!(outcome.is_err());
    rival.await.unwrap();

    sleep(Duration::from_millis(10)).await;
    assert_eq!(remote.lock_record().holder, "rival");
    assert_eq!(remote.lock_writes(), 2);
}

#[tokio::test(start_paused = true)]
async fn guard_debug_hides_the_credential() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    let locks = manager(&remote, &cred, &clock);

    let guard = locks.acquire().await.unwrap();
    let shown = format!("{guard:?}");
    assert!(shown.contains(guard.requester().as_str()));
    assert!(!shown.contains(cred.expose()));
    guard.release().await;
}

#[tokio::test(start_paused = true)]
async fn release_without_guard_clears_holder() {
    let (remote, cred) = remote();
    let clock = AnchoredClock::new(EPOCH_MS);
    remote.set_lock_record(LockRecord {
        holder: "stuck".into(),
        timestamp: encode_timestamp(clock.now_ms()),
    });
    let locks = manager(&remote, &cred, &clock);
    locks.release().await;
    assert!(remote.lock_record().is_unlocked());
}
