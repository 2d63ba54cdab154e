//! Per-host politeness gate.
//!
//! One async mutex per host serializes in-flight requests; the slot
//! remembers when the previous fetch finished so the next caller waits
//! out `request_delay` plus up to one second of jitter before starting.

use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct HostSlot {
    last_done: Option<Instant>,
}

/// Held for the duration of one fetch to a host. Dropping it stamps the
/// completion time the next caller's delay is measured from.
pub struct HostPermit {
    guard: OwnedMutexGuard<HostSlot>,
}

impl Drop for HostPermit {
    fn drop(&mut self) {
        self.guard.last_done = Some(Instant::now());
    }
}

/// Gate shared by all workers.
pub struct HostGate {
    delay: Duration,
    jitter_cap: Duration,
    slots: StdMutex<HashMap<String, Arc<Mutex<HostSlot>>>>,
    jitter_state: RandomState,
    jitter_seq: AtomicU64,
}

impl HostGate {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter_cap: Duration::from_secs(1),
            slots: StdMutex::new(HashMap::new()),
            jitter_state: RandomState::new(),
            jitter_seq: AtomicU64::new(0),
        }
    }

    /// Gate with no jitter, for timing-sensitive tests.
    pub fn without_jitter(delay: Duration) -> Self {
        let mut gate = Self::new(delay);
        gate.jitter_cap = Duration::ZERO;
        gate
    }

    /// Uniform-ish jitter in `0..=jitter_cap`, varying per call.
    fn jitter(&self, host: &str) -> Duration {
        if self.jitter_cap.is_zero() {
            return Duration::ZERO;
        }
        let mut hasher = self.jitter_state.build_hasher();
        host.hash(&mut hasher);
        self.jitter_seq.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
        let millis = hasher.finish() % (self.jitter_cap.as_millis() as u64 + 1);
        Duration::from_millis(millis)
    }

    fn slot_for(&self, host: &str) -> Arc<Mutex<HostSlot>> {
        let mut slots = self.slots.lock().expect("host gate poisoned");
        slots
            .entry(host.to_ascii_lowercase())
            .or_insert_with(|| Arc::new(Mutex::new(HostSlot::default())))
            .clone()
    }

    /// Wait until this host may be fetched again, then hold the slot
    /// until the permit is dropped. No two permits for one host coexist.
    pub async fn acquire(&self, host: &str) -> HostPermit {
        let slot = self.slot_for(host);
        let guard = slot.lock_owned().await;
        if let Some(last_done) = guard.last_done {
            let ready_at = last_done + self.delay + self.jitter(host);
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        HostPermit { guard }
    }
}
