//! Per-request decode state store
//!
//! Maps request ids to decode state values. The map is sharded (`DashMap`) and
//! every entry sits behind its own mutex: the shard lock is only held long
//! enough to fetch or create the entry, so decoding one request never blocks
//! another, while calls for the same request id are serialized.
//!
//! Ordering of calls for one request id (slice N before slice N+1) is the
//! caller's responsibility and is not detected here.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

struct Slot<S> {
    state: S,
    last_touched: Instant,
}

impl<S: Default> Slot<S> {
    fn new() -> Self {
        Self {
            state: S::default(),
            last_touched: Instant::now(),
        }
    }
}

impl<S> Slot<S> {
    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touched)
    }
}

/// Request id -> decode state
pub struct DecodeStateStore<S> {
    entries: DashMap<String, Arc<Mutex<Slot<S>>>>,
    created: AtomicU64,
    finalized: AtomicU64,
    expired: AtomicU64,
}

impl<S: Default> Default for DecodeStateStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Default> DecodeStateStore<S> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            created: AtomicU64::new(0),
            finalized: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Run `f` with exclusive access to the state of `request_id`, creating a
    /// fresh state first if the id is unknown.
    pub fn with_state<R>(&self, request_id: &str, f: impl FnOnce(&mut S) -> R) -> R {
        let slot = self.slot(request_id);
        let mut slot = slot.lock();
        slot.last_touched = Instant::now();
        f(&mut slot.state)
    }

    /// Fetch or create the entry; the shard lock is released on return.
    fn slot(&self, request_id: &str) -> Arc<Mutex<Slot<S>>> {
        if let Some(entry) = self.entries.get(request_id) {
            return Arc::clone(entry.value());
        }

        let entry = self
            .entries
            .entry(request_id.to_string())
            .or_insert_with(|| {
                self.created.fetch_add(1, Ordering::Relaxed);
                debug!(request_id, "Created decode state");
                Arc::new(Mutex::new(Slot::new()))
            });
        Arc::clone(entry.value())
    }

    /// Remove the state of `request_id` and hand it back by value.
    ///
    /// Waits for an in-flight call on the same id to finish first.
    pub fn remove(&self, request_id: &str) -> Option<S> {
        let (_, slot) = self.entries.remove(request_id)?;
        self.finalized.fetch_add(1, Ordering::Relaxed);
        let mut slot = slot.lock();
        Some(std::mem::take(&mut slot.state))
    }

    /// Drop every state untouched for at least `ttl`; returns the evicted ids.
    ///
    /// Entries held by an in-flight call, whether already locked or only
    /// fetched, are never considered idle.
    pub fn evict_idle(&self, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        // The map owns one reference; any other holder is a caller between
        // `slot()` and taking the entry lock.
        let is_idle = |slot: &Arc<Mutex<Slot<S>>>| {
            Arc::strong_count(slot) == 1
                && slot
                    .try_lock()
                    .is_some_and(|slot| slot.idle_for(now) >= ttl)
        };

        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| is_idle(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        // Re-check under the shard write lock: an entry may have been touched
        // between the scan and the removal.
        let evicted: Vec<String> = candidates
            .into_iter()
            .filter(|id| self.entries.remove_if(id, |_, slot| is_idle(slot)).is_some())
            .collect();

        if !evicted.is_empty() {
            self.expired
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            debug!(count = evicted.len(), ttl_secs = ttl.as_secs_f64(), "Evicted idle decode states");
        }
        evicted
    }
}

impl<S> DecodeStateStore<S> {
    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    /// Number of live request states
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            active: self.len(),
            created: self.created.load(Ordering::Relaxed),
            finalized: self.finalized.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

impl<S: Clone> DecodeStateStore<S> {
    /// Copy of the current state of `request_id`, without creating one
    pub fn snapshot(&self, request_id: &str) -> Option<S> {
        let slot = Arc::clone(self.entries.get(request_id)?.value());
        let state = slot.lock().state.clone();
        Some(state)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live states
    pub active: usize,
    /// States created since startup
    pub created: u64,
    /// States removed by finalize or cancel
    pub finalized: u64,
    /// States dropped by the idle sweep
    pub expired: u64,
}
