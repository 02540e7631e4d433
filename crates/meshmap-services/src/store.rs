//! Bounded, TTL-evicting content-addressed store.
//!
//! Holds the authoritative set of discovered records on a node. The same
//! mechanics back connection records and exceptions; the `StoredEntry`
//! seam tells the store how to read an entry's expiry clock and whether
//! it is pinned. The lock lives inside the store and is never exposed —
//! every method is race-free on its own.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use meshmap_core::{Exception, NetRecord, STATUS_ADDED};

/// Current UTC time as epoch seconds — the unit of the expiry clock.
pub fn now_utc() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Store access for a replicated entry type.
pub trait StoredEntry: Clone + Send + Sync + 'static {
    /// UTC epoch seconds of the last active write.
    fn active_time(&self) -> i64;
    fn set_active_time(&mut self, now: i64);
    /// Pinned entries are exempt from the expiry sweep.
    fn is_pinned(&self) -> bool;
}

impl StoredEntry for NetRecord {
    fn active_time(&self) -> i64 {
        self.options.active_time
    }
    fn set_active_time(&mut self, now: i64) {
        self.options.active_time = now;
    }
    fn is_pinned(&self) -> bool {
        self.options.status == STATUS_ADDED
    }
}

impl StoredEntry for Exception {
    fn active_time(&self) -> i64 {
        self.active_time
    }
    fn set_active_time(&mut self, now: i64) {
        self.active_time = now;
    }
    fn is_pinned(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cache limit exceeded, id: {id}")]
    CapacityExceeded { id: String },
}

/// Bounded map from entry id to entry. Cheap to clone; all clones share
/// the same backing map.
#[derive(Clone)]
pub struct ContentStore<T> {
    items: Arc<RwLock<HashMap<String, T>>>,
    limit: usize,
    flush: Duration,
}

impl<T: StoredEntry> ContentStore<T> {
    /// A store holding at most `limit` entries, expiring non-pinned
    /// entries `flush` after their last active write. A zero `flush`
    /// disables the sweep entirely.
    pub fn new(limit: usize, flush: Duration) -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            limit,
            flush,
        }
    }

    /// Insert or overwrite the entry at `id`. A new key is rejected when
    /// the store is full; updates to existing keys always succeed.
    /// `mark_active` restamps the expiry clock before storing.
    pub fn set(&self, id: &str, mut entry: T, mark_active: bool) -> Result<(), StoreError> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);

        if !items.contains_key(id) && items.len() >= self.limit {
            return Err(StoreError::CapacityExceeded { id: id.to_string() });
        }

        if mark_active {
            entry.set_active_time(now_utc());
        }

        items.insert(id.to_string(), entry);
        Ok(())
    }

    /// Point lookup; no side effects.
    pub fn get(&self, id: &str) -> Option<T> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Unconditional removal. Reports whether anything existed; deleting
    /// a missing id is not an error.
    pub fn del(&self, id: &str) -> bool {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Defensive copy of all current entries.
    pub fn snapshot(&self) -> Vec<T> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every non-pinned entry whose expiry clock ran out. Takes
    /// the same exclusive lock as mutation, so no entry can be read
    /// half-evicted. Returns the eviction count.
    pub fn sweep_expired(&self) -> usize {
        if self.flush.is_zero() {
            return 0;
        }
        let now = now_utc();
        let flush = self.flush.as_secs() as i64;

        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let before = items.len();
        items.retain(|_, v| v.is_pinned() || v.active_time() + flush >= now);
        before - items.len()
    }
}

/// Periodically evict expired entries, independent of request traffic.
///
/// Runs forever — cancel by dropping the task handle.
pub async fn sweep_loop<T: StoredEntry>(store: ContentStore<T>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let removed = store.sweep_expired();
        if removed > 0 {
            tracing::debug!(removed, "expired store entries");
        }
    }
}
