use crate::normalization::{NormalizedNumber, VoipScheme};
use linked_hash_map::LinkedHashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_CACHE_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scheme: VoipScheme,
    pub number: NormalizedNumber,
}

impl CacheKey {
    pub fn new(scheme: VoipScheme, number: NormalizedNumber) -> Self {
        Self { scheme, number }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.number)
    }
}

/// Bounded map from (scheme, number) to a prior "should block" verdict with
/// strict least-recently-used eviction. A single lock guards the whole map.
pub struct DecisionCache {
    capacity: usize,
    entries: Mutex<LinkedHashMap<CacheKey, bool>>,
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl DecisionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(LinkedHashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkedHashMap<CacheKey, bool>> {
        // Entries are plain bools, so a panicked holder cannot leave them torn
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached verdict, marking the entry most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<bool> {
        self.lock().get_refresh(key).map(|v| *v)
    }

    pub fn put(&self, key: CacheKey, value: bool) {
        let mut entries = self.lock();
        Self::insert_locked(&mut entries, self.capacity, key, value);
    }

    /// Insert only if `still_valid` holds while the cache lock is held.
    ///
    /// Invalidation also runs under this lock, so a verdict computed before a
    /// list change either lands before the invalidation (and is removed by
    /// it) or sees `still_valid` fail.
    pub fn put_if<F>(&self, key: CacheKey, value: bool, still_valid: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut entries = self.lock();
        if !still_valid() {
            return false;
        }
        Self::insert_locked(&mut entries, self.capacity, key, value);
        true
    }

    fn insert_locked(
        entries: &mut LinkedHashMap<CacheKey, bool>,
        capacity: usize,
        key: CacheKey,
        value: bool,
    ) {
        entries.remove(&key);
        entries.insert(key, value);
        while entries.len() > capacity {
            if let Some((evicted, _)) = entries.pop_front() {
                log::debug!("Evicted cached decision for {evicted}");
            }
        }
    }

    /// Drop every entry for `number`, whatever its scheme. Returns how many
    /// entries were removed.
    pub fn invalidate(&self, number: &NormalizedNumber) -> usize {
        let mut entries = self.lock();
        let stale: Vec<CacheKey> = entries
            .keys()
            .filter(|key| &key.number == number)
            .cloned()
            .collect();
        for key in &stale {
            entries.remove(key);
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
