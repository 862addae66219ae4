//! Ref-counting shared-resource cache.
//!
//! [`RefCountingCache`] lets N independent call sites share one asynchronous
//! resource per key: the first acquirer for a key creates the resource,
//! later acquirers reuse it, and the constructor-supplied teardown runs only
//! when the last sharer releases the key.
//!
//! The cache is deliberately synchronous: `acquire` never waits for the
//! resource itself to resolve — it returns the (possibly still-pending)
//! value immediately, and waiting is the caller's business. One lock guards
//! both check-and-create-or-increment and decrement-and-maybe-remove, which
//! is what makes single-flight creation and exactly-once teardown hold under
//! concurrent acquire/release.
//!
//! # Invariants
//!
//! - A key maps to at most one value; under concurrent acquires for an
//!   unseen key the creator runs exactly once.
//! - The reference count of a present key equals its outstanding,
//!   un-released acquires.
//! - Teardown runs exactly once per entry, after the entry left the map, and
//!   outside the map lock.
//!
//! There is no process-wide instance: construct a cache where the sharing
//! scope lives and drop (or [`RefCountingCache::drain`]) it at shutdown.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

struct CacheEntry<V> {
    value: V,
    count: usize,
}

/// Keyed single-flight cache with per-entry reference counts.
pub struct RefCountingCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    teardown: Box<dyn Fn(V) + Send + Sync>,
}

impl<K, V> RefCountingCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create a cache with the given teardown function.
    ///
    /// `teardown` runs once per entry, when its count reaches zero or the
    /// cache is drained. For connection handles the conventional teardown is
    /// `|handle| handle.release()` — cancel if pending, close if resolved.
    pub fn new(teardown: impl Fn(V) + Send + Sync + 'static) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            teardown: Box::new(teardown),
        }
    }

    /// Get the value for `key`, creating it on first acquisition.
    ///
    /// Present key: the count is incremented and the existing value returned
    /// — `creator` is not invoked. Absent key: `creator` runs (under the map
    /// lock, so it must return promptly — hand back a pending handle rather
    /// than blocking) and the entry starts with count 1.
    pub fn acquire(&self, key: K, creator: impl FnOnce() -> V) -> V {
        let mut entries = self.entries.lock().unwrap();
        match entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.count += 1;
                entry.value.clone()
            }
            Entry::Vacant(vacant) => {
                let value = creator();
                vacant.insert(CacheEntry {
                    value: value.clone(),
                    count: 1,
                });
                value
            }
        }
    }

    /// Release one acquisition of `key`.
    ///
    /// At count zero the entry is removed and teardown runs. Releasing an
    /// absent key is a silent no-op — concurrent double-release must be
    /// tolerated.
    pub fn release(&self, key: &K) {
        let removed = {
            let mut entries = self.entries.lock().unwrap();
            let reached_zero = match entries.get_mut(key) {
                None => false,
                Some(entry) => {
                    entry.count -= 1;
                    entry.count == 0
                }
            };
            if reached_zero {
                entries.remove(key).map(|entry| entry.value)
            } else {
                None
            }
        };
        if let Some(value) = removed {
            (self.teardown)(value);
        }
    }

    /// Remove every entry regardless of count and run teardown on each.
    ///
    /// Shutdown hatch: outstanding acquirers keep whatever clones they
    /// already hold, but the cache forgets them.
    pub fn drain(&self) {
        let values: Vec<V> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain().map(|(_, entry)| entry.value).collect()
        };
        for value in values {
            (self.teardown)(value);
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns `true` if no entry is live.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// The current reference count for `key`, if present.
    pub fn count_of(&self, key: &K) -> Option<usize> {
        self.entries.lock().unwrap().get(key).map(|entry| entry.count)
    }
}
