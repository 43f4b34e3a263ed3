//! Integer handle pools
//!
//! Backend objects the client can refer to (frames, variable trees,
//! exceptions) are stored here and addressed by an `i64` handle. Handles
//! start at 1, grow monotonically and are never reused within a pool, so a
//! handle held by the client after eviction resolves to nothing instead of
//! to some unrelated object.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

struct Entry<O, V> {
    owner: O,
    value: V,
}

/// Owner-tagged store mapping handles to values
pub struct ObjectPool<O, V> {
    next_id: i64,
    entries: HashMap<i64, Entry<O, V>>,
    by_owner: HashMap<O, BTreeSet<i64>>,
}

impl<O, V> Default for ObjectPool<O, V> {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            by_owner: HashMap::new(),
        }
    }
}

impl<O: Eq + Hash + Clone, V> ObjectPool<O, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `owner` and return its fresh handle
    pub fn store(&mut self, owner: O, value: V) -> i64 {
        let id = self.next_id;
        self.next_id += 1;

        self.by_owner.entry(owner.clone()).or_default().insert(id);
        self.entries.insert(id, Entry { owner, value });
        id
    }

    pub fn get_by_id(&self, id: i64) -> Option<&V> {
        self.entries.get(&id).map(|e| &e.value)
    }

    pub fn owner_of(&self, id: i64) -> Option<&O> {
        self.entries.get(&id).map(|e| &e.owner)
    }

    /// Handles currently held by `owner`, oldest first
    pub fn ids_owned_by(&self, owner: &O) -> Vec<i64> {
        self.by_owner
            .get(owner)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The most recently stored value for `owner`
    pub fn latest_owned_by(&self, owner: &O) -> Option<(i64, &V)> {
        let id = *self.by_owner.get(owner)?.last()?;
        self.get_by_id(id).map(|v| (id, v))
    }

    pub fn remove_by_id(&mut self, id: i64) -> Option<V> {
        let entry = self.entries.remove(&id)?;
        if let Some(ids) = self.by_owner.get_mut(&entry.owner) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_owner.remove(&entry.owner);
            }
        }
        Some(entry.value)
    }

    /// Evict every value stored under `owner`, returning how many were dropped
    pub fn remove_all_owned_by(&mut self, owner: &O) -> usize {
        let Some(ids) = self.by_owner.remove(owner) else {
            return 0;
        };
        for id in &ids {
            self.entries.remove(id);
        }
        ids.len()
    }

    /// Evict everything. Handle numbering continues where it left off.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_owner.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_start_at_one_and_increase() {
        let mut pool = ObjectPool::new();
        assert_eq!(pool.store(1_i64, "a"), 1);
        assert_eq!(pool.store(2, "b"), 2);
        assert_eq!(pool.store(1, "c"), 3);
        assert_eq!(pool.get_by_id(2), Some(&"b"));
        assert_eq!(pool.owner_of(3), Some(&1));
    }

    #[test]
    fn test_remove_all_owned_by_only_touches_that_owner() {
        let mut pool = ObjectPool::new();
        let a = pool.store(1_i64, "a");
        let b = pool.store(2, "b");
        let c = pool.store(1, "c");

        assert_eq!(pool.remove_all_owned_by(&1), 2);
        assert!(pool.get_by_id(a).is_none());
        assert!(pool.get_by_id(c).is_none());
        assert_eq!(pool.get_by_id(b), Some(&"b"));
        assert!(pool.ids_owned_by(&1).is_empty());
        assert_eq!(pool.remove_all_owned_by(&1), 0);
    }

    #[test]
    fn test_handles_are_never_reused() {
        let mut pool = ObjectPool::new();
        let first = pool.store((), 10);
        pool.remove_by_id(first);
        pool.clear();

        let second = pool.store((), 20);
        assert!(second > first);
        assert!(pool.get_by_id(first).is_none());
    }

    #[test]
    fn test_latest_owned_by() {
        let mut pool = ObjectPool::new();
        assert!(pool.latest_owned_by(&7_i64).is_none());

        pool.store(7, "old");
        let newest = pool.store(7, "new");
        pool.store(8, "other");

        assert_eq!(pool.latest_owned_by(&7), Some((newest, &"new")));

        pool.remove_by_id(newest);
        assert_eq!(pool.latest_owned_by(&7).map(|(_, v)| *v), Some("old"));
        assert_eq!(pool.len(), 2);
    }
}
