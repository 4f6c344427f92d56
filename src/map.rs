//! Ordered key→entry store with O(1) recency updates.
//!
//! `OrderedMap` combines a hash index with the arena list to keep entries
//! ordered by last touch while preserving constant-time lookup:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        OrderedMap                             │
//! │                                                               │
//! │  HashMap<String, slot>        Arena-linked list               │
//! │  ┌──────────────┐            ┌─────────────────────────────┐  │
//! │  │ "k1" ─────────────────▶   │ oldest ◀──▶ ... ◀──▶ newest │  │
//! │  │ "k2" ─────────────────▶   │                             │  │
//! │  └──────────────┘            └─────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A *touch* (insert, update, or `get`) moves the entry to the newest
//! position. When a bounded map would exceed its cap, the oldest entry is
//! evicted and handed back to the caller.
//!
//! # Operations
//!
//! | Operation | Action | Time |
//! |-----------|--------|------|
//! | `get` | Lookup and touch to newest | O(1) |
//! | `peek` | Lookup without touching | O(1) |
//! | `set` | Upsert at newest, evict oldest if over cap | O(1) |
//! | `remove` | Unlink and drop | O(1) |
//! | `set_max_size` | Shrink, evicting oldest-first | O(k) evictions |
//! | `iter` | Traverse oldest→newest | O(n) |
//!
//! `max_size` of `None` means unbounded.

use crate::entry::CacheEntry;
use crate::list::List;
use core::fmt;
use core::num::NonZeroUsize;
use hashbrown::HashMap;

/// An ordered map from primary key to [`CacheEntry`], evicting
/// least-recently-touched entries once a bounded cap is exceeded.
///
/// # Examples
///
/// ```
/// use cachebus::{CacheEntry, OrderedMap};
/// use core::num::NonZeroUsize;
///
/// let mut map = OrderedMap::new(NonZeroUsize::new(2));
/// map.set(CacheEntry::new("k1", 1));
/// map.set(CacheEntry::new("k2", 2));
///
/// // Touch "k1" so "k2" becomes the oldest entry.
/// map.get("k1");
///
/// let evicted = map.set(CacheEntry::new("k3", 3)).unwrap();
/// assert_eq!(evicted.key, "k2");
/// ```
pub struct OrderedMap<V> {
    list: List<CacheEntry<V>>,
    index: HashMap<String, usize>,
    max_size: Option<NonZeroUsize>,
}

impl<V> OrderedMap<V> {
    /// Creates an empty map. `max_size` of `None` means unbounded.
    pub fn new(max_size: Option<NonZeroUsize>) -> Self {
        OrderedMap {
            list: List::new(),
            index: HashMap::new(),
            max_size,
        }
    }

    /// Returns the number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the map holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the cap, or `None` when unbounded.
    #[inline]
    pub fn max_size(&self) -> Option<NonZeroUsize> {
        self.max_size
    }

    /// Returns true if `key` is a live primary key.
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Upserts `entry`.
    ///
    /// A new key is appended as the newest entry; if that would exceed the
    /// cap, the current oldest entry is evicted and returned. An existing key
    /// has its entry replaced and touched to newest; nothing is returned.
    pub fn set(&mut self, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        if let Some(&id) = self.index.get(&entry.key) {
            if let Some(slot) = self.list.get_mut(id) {
                *slot = entry;
            }
            self.list.move_to_newest(id);
            return None;
        }

        let evicted = match self.max_size {
            Some(cap) if self.index.len() >= cap.get() => self.pop_oldest(),
            _ => None,
        };

        let key = entry.key.clone();
        let id = self.list.push_newest(entry);
        self.index.insert(key, id);
        evicted
    }

    /// Looks up `key` and touches the entry to newest.
    pub fn get(&mut self, key: &str) -> Option<&CacheEntry<V>> {
        let id = *self.index.get(key)?;
        self.list.move_to_newest(id);
        self.list.get(id)
    }

    /// Looks up `key` without changing recency order.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        let id = *self.index.get(key)?;
        self.list.get(id)
    }

    /// Removes `key`, returning its entry if it was present.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let id = self.index.remove(key)?;
        self.list.remove(id)
    }

    /// Removes and returns the oldest entry.
    pub fn pop_oldest(&mut self) -> Option<CacheEntry<V>> {
        let entry = self.list.pop_oldest()?;
        self.index.remove(&entry.key);
        Some(entry)
    }

    /// Changes the cap. Shrinking evicts oldest entries until the size fits;
    /// the evicted entries are returned oldest-first. `None` removes the cap.
    pub fn set_max_size(&mut self, max_size: Option<NonZeroUsize>) -> Vec<CacheEntry<V>> {
        self.max_size = max_size;
        let mut evicted = Vec::new();
        if let Some(cap) = self.max_size {
            while self.index.len() > cap.get() {
                match self.pop_oldest() {
                    Some(entry) => evicted.push(entry),
                    None => break,
                }
            }
        }
        evicted
    }

    /// Removes every entry, returning them oldest→newest.
    pub fn clear(&mut self) -> Vec<CacheEntry<V>> {
        let mut drained = Vec::with_capacity(self.index.len());
        while let Some(entry) = self.pop_oldest() {
            drained.push(entry);
        }
        self.list.clear();
        drained
    }

    /// Iterates entries oldest→newest.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry<V>> + '_ {
        self.list.iter()
    }
}

impl<V> fmt::Debug for OrderedMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedMap")
            .field("len", &self.index.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounded(cap: usize) -> OrderedMap<i32> {
        OrderedMap::new(NonZeroUsize::new(cap))
    }

    fn keys(map: &OrderedMap<i32>) -> Vec<String> {
        map.iter().map(|e| e.key.clone()).collect()
    }

    #[test]
    fn test_map_set_get() {
        let mut map = bounded(2);
        assert!(map.set(CacheEntry::new("k1", 1)).is_none());
        assert!(map.set(CacheEntry::new("k2", 2)).is_none());
        assert_eq!(map.get("k1").map(|e| e.value), Some(1));
        assert_eq!(map.get("k3").map(|e| e.value), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_map_eviction_order() {
        let mut map = bounded(2);
        map.set(CacheEntry::new("k1", 1));
        map.set(CacheEntry::new("k2", 2));

        // k1 is oldest and gets evicted.
        let evicted = map.set(CacheEntry::new("k3", 3)).expect("eviction");
        assert_eq!(evicted.key, "k1");
        assert_eq!(evicted.value, 1);
        assert_eq!(keys(&map), vec!["k2", "k3"]);
    }

    #[test]
    fn test_map_get_touches() {
        let mut map = bounded(2);
        map.set(CacheEntry::new("k1", 1));
        map.set(CacheEntry::new("k2", 2));
        map.get("k1");

        let evicted = map.set(CacheEntry::new("k3", 3)).expect("eviction");
        assert_eq!(evicted.key, "k2");
    }

    #[test]
    fn test_map_peek_does_not_touch() {
        let mut map = bounded(2);
        map.set(CacheEntry::new("k1", 1));
        map.set(CacheEntry::new("k2", 2));
        assert_eq!(map.peek("k1").map(|e| e.value), Some(1));

        let evicted = map.set(CacheEntry::new("k3", 3)).expect("eviction");
        assert_eq!(evicted.key, "k1");
    }

    #[test]
    fn test_map_update_touches_without_evicting() {
        let mut map = bounded(2);
        map.set(CacheEntry::new("k1", 1));
        map.set(CacheEntry::new("k2", 2));

        // Updating an existing key never evicts.
        assert!(map.set(CacheEntry::new("k1", 10)).is_none());
        assert_eq!(map.len(), 2);
        assert_eq!(keys(&map), vec!["k2", "k1"]);
        assert_eq!(map.peek("k1").map(|e| e.value), Some(10));
    }

    #[test]
    fn test_map_remove() {
        let mut map = bounded(3);
        map.set(CacheEntry::new("k1", 1));
        map.set(CacheEntry::new("k2", 2));
        let removed = map.remove("k1").expect("present");
        assert_eq!(removed.value, 1);
        assert!(map.remove("k1").is_none());
        assert_eq!(map.len(), 1);
        assert_eq!(keys(&map), vec!["k2"]);
    }

    #[test]
    fn test_map_shrink_evicts_oldest_first() {
        let mut map = bounded(4);
        for (i, k) in ["k1", "k2", "k3", "k4"].iter().enumerate() {
            map.set(CacheEntry::new(*k, i as i32));
        }
        map.get("k1");

        let evicted = map.set_max_size(NonZeroUsize::new(2));
        let evicted_keys: Vec<&str> = evicted.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(evicted_keys, vec!["k2", "k3"]);
        assert_eq!(keys(&map), vec!["k4", "k1"]);
        assert_eq!(map.max_size(), NonZeroUsize::new(2));
    }

    #[test]
    fn test_map_grow_and_unbound() {
        let mut map = bounded(1);
        map.set(CacheEntry::new("k1", 1));

        assert!(map.set_max_size(NonZeroUsize::new(3)).is_empty());
        map.set(CacheEntry::new("k2", 2));
        map.set(CacheEntry::new("k3", 3));
        assert_eq!(map.len(), 3);

        // Removing the cap entirely allows unbounded growth.
        assert!(map.set_max_size(None).is_empty());
        map.set(CacheEntry::new("k4", 4));
        assert_eq!(map.len(), 4);
        assert_eq!(map.max_size(), None);
    }

    #[test]
    fn test_map_unbounded_never_evicts() {
        let mut map: OrderedMap<i32> = OrderedMap::new(None);
        for i in 0..100 {
            assert!(map.set(CacheEntry::new(format!("k{i}"), i)).is_none());
        }
        assert_eq!(map.len(), 100);
    }

    #[test]
    fn test_map_clear_returns_oldest_first() {
        let mut map = bounded(3);
        map.set(CacheEntry::new("k1", 1));
        map.set(CacheEntry::new("k2", 2));
        map.set(CacheEntry::new("k3", 3));
        map.get("k1");

        let drained = map.clear();
        let drained_keys: Vec<&str> = drained.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(drained_keys, vec!["k2", "k3", "k1"]);
        assert!(map.is_empty());

        map.set(CacheEntry::new("k4", 4));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_map_iter_order_tracks_touches() {
        let mut map = bounded(3);
        map.set(CacheEntry::new("k1", 1));
        map.set(CacheEntry::new("k2", 2));
        map.set(CacheEntry::new("k3", 3));
        assert_eq!(keys(&map), vec!["k1", "k2", "k3"]);

        map.get("k2");
        assert_eq!(keys(&map), vec!["k1", "k3", "k2"]);

        map.get("k2");
        assert_eq!(keys(&map), vec!["k1", "k3", "k2"], "touching newest is a no-op");
    }
}
