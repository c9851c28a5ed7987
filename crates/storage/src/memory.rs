//! In-memory reference implementation of [`StorageMap`]
//!
//! An `RwLock<BTreeMap>` with the CAS semantics the transaction layer
//! needs. Reads take the shared lock, structural writes the exclusive one.
//! Cursors re-acquire the shared lock per step, which makes them weakly
//! consistent exactly as the contract allows; they never raise
//! `ChunkNotFound` because nothing here is ever compacted.
//!
//! Indexed access (`key_at` / `index_of`) is O(n). That is acceptable for
//! the reference map: those calls serve statistical sampling and size
//! estimation, not the hot path.

use crate::map::{Cursor, StorageMap};
use lattice_core::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory ordered map with atomic per-key update primitives.
pub struct MemoryMap<K, V> {
    entries: RwLock<BTreeMap<K, V>>,
    closed: AtomicBool,
    is_volatile: AtomicBool,
}

impl<K, V> MemoryMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        MemoryMap {
            entries: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            is_volatile: AtomicBool::new(false),
        }
    }
}

impl<K, V> Default for MemoryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for MemoryMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMap")
            .field("len", &self.entries.read().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

struct MemoryCursor<'a, K, V> {
    map: &'a MemoryMap<K, V>,
    from: Option<K>,
    last: Option<K>,
    started: bool,
}

impl<K, V> Cursor<K, V> for MemoryCursor<'_, K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn next_entry(&mut self) -> Result<Option<(K, V)>> {
        let guard = self.map.entries.read();
        let next = match (&self.last, &self.from, self.started) {
            (Some(last), _, _) => guard
                .range((Bound::Excluded(last), Bound::Unbounded))
                .next(),
            (None, Some(from), false) => guard
                .range((Bound::Included(from), Bound::Unbounded))
                .next(),
            (None, None, false) => guard.iter().next(),
            // started but nothing remembered: the map was exhausted
            _ => None,
        };
        self.started = true;
        match next {
            Some((k, v)) => {
                let entry = (k.clone(), v.clone());
                self.last = Some(entry.0.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

impl<K, V> StorageMap<K, V> for MemoryMap<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: K, value: V) -> Option<V> {
        self.entries.write().insert(key, value)
    }

    fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let mut guard = self.entries.write();
        match guard.get(&key) {
            Some(existing) => Some(existing.clone()),
            None => {
                guard.insert(key, value);
                None
            }
        }
    }

    fn replace(&self, key: &K, expected: &V, value: V) -> bool {
        let mut guard = self.entries.write();
        match guard.get(key) {
            Some(current) if current == expected => {
                guard.insert(key.clone(), value);
                true
            }
            _ => false,
        }
    }

    fn remove_key(&self, key: &K) -> Option<V> {
        self.entries.write().remove(key)
    }

    fn first_key(&self) -> Option<K> {
        self.entries.read().keys().next().cloned()
    }

    fn last_key(&self) -> Option<K> {
        self.entries.read().keys().next_back().cloned()
    }

    fn higher_key(&self, key: &K) -> Option<K> {
        self.entries
            .read()
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    fn lower_key(&self, key: &K) -> Option<K> {
        self.entries
            .read()
            .range((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(|(k, _)| k.clone())
    }

    fn ceiling_key(&self, key: &K) -> Option<K> {
        self.entries
            .read()
            .range((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    fn floor_key(&self, key: &K) -> Option<K> {
        self.entries
            .read()
            .range((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(k, _)| k.clone())
    }

    fn key_at(&self, index: u64) -> Option<K> {
        self.entries.read().keys().nth(index as usize).cloned()
    }

    fn index_of(&self, key: &K) -> std::result::Result<u64, u64> {
        let guard = self.entries.read();
        let mut index = 0u64;
        for k in guard.keys() {
            match k.cmp(key) {
                std::cmp::Ordering::Less => index += 1,
                std::cmp::Ordering::Equal => return Ok(index),
                std::cmp::Ordering::Greater => break,
            }
        }
        Err(index)
    }

    fn len(&self) -> u64 {
        self.entries.read().len() as u64
    }

    fn cursor(&self, from: Option<K>) -> Box<dyn Cursor<K, V> + Send + '_> {
        Box::new(MemoryCursor {
            map: self,
            from,
            last: None,
            started: false,
        })
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn close(&self) {
        self.entries.write().clear();
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_volatile(&self, is_volatile: bool) {
        self.is_volatile.store(is_volatile, Ordering::Release);
    }

    fn is_volatile(&self) -> bool {
        self.is_volatile.load(Ordering::Acquire)
    }

    fn values_equal(&self, a: &V, b: &V) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(pairs: &[(&str, i64)]) -> MemoryMap<String, i64> {
        let map = MemoryMap::new();
        for (k, v) in pairs {
            map.put(k.to_string(), *v);
        }
        map
    }

    #[test]
    fn test_put_and_get() {
        let map = map_with(&[("a", 1)]);
        assert_eq!(map.get(&"a".to_string()), Some(1));
        assert_eq!(map.get(&"b".to_string()), None);
    }

    #[test]
    fn test_put_returns_displaced() {
        let map = map_with(&[("a", 1)]);
        assert_eq!(map.put("a".to_string(), 2), Some(1));
        assert_eq!(map.get(&"a".to_string()), Some(2));
    }

    #[test]
    fn test_put_if_absent() {
        let map = map_with(&[("a", 1)]);
        assert_eq!(map.put_if_absent("a".to_string(), 9), Some(1));
        assert_eq!(map.put_if_absent("b".to_string(), 2), None);
        assert_eq!(map.get(&"a".to_string()), Some(1));
        assert_eq!(map.get(&"b".to_string()), Some(2));
    }

    #[test]
    fn test_replace_is_cas() {
        let map = map_with(&[("a", 1)]);
        assert!(!map.replace(&"a".to_string(), &7, 2));
        assert_eq!(map.get(&"a".to_string()), Some(1));
        assert!(map.replace(&"a".to_string(), &1, 2));
        assert_eq!(map.get(&"a".to_string()), Some(2));
        // absent key never swaps
        assert!(!map.replace(&"z".to_string(), &1, 2));
    }

    #[test]
    fn test_navigation() {
        let map = map_with(&[("b", 1), ("d", 2), ("f", 3)]);
        assert_eq!(map.first_key(), Some("b".to_string()));
        assert_eq!(map.last_key(), Some("f".to_string()));
        assert_eq!(map.higher_key(&"b".to_string()), Some("d".to_string()));
        assert_eq!(map.higher_key(&"c".to_string()), Some("d".to_string()));
        assert_eq!(map.higher_key(&"f".to_string()), None);
        assert_eq!(map.lower_key(&"d".to_string()), Some("b".to_string()));
        assert_eq!(map.lower_key(&"b".to_string()), None);
        assert_eq!(map.ceiling_key(&"d".to_string()), Some("d".to_string()));
        assert_eq!(map.ceiling_key(&"e".to_string()), Some("f".to_string()));
        assert_eq!(map.floor_key(&"c".to_string()), Some("b".to_string()));
        assert_eq!(map.floor_key(&"a".to_string()), None);
    }

    #[test]
    fn test_indexed_access() {
        let map = map_with(&[("b", 1), ("d", 2), ("f", 3)]);
        assert_eq!(map.key_at(0), Some("b".to_string()));
        assert_eq!(map.key_at(2), Some("f".to_string()));
        assert_eq!(map.key_at(3), None);
        assert_eq!(map.index_of(&"d".to_string()), Ok(1));
        assert_eq!(map.index_of(&"c".to_string()), Err(1));
        assert_eq!(map.index_of(&"z".to_string()), Err(3));
    }

    #[test]
    fn test_cursor_full_scan() {
        let map = map_with(&[("c", 3), ("a", 1), ("b", 2)]);
        let mut cursor = map.cursor(None);
        let mut seen = Vec::new();
        while let Some((k, v)) = cursor.next_entry().unwrap() {
            seen.push((k, v));
        }
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 3)
            ]
        );
    }

    #[test]
    fn test_cursor_from_is_inclusive() {
        let map = map_with(&[("a", 1), ("b", 2), ("c", 3)]);
        let mut cursor = map.cursor(Some("b".to_string()));
        assert_eq!(cursor.next_entry().unwrap(), Some(("b".to_string(), 2)));
        assert_eq!(cursor.next_entry().unwrap(), Some(("c".to_string(), 3)));
        assert_eq!(cursor.next_entry().unwrap(), None);
        // stays exhausted
        assert_eq!(cursor.next_entry().unwrap(), None);
    }

    #[test]
    fn test_cursor_sees_keys_inserted_ahead() {
        let map = map_with(&[("a", 1)]);
        let mut cursor = map.cursor(None);
        assert_eq!(cursor.next_entry().unwrap(), Some(("a".to_string(), 1)));
        map.put("b".to_string(), 2);
        // weakly consistent: a key inserted ahead of the cursor is observed
        assert_eq!(cursor.next_entry().unwrap(), Some(("b".to_string(), 2)));
    }

    #[test]
    fn test_clear_and_close() {
        let map = map_with(&[("a", 1)]);
        map.clear();
        assert_eq!(map.len(), 0);
        assert!(!map.is_closed());
        map.close();
        assert!(map.is_closed());
    }

    #[test]
    fn test_volatile_flag() {
        let map: MemoryMap<String, i64> = MemoryMap::new();
        assert!(!map.is_volatile());
        map.set_volatile(true);
        assert!(map.is_volatile());
    }
}
