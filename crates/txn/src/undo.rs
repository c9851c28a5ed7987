//! The undo log
//!
//! One ordered map from raw [`OpId`] to the entry each write displaced,
//! shared by every transaction of an engine. Because `OpId` orders by
//! (transaction, log), one transaction's records occupy a contiguous range
//! and can be extracted in either log order (commit) or reverse (rollback).
//!
//! A single mutex guards the whole log. The mutex is leaf-level: callers
//! must not acquire any other lock while holding it, which is why the bulk
//! accessors clone the relevant entries out instead of exposing guards.

use lattice_core::{LogId, MapId, OpId, TxnId, VersionedValue};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// One undo record: where a write landed and what it displaced.
#[derive(Debug, Clone)]
pub struct UndoEntry<K, V> {
    /// Map the write targeted.
    pub map_id: MapId,
    /// Key the write targeted.
    pub key: K,
    /// Entry displaced by the write; `None` when the key was absent.
    pub prior: Option<VersionedValue<V>>,
}

/// Ordered undo log shared by all transactions of one engine.
pub struct UndoLog<K, V> {
    entries: Mutex<BTreeMap<u64, UndoEntry<K, V>>>,
}

impl<K, V> UndoLog<K, V>
where
    K: Clone,
    V: Clone,
{
    /// Create an empty log.
    pub fn new() -> Self {
        UndoLog {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record the entry displaced by the write `op_id`.
    pub fn append(&self, op_id: OpId, entry: UndoEntry<K, V>) {
        let mut guard = self.entries.lock();
        let previous = guard.insert(op_id.raw(), entry);
        debug_assert!(previous.is_none(), "log slot {op_id} written twice");
    }

    /// Withdraw one record; used when the write it covered failed to install.
    pub fn remove(&self, op_id: OpId) -> Option<UndoEntry<K, V>> {
        self.entries.lock().remove(&op_id.raw())
    }

    /// The displaced entry for the write `op_id`.
    ///
    /// The outer `None` means the record is gone (its transaction already
    /// committed or rolled back); the inner `None` means the key was absent
    /// before the write.
    pub fn prior_of(&self, op_id: OpId) -> Option<Option<VersionedValue<V>>> {
        self.entries
            .lock()
            .get(&op_id.raw())
            .map(|e| e.prior.clone())
    }

    /// Number of records in the log.
    pub fn len(&self) -> u64 {
        self.entries.lock().len() as u64
    }

    /// Whether the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Clone one transaction's records in log order.
    pub fn entries_for(&self, txn_id: TxnId) -> Vec<(OpId, UndoEntry<K, V>)> {
        let lo = OpId::pack(txn_id, 0).raw();
        let hi = OpId::pack(txn_id, LogId::MAX).raw();
        self.entries
            .lock()
            .range(lo..=hi)
            .map(|(raw, e)| (OpId::from_raw(*raw), e.clone()))
            .collect()
    }

    /// Clone one transaction's records with log id >= `from_log`, newest
    /// first (rollback order).
    pub fn entries_for_rollback(
        &self,
        txn_id: TxnId,
        from_log: LogId,
    ) -> Vec<(OpId, UndoEntry<K, V>)> {
        let lo = OpId::pack(txn_id, from_log).raw();
        let hi = OpId::pack(txn_id, LogId::MAX).raw();
        self.entries
            .lock()
            .range(lo..=hi)
            .rev()
            .map(|(raw, e)| (OpId::from_raw(*raw), e.clone()))
            .collect()
    }

    /// Drop a batch of records by id.
    pub fn remove_all(&self, ids: &[OpId]) {
        let mut guard = self.entries.lock();
        for id in ids {
            guard.remove(&id.raw());
        }
    }

    /// Keys of records touching `map_id`, in log order. Duplicates appear
    /// when a key was written more than once.
    pub fn keys_for_map(&self, map_id: MapId) -> Vec<K> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.map_id == map_id)
            .map(|e| e.key.clone())
            .collect()
    }
}

impl<K: Clone, V: Clone> Default for UndoLog<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for UndoLog<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoLog")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(map_id: MapId, key: &str) -> UndoEntry<String, i64> {
        UndoEntry {
            map_id,
            key: key.to_string(),
            prior: None,
        }
    }

    #[test]
    fn test_append_and_prior_of() {
        let log: UndoLog<String, i64> = UndoLog::new();
        let op = OpId::pack(2, 0);
        log.append(
            op,
            UndoEntry {
                map_id: 1,
                key: "a".into(),
                prior: Some(VersionedValue::committed(1)),
            },
        );
        assert_eq!(log.prior_of(op), Some(Some(VersionedValue::committed(1))));
        assert_eq!(log.prior_of(OpId::pack(2, 1)), None);
    }

    #[test]
    fn test_entries_for_is_per_transaction_and_ordered() {
        let log: UndoLog<String, i64> = UndoLog::new();
        log.append(OpId::pack(2, 1), entry(1, "b"));
        log.append(OpId::pack(2, 0), entry(1, "a"));
        log.append(OpId::pack(4, 0), entry(1, "c"));

        let mine = log.entries_for(2);
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].0, OpId::pack(2, 0));
        assert_eq!(mine[1].0, OpId::pack(2, 1));
    }

    #[test]
    fn test_rollback_range_is_reversed_and_bounded() {
        let log: UndoLog<String, i64> = UndoLog::new();
        for i in 0..4 {
            log.append(OpId::pack(2, i), entry(1, &format!("k{i}")));
        }
        let tail = log.entries_for_rollback(2, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].0, OpId::pack(2, 3));
        assert_eq!(tail[1].0, OpId::pack(2, 2));
    }

    #[test]
    fn test_remove_all() {
        let log: UndoLog<String, i64> = UndoLog::new();
        log.append(OpId::pack(2, 0), entry(1, "a"));
        log.append(OpId::pack(2, 1), entry(1, "b"));
        log.remove_all(&[OpId::pack(2, 0), OpId::pack(2, 1)]);
        assert!(log.is_empty());
    }

    #[test]
    fn test_keys_for_map_filters() {
        let log: UndoLog<String, i64> = UndoLog::new();
        log.append(OpId::pack(2, 0), entry(1, "a"));
        log.append(OpId::pack(2, 1), entry(9, "x"));
        log.append(OpId::pack(4, 0), entry(1, "a"));
        let keys = log.keys_for_map(1);
        assert_eq!(keys, vec!["a".to_string(), "a".to_string()]);
    }
}
