//! Per-transaction view over one storage map
//!
//! A [`TransactionMap`] reads at a fixed point of its own log (the
//! `read_log_id`) and writes optimistically: every write appends an undo
//! record first, then tries to install its version through the storage
//! map's compare-and-swap. Losing the swap withdraws the record and reports
//! contention; there is no internal waiting.
//!
//! # Visibility
//!
//! A reader resolving a key walks backwards from the stored entry:
//! committed entries are visible as-is; own writes are visible when their
//! log id lies below the read point; everything else is peeled away by
//! substituting the displaced entry recorded in the undo log. In-doubt
//! writers (odd transaction ids) get one extra chance: if the reader's
//! validator vouches for them they are retired to committed on the spot and
//! the walk restarts.

use crate::transaction::Transaction;
use lattice_core::{Error, LogId, MapId, OpId, Result, VersionedValue};
use lattice_storage::{Cursor, StorageMap};
use std::sync::Arc;

/// A transaction's view over one ordered map.
///
/// Views with the same map id share storage; the view itself is cheap and
/// holds a non-owning handle to its transaction.
pub struct TransactionMap<'t, K, V, S> {
    txn: &'t Transaction<K, V, S>,
    map_id: MapId,
    storage: Arc<S>,
    read_log_id: LogId,
}

impl<'t, K, V, S> TransactionMap<'t, K, V, S>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
    S: StorageMap<K, VersionedValue<V>> + Default,
{
    pub(crate) fn new(
        txn: &'t Transaction<K, V, S>,
        map_id: MapId,
        storage: Arc<S>,
        read_log_id: LogId,
    ) -> Self {
        TransactionMap {
            txn,
            map_id,
            storage,
            read_log_id,
        }
    }

    /// The map's id within the engine.
    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    /// The transaction this view is bound to.
    pub fn transaction(&self) -> &'t Transaction<K, V, S> {
        self.txn
    }

    /// The log point reads resolve at.
    pub fn read_log_id(&self) -> LogId {
        self.read_log_id
    }

    /// The same map bound to another transaction and read point.
    pub fn get_instance<'u>(
        &self,
        txn: &'u Transaction<K, V, S>,
        read_log_id: LogId,
    ) -> TransactionMap<'u, K, V, S> {
        TransactionMap {
            txn,
            map_id: self.map_id,
            storage: Arc::clone(&self.storage),
            read_log_id,
        }
    }

    /// Freeze the read point: subsequent reads ignore own writes with log
    /// id >= `log_id`.
    pub fn set_savepoint(&mut self, log_id: LogId) {
        self.read_log_id = log_id;
    }

    // ------------------------------------------------------------------
    // Snapshot reads
    // ------------------------------------------------------------------

    /// Resolve the entry visible at `max_log`, starting from `current` as
    /// read from storage.
    fn resolve(
        &self,
        key: &K,
        max_log: LogId,
        mut current: Option<VersionedValue<V>>,
    ) -> Result<Option<VersionedValue<V>>> {
        let engine = self.txn.engine();
        loop {
            let Some(cur) = current else {
                return Ok(None);
            };
            if cur.op_id.is_committed() {
                return Ok(Some(cur));
            }
            let writer = cur.op_id.txn_id();
            if writer == self.txn.id() && cur.op_id.log_id() < max_log {
                return Ok(Some(cur));
            }
            if writer != self.txn.id() && cur.op_id.is_in_doubt() {
                if engine.validate_transaction(self.txn.validator(), writer, self.txn.id()) {
                    engine.commit_after_validate(writer);
                    current = self.storage.get(key);
                    continue;
                }
            }
            // foreign-uncommitted, or an own write past the read point:
            // substitute whatever the write displaced
            match engine.undo_log().prior_of(cur.op_id) {
                Some(prior) => current = prior,
                None => {
                    // the record vanished under us; either the writer just
                    // finished (reload shows the outcome) or the store
                    // still carries the orphaned id
                    let reloaded = self.storage.get(key);
                    match &reloaded {
                        Some(r) if r.op_id == cur.op_id => {
                            return Err(Error::corrupt(format!(
                                "no undo record for live operation {}",
                                cur.op_id
                            )));
                        }
                        _ => current = reloaded,
                    }
                }
            }
        }
    }

    fn visible(&self, key: &K) -> Result<Option<VersionedValue<V>>> {
        self.resolve(key, self.read_log_id, self.storage.get(key))
    }

    /// The value visible at the read point; `None` if absent or deleted.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.visible(key)?.and_then(|v| v.value))
    }

    /// The value visible with every own write included, regardless of the
    /// read point.
    pub fn get_latest(&self, key: &K) -> Result<Option<V>> {
        Ok(self
            .resolve(key, LogId::MAX, self.storage.get(key))?
            .and_then(|v| v.value))
    }

    /// Whether the latest write on `key` belongs to this transaction.
    pub fn is_same_transaction(&self, key: &K) -> bool {
        self.storage
            .get(key)
            .map(|v| v.op_id.txn_id() == self.txn.id())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Optimistic writes
    // ------------------------------------------------------------------

    /// Try to install `value` (`None` = delete) under `key`.
    ///
    /// With `only_if_unchanged`, the write only proceeds when the entry
    /// visible at the read point still matches the stored entry, except
    /// that divergence caused by this same transaction collapses: removing
    /// an entry it already added or changed succeeds without writing, and
    /// re-adding an entry it removed is permitted.
    ///
    /// Returns `false` on any contention; never blocks.
    pub fn try_set(&self, key: K, value: Option<V>, only_if_unchanged: bool) -> Result<bool> {
        self.txn.check_not_closed()?;
        let engine = self.txn.engine();
        loop {
            let current = self.storage.get(&key);
            if only_if_unchanged {
                let old = self.resolve(&key, self.read_log_id, current.clone())?;
                let unchanged = match (&old, &current) {
                    (None, None) => true,
                    (Some(a), Some(b)) => self.storage.values_equal(a, b),
                    _ => false,
                };
                if !unchanged {
                    let own = current
                        .as_ref()
                        .map(|c| c.op_id.txn_id() == self.txn.id())
                        .unwrap_or(false);
                    if !own {
                        return Ok(false);
                    }
                    if value.is_none() {
                        // removing an entry this statement added or changed
                        // collapses to success, with nothing written
                        return Ok(true);
                    }
                    let removed_here = current
                        .as_ref()
                        .map(|c| c.value.is_none())
                        .unwrap_or(false);
                    if !removed_here {
                        return Ok(false);
                    }
                    // re-adding an entry removed in this statement: allowed
                }
            }
            match current {
                None => {
                    let op_id = self.txn.log(self.map_id, key.clone(), None)?;
                    let next = VersionedValue::new(op_id, value);
                    if self.storage.put_if_absent(key.clone(), next).is_some() {
                        self.txn.log_undo();
                        return Ok(false);
                    }
                    return Ok(true);
                }
                Some(cur)
                    if cur.op_id.is_committed() || cur.op_id.txn_id() == self.txn.id() =>
                {
                    let op_id = self.txn.log(self.map_id, key.clone(), Some(cur.clone()))?;
                    let next = VersionedValue::new(op_id, value);
                    if !self.storage.replace(&key, &cur, next) {
                        self.txn.log_undo();
                        return Ok(false);
                    }
                    return Ok(true);
                }
                Some(cur) if cur.op_id.is_in_doubt() => {
                    let writer = cur.op_id.txn_id();
                    if engine.validate_transaction(self.txn.validator(), writer, self.txn.id()) {
                        engine.commit_after_validate(writer);
                        continue;
                    }
                    return Ok(false);
                }
                // a foreign local transaction holds the key
                Some(_) => return Ok(false),
            }
        }
    }

    /// Non-blocking insert/update; `false` when the key is held by another
    /// transaction.
    pub fn try_put(&self, key: K, value: V) -> Result<bool> {
        self.try_set(key, Some(value), false)
    }

    /// Non-blocking delete; `false` when the key is held by another
    /// transaction.
    pub fn try_remove(&self, key: K) -> Result<bool> {
        self.try_set(key, None, false)
    }

    fn set(&self, key: K, value: Option<V>) -> Result<()> {
        if self.try_set(key, value, false)? {
            Ok(())
        } else {
            Err(Error::TransactionLocked)
        }
    }

    /// Install `value` under `key`; fails with `TRANSACTION_LOCKED` when
    /// another transaction holds the key. Retry and backoff are the
    /// caller's business.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.set(key, Some(value))
    }

    /// Install a tombstone under `key`; same locking rules as
    /// [`put`](Self::put).
    pub fn remove(&self, key: K) -> Result<()> {
        self.set(key, None)
    }

    /// Install `{committed, value}` directly, bypassing versioning. Bulk
    /// load and initialization only: no undo record, no conflict check.
    pub fn put_committed(&self, key: K, value: V) {
        self.storage.put(key, VersionedValue::committed(value));
    }

    // ------------------------------------------------------------------
    // Size estimation
    // ------------------------------------------------------------------

    /// Upper bound of the visible size: the raw entry count, tombstones
    /// and invisible writes included.
    pub fn size_max(&self) -> u64 {
        self.storage.len()
    }

    /// The number of keys visible at the read point, computed adaptively.
    ///
    /// With an empty undo log the raw count is exact. When the undo log
    /// outweighs the map, every entry is resolved by a full scan. Otherwise
    /// the undo records touching this map are replayed against the raw
    /// count, discounting each distinct key that resolves invisible; the
    /// count is clamped at zero because bulk-deletion windows can
    /// transiently overshoot.
    pub fn size(&self) -> Result<u64> {
        let raw = self.storage.len();
        let undo = self.txn.engine().undo_len();
        if undo == 0 {
            return Ok(raw);
        }
        if undo > raw {
            let mut count = 0u64;
            for entry in self.entries(None) {
                entry?;
                count += 1;
            }
            return Ok(count);
        }
        let touched = self.txn.engine().undo_log().keys_for_map(self.map_id);
        let seen = self.txn.engine().create_temp_map();
        let mut size = raw;
        for key in touched {
            let marker = VersionedValue::new(OpId::COMMITTED, None);
            if seen.put_if_absent(key.clone(), marker).is_some() {
                continue;
            }
            if self.get(&key)?.is_none() {
                size = size.saturating_sub(1);
            }
        }
        Ok(size)
    }

    // ------------------------------------------------------------------
    // Ordered navigation
    // ------------------------------------------------------------------

    /// Smallest visible key.
    pub fn first_key(&self) -> Result<Option<K>> {
        let mut candidate = self.storage.first_key();
        while let Some(key) = candidate {
            if self.get(&key)?.is_some() {
                return Ok(Some(key));
            }
            candidate = self.storage.higher_key(&key);
        }
        Ok(None)
    }

    /// Largest visible key.
    pub fn last_key(&self) -> Result<Option<K>> {
        let mut candidate = self.storage.last_key();
        while let Some(key) = candidate {
            if self.get(&key)?.is_some() {
                return Ok(Some(key));
            }
            candidate = self.storage.lower_key(&key);
        }
        Ok(None)
    }

    /// Smallest visible key strictly greater than `key`.
    pub fn higher_key(&self, key: &K) -> Result<Option<K>> {
        let mut candidate = self.storage.higher_key(key);
        while let Some(k) = candidate {
            if self.get(&k)?.is_some() {
                return Ok(Some(k));
            }
            candidate = self.storage.higher_key(&k);
        }
        Ok(None)
    }

    /// Largest visible key strictly smaller than `key`.
    pub fn lower_key(&self, key: &K) -> Result<Option<K>> {
        let mut candidate = self.storage.lower_key(key);
        while let Some(k) = candidate {
            if self.get(&k)?.is_some() {
                return Ok(Some(k));
            }
            candidate = self.storage.lower_key(&k);
        }
        Ok(None)
    }

    /// The key `offset` raw positions away from `key`.
    ///
    /// Deliberately unfiltered: this seeks by index in the raw map,
    /// tombstones and invisible writes included, because its callers use it
    /// for statistical sampling where uniform stride matters more than
    /// visibility.
    pub fn relative_key(&self, key: &K, offset: i64) -> Option<K> {
        let base = match self.storage.index_of(key) {
            Ok(index) => index as i64,
            Err(insertion) => insertion as i64 - 1,
        };
        let target = base + offset;
        if target < 0 {
            return None;
        }
        self.storage.key_at(target as u64)
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Forward iterator over keys from `from` (inclusive), in key order.
    ///
    /// With `include_uncommitted` every raw key is yielded; otherwise only
    /// keys visible at the read point.
    pub fn keys(&self, from: Option<K>, include_uncommitted: bool) -> KeyIterator<'_, 't, K, V, S> {
        KeyIterator {
            walker: Walker::new(self, from),
            include_uncommitted,
        }
    }

    /// Forward iterator over visible `(key, value)` pairs from `from`
    /// (inclusive), in key order.
    pub fn entries(&self, from: Option<K>) -> EntryIterator<'_, 't, K, V, S> {
        EntryIterator {
            walker: Walker::new(self, from),
        }
    }

    // ------------------------------------------------------------------
    // Destructive operations
    // ------------------------------------------------------------------

    /// Remove every entry, non-transactionally.
    pub fn clear(&self) {
        self.storage.clear();
    }

    /// Destroy the underlying map for every transaction.
    pub fn remove_map(&self) {
        self.txn.engine().remove_map(self.map_id);
    }
}

impl<K, V, S> std::fmt::Debug for TransactionMap<'_, K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionMap")
            .field("map_id", &self.map_id)
            .field("read_log_id", &self.read_log_id)
            .finish()
    }
}

/// Raw walk over storage with the reseek protocol: when a page vanishes
/// mid-iteration the cursor is reopened from the last observed key and
/// advanced past it once.
struct Walker<'m, 't, K, V, S> {
    map: &'m TransactionMap<'t, K, V, S>,
    cursor: Box<dyn Cursor<K, VersionedValue<V>> + Send + 'm>,
    last: Option<K>,
}

impl<'m, 't, K, V, S> Walker<'m, 't, K, V, S>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
    S: StorageMap<K, VersionedValue<V>> + Default,
{
    fn new(map: &'m TransactionMap<'t, K, V, S>, from: Option<K>) -> Self {
        Walker {
            cursor: map.storage.cursor(from),
            map,
            last: None,
        }
    }

    fn next_raw(&mut self) -> Result<Option<(K, VersionedValue<V>)>> {
        loop {
            match self.cursor.next_entry() {
                Ok(Some((key, value))) => {
                    // after a reseek the first entry may be the one already
                    // handed out
                    if self.last.as_ref() == Some(&key) {
                        continue;
                    }
                    self.last = Some(key.clone());
                    return Ok(Some((key, value)));
                }
                Ok(None) => return Ok(None),
                Err(Error::ChunkNotFound) => {
                    self.cursor = self.map.storage.cursor(self.last.clone());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Iterator over keys; see [`TransactionMap::keys`].
pub struct KeyIterator<'m, 't, K, V, S> {
    walker: Walker<'m, 't, K, V, S>,
    include_uncommitted: bool,
}

impl<K, V, S> Iterator for KeyIterator<'_, '_, K, V, S>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
    S: StorageMap<K, VersionedValue<V>> + Default,
{
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.walker.next_raw() {
                Ok(None) => return None,
                Ok(Some((key, raw))) => {
                    if self.include_uncommitted {
                        return Some(Ok(key));
                    }
                    let map = self.walker.map;
                    match map.resolve(&key, map.read_log_id, Some(raw)) {
                        Ok(Some(v)) if v.value.is_some() => return Some(Ok(key)),
                        Ok(_) => continue,
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Iterator over visible entries; see [`TransactionMap::entries`].
pub struct EntryIterator<'m, 't, K, V, S> {
    walker: Walker<'m, 't, K, V, S>,
}

impl<K, V, S> Iterator for EntryIterator<'_, '_, K, V, S>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
    S: StorageMap<K, VersionedValue<V>> + Default,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.walker.next_raw() {
                Ok(None) => return None,
                Ok(Some((key, raw))) => {
                    let map = self.walker.map;
                    match map.resolve(&key, map.read_log_id, Some(raw)) {
                        Ok(Some(v)) => match v.value {
                            Some(value) => return Some(Ok((key, value))),
                            None => continue,
                        },
                        Ok(None) => continue,
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
