//! The transaction engine
//!
//! One engine per logical store. It allocates transaction ids (even for
//! local transactions, odd for in-doubt ones), owns the undo log and the
//! registry of storage maps, retires in-doubt transactions once a validator
//! vouches for them, and carries out the commit and rollback protocols on
//! behalf of its transactions.
//!
//! The engine is explicit context, not a process-wide singleton: tests can
//! run several engines side by side.

use crate::transaction::TransactionValidator;
use crate::undo::{UndoEntry, UndoLog};
use dashmap::DashMap;
use lattice_core::{Error, LogId, MapId, OpId, Result, TxnId, VersionedValue};
use lattice_storage::StorageMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Allocator of transaction ids, owner of the undo log and map registry.
///
/// Generic over key `K`, value `V` and the storage implementation `S`; all
/// maps of one engine share those types. `S: Default` supplies fresh
/// storage for first-opened maps and for transient scratch maps.
pub struct TransactionEngine<K, V, S> {
    undo: UndoLog<K, V>,
    maps: DashMap<MapId, Arc<S>>,
    next_local: AtomicU32,
    next_in_doubt: AtomicU32,
}

impl<K, V, S> TransactionEngine<K, V, S>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
    S: StorageMap<K, VersionedValue<V>> + Default,
{
    /// Create an engine with no maps and an empty undo log.
    pub fn new() -> Arc<Self> {
        Arc::new(TransactionEngine {
            undo: UndoLog::new(),
            maps: DashMap::new(),
            // 0 is the committed sentinel's transaction, so live ids start
            // at 2 (local) and 1 (in-doubt)
            next_local: AtomicU32::new(2),
            next_in_doubt: AtomicU32::new(1),
        })
    }

    pub(crate) fn allocate_id(&self, in_doubt: bool) -> TxnId {
        if in_doubt {
            self.next_in_doubt.fetch_add(2, Ordering::SeqCst)
        } else {
            self.next_local.fetch_add(2, Ordering::SeqCst)
        }
    }

    /// Open (creating on first use) the storage behind `map_id`. All
    /// transaction maps with the same id share this storage.
    pub fn storage_for(&self, map_id: MapId) -> Arc<S> {
        self.maps
            .entry(map_id)
            .or_insert_with(|| Arc::new(S::default()))
            .value()
            .clone()
    }

    fn storage(&self, map_id: MapId) -> Option<Arc<S>> {
        self.maps.get(&map_id).map(|r| r.value().clone())
    }

    /// Destroy the storage behind `map_id`. Destructive and
    /// non-transactional; every view of the map goes dark.
    pub fn remove_map(&self, map_id: MapId) {
        if let Some((_, storage)) = self.maps.remove(&map_id) {
            storage.close();
        }
    }

    /// A transient scratch map, marked volatile and never registered.
    pub fn create_temp_map(&self) -> S {
        let storage = S::default();
        storage.set_volatile(true);
        storage
    }

    /// Number of records currently in the undo log.
    pub fn undo_len(&self) -> u64 {
        self.undo.len()
    }

    pub(crate) fn undo_log(&self) -> &UndoLog<K, V> {
        &self.undo
    }

    /// Ask `validator` whether `foreign_txn` is known committed. Without a
    /// validator the answer is unknown, which reads as "not committed":
    /// the in-doubt write stays opaque and resolves through the undo log.
    pub fn validate_transaction(
        &self,
        validator: Option<&Arc<dyn TransactionValidator>>,
        foreign_txn: TxnId,
        observer: TxnId,
    ) -> bool {
        match validator {
            Some(v) => v.validate(foreign_txn, observer),
            None => false,
        }
    }

    /// Retire an in-doubt transaction that has been observed to be
    /// committed: flip each of its stored versions to committed and purge
    /// its undo records.
    ///
    /// Safe to race: a swap lost to another thread retiring the same
    /// transaction is a swap that is already done.
    pub fn commit_after_validate(&self, foreign_txn: TxnId) {
        let entries = self.undo.entries_for(foreign_txn);
        for (_, entry) in &entries {
            let Some(storage) = self.storage(entry.map_id) else {
                continue;
            };
            if let Some(current) = storage.get(&entry.key) {
                if current.op_id.txn_id() == foreign_txn {
                    let committed = current.committed_clone();
                    let _ = storage.replace(&entry.key, &current, committed);
                }
            }
        }
        let ids: Vec<OpId> = entries.iter().map(|(id, _)| *id).collect();
        self.undo.remove_all(&ids);
        debug!(foreign_txn, writes = entries.len(), "in-doubt transaction retired");
    }

    /// Commit protocol: walk the transaction's undo records in log order
    /// and swap every version it still owns to committed, then drain the
    /// records.
    ///
    /// The transaction owns each of its versions until this swap, so a
    /// failed swap means the store no longer matches the undo log; that is
    /// corruption, not contention.
    pub(crate) fn commit_transaction(&self, txn_id: TxnId) -> Result<()> {
        let entries = self.undo.entries_for(txn_id);
        for (op_id, entry) in &entries {
            let Some(storage) = self.storage(entry.map_id) else {
                // the map was destroyed mid-transaction; nothing to flip
                continue;
            };
            if let Some(current) = storage.get(&entry.key) {
                if current.op_id.txn_id() == txn_id {
                    let committed = current.committed_clone();
                    if !storage.replace(&entry.key, &current, committed) {
                        return Err(Error::corrupt(format!(
                            "commit lost the version owned by operation {op_id}"
                        )));
                    }
                }
                // a version this transaction no longer owns was already
                // flipped through an earlier record for the same key
            }
        }
        let ids: Vec<OpId> = entries.iter().map(|(id, _)| *id).collect();
        self.undo.remove_all(&ids);
        debug!(txn_id, writes = entries.len(), "transaction committed");
        Ok(())
    }

    /// Rollback protocol: walk the transaction's undo records with log id
    /// >= `to_log`, newest first, restoring each displaced entry (or
    /// removing the key where none existed), then drain those records.
    ///
    /// Restore failures are logged, never raised.
    pub(crate) fn rollback_transaction(&self, txn_id: TxnId, to_log: LogId) {
        let entries = self.undo.entries_for_rollback(txn_id, to_log);
        for (_, entry) in &entries {
            match self.storage(entry.map_id) {
                Some(storage) => match &entry.prior {
                    Some(prior) => {
                        storage.put(entry.key.clone(), prior.clone());
                    }
                    None => {
                        storage.remove_key(&entry.key);
                    }
                },
                None => {
                    warn!(txn_id, map_id = entry.map_id, "rollback target map no longer exists");
                }
            }
        }
        let ids: Vec<OpId> = entries.iter().map(|(id, _)| *id).collect();
        self.undo.remove_all(&ids);
        debug!(txn_id, to_log, restored = entries.len(), "transaction rolled back");
    }

    pub(crate) fn append_undo(&self, op_id: OpId, entry: UndoEntry<K, V>) {
        self.undo.append(op_id, entry);
    }
}

impl<K, V, S> std::fmt::Debug for TransactionEngine<K, V, S>
where
    K: Clone,
    V: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("maps", &self.maps.len())
            .field("undo_len", &self.undo.len())
            .finish()
    }
}
