//! A single writer's context
//!
//! A [`Transaction`] is owned by one thread at a time; concurrent calls on
//! the same transaction are not defended against. Its mutable state (log
//! position, status, savepoints) sits behind a mutex only so transaction
//! maps can share it through plain references.

use crate::engine::TransactionEngine;
use crate::map::TransactionMap;
use crate::undo::UndoEntry;
use lattice_core::{Error, LogId, MapId, OpId, Result, TxnId, VersionedValue};
use lattice_storage::StorageMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// Pluggable decision procedure for in-doubt transactions.
///
/// When a transaction observes a write carrying an odd (in-doubt)
/// transaction id, its validator is asked whether that writer is known to
/// have committed. The call is synchronous and may perform external I/O; it
/// is the only place a read or write can stall on a remote party, and any
/// deadline handling belongs to the implementation.
pub trait TransactionValidator: Send + Sync {
    /// Report whether `foreign_txn` committed. `observer` identifies the
    /// asking transaction so a coordinator can correlate the round trip.
    fn validate(&self, foreign_txn: TxnId, observer: TxnId) -> bool;
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting reads and writes.
    Open,
    /// Prepared for a two-phase outcome; still undecided.
    Prepared,
    /// Commit in progress.
    Committing,
    /// Finished; every further write fails.
    Closed,
}

struct TxnState {
    log_id: LogId,
    status: TransactionStatus,
    savepoints: FxHashMap<String, LogId>,
}

/// A single transaction over one engine.
pub struct Transaction<K, V, S> {
    engine: Arc<TransactionEngine<K, V, S>>,
    id: TxnId,
    validator: Option<Arc<dyn TransactionValidator>>,
    state: Mutex<TxnState>,
}

impl<K, V, S> Transaction<K, V, S>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
    S: StorageMap<K, VersionedValue<V>> + Default,
{
    fn start(
        engine: &Arc<TransactionEngine<K, V, S>>,
        in_doubt: bool,
        validator: Option<Arc<dyn TransactionValidator>>,
    ) -> Self {
        let id = engine.allocate_id(in_doubt);
        debug!(txn_id = id, in_doubt, "transaction started");
        Transaction {
            engine: Arc::clone(engine),
            id,
            validator,
            state: Mutex::new(TxnState {
                log_id: 0,
                status: TransactionStatus::Open,
                savepoints: FxHashMap::default(),
            }),
        }
    }

    /// Start a local transaction (even id).
    pub fn begin(engine: &Arc<TransactionEngine<K, V, S>>) -> Self {
        Self::start(engine, false, None)
    }

    /// Start a local transaction that can judge in-doubt writers it
    /// observes.
    pub fn begin_with_validator(
        engine: &Arc<TransactionEngine<K, V, S>>,
        validator: Arc<dyn TransactionValidator>,
    ) -> Self {
        Self::start(engine, false, Some(validator))
    }

    /// Start an in-doubt transaction (odd id). Its writes stay opaque to
    /// observers until their validators vouch for it.
    pub fn begin_in_doubt(engine: &Arc<TransactionEngine<K, V, S>>) -> Self {
        Self::start(engine, true, None)
    }

    /// This transaction's id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Whether this transaction carries an in-doubt (odd) id.
    pub fn is_in_doubt(&self) -> bool {
        self.id & 1 == 1
    }

    /// The engine this transaction runs on.
    pub fn engine(&self) -> &Arc<TransactionEngine<K, V, S>> {
        &self.engine
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// The next log slot; equals the number of live writes so far.
    pub fn log_id(&self) -> LogId {
        self.state.lock().log_id
    }

    pub(crate) fn validator(&self) -> Option<&Arc<dyn TransactionValidator>> {
        self.validator.as_ref()
    }

    /// Fail unless the transaction still accepts writes.
    pub fn check_not_closed(&self) -> Result<()> {
        if self.status() == TransactionStatus::Closed {
            Err(Error::TransactionClosed)
        } else {
            Ok(())
        }
    }

    /// Reserve the next log slot and append the undo record for a write
    /// about to be installed. Returns the [`OpId`] the write must carry.
    pub(crate) fn log(
        &self,
        map_id: MapId,
        key: K,
        prior: Option<VersionedValue<V>>,
    ) -> Result<OpId> {
        let mut state = self.state.lock();
        if state.status == TransactionStatus::Closed {
            return Err(Error::TransactionClosed);
        }
        let op_id = OpId::pack(self.id, state.log_id);
        self.engine.append_undo(op_id, UndoEntry { map_id, key, prior });
        state.log_id += 1;
        Ok(op_id)
    }

    /// Withdraw the most recent undo record after its write failed to
    /// install, so the log keeps matching what was actually applied.
    pub(crate) fn log_undo(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.log_id > 0, "log_undo without a preceding log");
        if state.log_id == 0 {
            return;
        }
        state.log_id -= 1;
        self.engine.undo_log().remove(OpId::pack(self.id, state.log_id));
    }

    /// Record the current log position under `name` and return it.
    pub fn set_savepoint(&self, name: &str) -> LogId {
        let mut state = self.state.lock();
        let log_id = state.log_id;
        state.savepoints.insert(name.to_string(), log_id);
        log_id
    }

    /// Look up a named savepoint.
    pub fn savepoint(&self, name: &str) -> Option<LogId> {
        self.state.lock().savepoints.get(name).copied()
    }

    /// Mark the transaction prepared (two-phase outcome pending).
    pub fn prepare(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Open {
            return Err(Error::TransactionClosed);
        }
        state.status = TransactionStatus::Prepared;
        Ok(())
    }

    /// Commit: every version this transaction wrote becomes committed, in
    /// log order, and its undo records are drained.
    ///
    /// A swap failure during commit is `TRANSACTION_CORRUPT`; the
    /// transaction closes either way.
    pub fn commit(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.status == TransactionStatus::Closed {
                return Err(Error::TransactionClosed);
            }
            state.status = TransactionStatus::Committing;
        }
        let result = self.engine.commit_transaction(self.id);
        let mut state = self.state.lock();
        state.status = TransactionStatus::Closed;
        state.savepoints.clear();
        result
    }

    /// Roll back every write and close the transaction. A no-op when
    /// already closed.
    pub fn rollback(&self) {
        {
            let state = self.state.lock();
            if state.status == TransactionStatus::Closed {
                return;
            }
        }
        self.engine.rollback_transaction(self.id, 0);
        let mut state = self.state.lock();
        state.status = TransactionStatus::Closed;
        state.log_id = 0;
        state.savepoints.clear();
    }

    /// Roll back writes with log id >= `log_id`, keeping the transaction
    /// open. Savepoints taken after that point are dropped.
    pub fn rollback_to_savepoint(&self, log_id: LogId) -> Result<()> {
        self.check_not_closed()?;
        self.engine.rollback_transaction(self.id, log_id);
        let mut state = self.state.lock();
        state.log_id = log_id;
        state.savepoints.retain(|_, v| *v <= log_id);
        Ok(())
    }

    /// Roll back to a named savepoint.
    pub fn rollback_to(&self, name: &str) -> Result<()> {
        let log_id = self
            .savepoint(name)
            .ok_or_else(|| Error::ConstraintNotFound {
                name: name.to_string(),
            })?;
        self.rollback_to_savepoint(log_id)
    }

    /// Open a transactional view over `map_id`, reading at the latest
    /// possible point (every own write visible).
    pub fn open_map(&self, map_id: MapId) -> TransactionMap<'_, K, V, S> {
        TransactionMap::new(self, map_id, self.engine.storage_for(map_id), LogId::MAX)
    }
}

impl<K, V, S> std::fmt::Debug for Transaction<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &state.status)
            .field("log_id", &state.log_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryEngine;

    #[test]
    fn test_lifecycle() {
        let engine: Arc<MemoryEngine<String, i64>> = MemoryEngine::new();
        let txn = Transaction::begin(&engine);
        assert_eq!(txn.status(), TransactionStatus::Open);
        assert!(!txn.is_in_doubt());
        txn.commit().unwrap();
        assert_eq!(txn.status(), TransactionStatus::Closed);
        assert_eq!(txn.commit().unwrap_err(), Error::TransactionClosed);
    }

    #[test]
    fn test_in_doubt_ids_are_odd() {
        let engine: Arc<MemoryEngine<String, i64>> = MemoryEngine::new();
        let txn = Transaction::begin_in_doubt(&engine);
        assert!(txn.is_in_doubt());
        assert_eq!(txn.id() & 1, 1);
    }

    #[test]
    fn test_log_reserves_slots_in_order() {
        let engine: Arc<MemoryEngine<String, i64>> = MemoryEngine::new();
        let txn = Transaction::begin(&engine);
        let a = txn.log(1, "a".into(), None).unwrap();
        let b = txn.log(1, "b".into(), None).unwrap();
        assert_eq!(a, OpId::pack(txn.id(), 0));
        assert_eq!(b, OpId::pack(txn.id(), 1));
        assert_eq!(txn.log_id(), 2);
        assert_eq!(engine.undo_len(), 2);
    }

    #[test]
    fn test_log_undo_pops_last() {
        let engine: Arc<MemoryEngine<String, i64>> = MemoryEngine::new();
        let txn = Transaction::begin(&engine);
        txn.log(1, "a".into(), None).unwrap();
        txn.log_undo();
        assert_eq!(txn.log_id(), 0);
        assert_eq!(engine.undo_len(), 0);
    }

    #[test]
    fn test_savepoints() {
        let engine: Arc<MemoryEngine<String, i64>> = MemoryEngine::new();
        let txn = Transaction::begin(&engine);
        txn.log(1, "a".into(), None).unwrap();
        let sp = txn.set_savepoint("s1");
        assert_eq!(sp, 1);
        assert_eq!(txn.savepoint("s1"), Some(1));
        assert_eq!(txn.savepoint("nope"), None);
    }

    #[test]
    fn test_rollback_to_missing_savepoint() {
        let engine: Arc<MemoryEngine<String, i64>> = MemoryEngine::new();
        let txn = Transaction::begin(&engine);
        let err = txn.rollback_to("ghost").unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_NOT_FOUND_1");
    }

    #[test]
    fn test_no_writes_after_close() {
        let engine: Arc<MemoryEngine<String, i64>> = MemoryEngine::new();
        let txn = Transaction::begin(&engine);
        txn.rollback();
        assert_eq!(
            txn.log(1, "a".into(), None).unwrap_err(),
            Error::TransactionClosed
        );
    }

    #[test]
    fn test_prepare_then_commit() {
        let engine: Arc<MemoryEngine<String, i64>> = MemoryEngine::new();
        let txn = Transaction::begin(&engine);
        txn.prepare().unwrap();
        assert_eq!(txn.status(), TransactionStatus::Prepared);
        txn.commit().unwrap();
        assert_eq!(txn.status(), TransactionStatus::Closed);
    }
}
