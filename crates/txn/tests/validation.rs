//! In-doubt transaction validation
//!
//! Writes carrying an odd transaction id are opaque until a validator
//! vouches for the writer; then the engine retires them to committed on the
//! spot. Without a positive verdict, readers resolve through the undo log
//! and writers treat the key as locked.

use lattice_core::{TxnId, VersionedValue};
use lattice_storage::MemoryMap;
use lattice_txn::{MemoryEngine, Transaction, TransactionValidator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Engine = MemoryEngine<String, i64>;
type Txn = Transaction<String, i64, MemoryMap<String, VersionedValue<i64>>>;

struct FixedVerdict {
    verdict: bool,
    calls: AtomicUsize,
}

impl FixedVerdict {
    fn new(verdict: bool) -> Arc<Self> {
        Arc::new(FixedVerdict {
            verdict,
            calls: AtomicUsize::new(0),
        })
    }
}

impl TransactionValidator for FixedVerdict {
    fn validate(&self, _foreign_txn: TxnId, _observer: TxnId) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict
    }
}

fn engine_with_in_doubt_write() -> (Arc<Engine>, Txn) {
    let engine: Arc<Engine> = MemoryEngine::new();
    let setup = Transaction::begin(&engine);
    setup.open_map(1).put_committed("k".to_string(), 5);
    setup.commit().unwrap();

    let in_doubt = Transaction::begin_in_doubt(&engine);
    in_doubt.open_map(1).put("k".to_string(), 7).unwrap();
    (engine, in_doubt)
}

#[test]
fn test_valid_verdict_retires_the_writer() {
    let (engine, _in_doubt) = engine_with_in_doubt_write();

    let validator = FixedVerdict::new(true);
    let reader = Transaction::begin_with_validator(&engine, validator.clone());
    let map = reader.open_map(1);

    assert_eq!(map.get(&"k".to_string()).unwrap(), Some(7));
    assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    // retirement flipped the version and drained the undo log
    assert_eq!(engine.undo_len(), 0);

    // a later plain reader needs no validator any more
    let later = Transaction::begin(&engine);
    assert_eq!(later.open_map(1).get(&"k".to_string()).unwrap(), Some(7));
}

#[test]
fn test_invalid_verdict_reads_the_prior_value() {
    let (engine, _in_doubt) = engine_with_in_doubt_write();

    let validator = FixedVerdict::new(false);
    let reader = Transaction::begin_with_validator(&engine, validator.clone());
    let map = reader.open_map(1);

    assert_eq!(map.get(&"k".to_string()).unwrap(), Some(5));
    assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.undo_len(), 1);
}

#[test]
fn test_no_validator_reads_the_prior_value() {
    let (engine, _in_doubt) = engine_with_in_doubt_write();
    let reader = Transaction::begin(&engine);
    assert_eq!(reader.open_map(1).get(&"k".to_string()).unwrap(), Some(5));
}

#[test]
fn test_writer_retires_in_doubt_holder_and_wins() {
    let (engine, _in_doubt) = engine_with_in_doubt_write();

    let validator = FixedVerdict::new(true);
    let writer = Transaction::begin_with_validator(&engine, validator);
    let map = writer.open_map(1);

    assert!(map.try_put("k".to_string(), 9).unwrap());
    assert_eq!(map.get(&"k".to_string()).unwrap(), Some(9));
    writer.commit().unwrap();

    let later = Transaction::begin(&engine);
    assert_eq!(later.open_map(1).get(&"k".to_string()).unwrap(), Some(9));
}

#[test]
fn test_writer_without_verdict_stays_locked_out() {
    let (engine, _in_doubt) = engine_with_in_doubt_write();

    let writer = Transaction::begin(&engine);
    let map = writer.open_map(1);
    assert!(!map.try_put("k".to_string(), 9).unwrap());
    assert_eq!(
        map.put("k".to_string(), 9).unwrap_err().code(),
        "TRANSACTION_LOCKED"
    );
}

#[test]
fn test_commit_after_validate_is_idempotent() {
    let (engine, in_doubt) = engine_with_in_doubt_write();
    let id = in_doubt.id();
    engine.commit_after_validate(id);
    engine.commit_after_validate(id);

    let reader = Transaction::begin(&engine);
    assert_eq!(reader.open_map(1).get(&"k".to_string()).unwrap(), Some(7));
    assert_eq!(engine.undo_len(), 0);
}
