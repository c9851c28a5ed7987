//! End-to-end transaction scenarios across the public API.

use latticedb::{MemoryEngine, Transaction};
use std::sync::Arc;

type Engine = MemoryEngine<String, i64>;

fn k(s: &str) -> String {
    s.to_string()
}

#[test]
fn test_insert_then_read_in_same_transaction() {
    let engine: Arc<Engine> = MemoryEngine::new();

    let t1 = Transaction::begin(&engine);
    let m1 = t1.open_map(1);
    m1.put(k("a"), 1).unwrap();
    assert_eq!(m1.get(&k("a")).unwrap(), Some(1));
    drop(m1);
    t1.commit().unwrap();

    let t2 = Transaction::begin(&engine);
    assert_eq!(t2.open_map(1).get(&k("a")).unwrap(), Some(1));
}

#[test]
fn test_write_write_conflict() {
    let engine: Arc<Engine> = MemoryEngine::new();

    let t1 = Transaction::begin(&engine);
    let m1 = t1.open_map(1);
    m1.put(k("a"), 1).unwrap();

    let t2 = Transaction::begin(&engine);
    let m2 = t2.open_map(1);
    assert!(!m2.try_put(k("a"), 2).unwrap());
    // the loser still reads the pre-state
    assert_eq!(m2.get(&k("a")).unwrap(), None);

    drop(m1);
    t1.commit().unwrap();
    assert!(m2.try_put(k("a"), 2).unwrap());
    assert_eq!(m2.get(&k("a")).unwrap(), Some(2));
}

#[test]
fn test_snapshot_read_over_foreign_uncommitted() {
    let engine: Arc<Engine> = MemoryEngine::new();

    let t1 = Transaction::begin(&engine);
    t1.open_map(1).put(k("a"), 1).unwrap();
    t1.commit().unwrap();

    let t2 = Transaction::begin(&engine);
    let m2 = t2.open_map(1);
    assert_eq!(m2.get(&k("a")).unwrap(), Some(1));

    let t3 = Transaction::begin(&engine);
    let m3 = t3.open_map(1);
    m3.put(k("a"), 2).unwrap();

    // the uncommitted foreign write is invisible
    assert_eq!(m2.get(&k("a")).unwrap(), Some(1));

    drop(m3);
    t3.commit().unwrap();
    // the commit point flips visibility atomically
    assert_eq!(m2.get(&k("a")).unwrap(), Some(2));
}

#[test]
fn test_savepoint_rollback() {
    let engine: Arc<Engine> = MemoryEngine::new();

    let t1 = Transaction::begin(&engine);
    let map = t1.open_map(1);
    map.put(k("x"), 10).unwrap();
    let savepoint = t1.set_savepoint("s");
    map.put(k("x"), 11).unwrap();
    map.put(k("y"), 20).unwrap();

    t1.rollback_to_savepoint(savepoint).unwrap();
    assert_eq!(map.get(&k("x")).unwrap(), Some(10));
    assert_eq!(map.get(&k("y")).unwrap(), None);
}

#[test]
fn test_at_most_one_writer() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    let engine: Arc<Engine> = MemoryEngine::new();
    let setup = Transaction::begin(&engine);
    setup.open_map(1).put_committed(k("contended"), 0);
    setup.commit().unwrap();

    const WRITERS: usize = 8;
    let barrier = Arc::new(Barrier::new(WRITERS));
    let wins = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for value in 1..=WRITERS as i64 {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        let wins = Arc::clone(&wins);
        handles.push(std::thread::spawn(move || {
            let txn = Transaction::begin(&engine);
            let won = {
                let map = txn.open_map(1);
                barrier.wait();
                let won = map.try_put(k("contended"), value).unwrap();
                if won {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
                // nobody resolves before everyone has attempted
                barrier.wait();
                won
            };
            if won {
                txn.commit().unwrap();
            } else {
                txn.rollback();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    let observer = Transaction::begin(&engine);
    let value = observer.open_map(1).get(&k("contended")).unwrap().unwrap();
    assert!((1..=WRITERS as i64).contains(&value));
    assert_eq!(engine.undo_len(), 0);
}

#[test]
fn test_iteration_visibility_matches_get() {
    let engine: Arc<Engine> = MemoryEngine::new();
    let t1 = Transaction::begin(&engine);
    let m1 = t1.open_map(1);
    for (key, value) in [("a", 1i64), ("b", 2), ("c", 3), ("d", 4)] {
        m1.put_committed(k(key), value);
    }
    m1.remove(k("b")).unwrap();
    m1.put(k("e"), 5).unwrap();

    let iterated: Vec<(String, i64)> = m1.entries(None).map(|e| e.unwrap()).collect();
    let mut expected = Vec::new();
    for key in ["a", "b", "c", "d", "e"] {
        if let Some(v) = m1.get(&k(key)).unwrap() {
            expected.push((k(key), v));
        }
    }
    assert_eq!(iterated, expected);
}

#[test]
fn test_size_bounds() {
    let engine: Arc<Engine> = MemoryEngine::new();
    let txn = Transaction::begin(&engine);
    let map = txn.open_map(1);
    for i in 0..10i64 {
        map.put_committed(k(&format!("k{i}")), i);
    }
    for i in 0..5i64 {
        map.remove(k(&format!("k{i}"))).unwrap();
    }
    assert!(map.size().unwrap() <= map.size_max());
    assert_eq!(map.size().unwrap(), 5);

    txn.rollback();
    let observer = Transaction::begin(&engine);
    let map = observer.open_map(1);
    // after the only writer rolled back, estimate and bound agree
    assert_eq!(map.size().unwrap(), map.size_max());
    assert_eq!(map.size().unwrap(), 10);
}

#[test]
fn test_tombstone_equivalence() {
    let engine: Arc<Engine> = MemoryEngine::new();
    let setup = Transaction::begin(&engine);
    setup.open_map(1).put_committed(k("a"), 1);
    setup.commit().unwrap();

    let t1 = Transaction::begin(&engine);
    let m1 = t1.open_map(1);
    m1.remove(k("a")).unwrap();
    assert_eq!(m1.get(&k("a")).unwrap(), None);

    // a foreign observer at the pre-remove snapshot still sees the value
    let t2 = Transaction::begin(&engine);
    assert_eq!(t2.open_map(1).get(&k("a")).unwrap(), Some(1));
}
