//! # Lattice
//!
//! Embedded transactional map layer: multi-version concurrency control
//! over an ordered key/value map, with snapshot reads, optimistic write
//! locking, savepoints and undo-log rollback.
//!
//! ## Quick start
//!
//! ```
//! use latticedb::{MemoryEngine, Transaction};
//!
//! let engine: std::sync::Arc<MemoryEngine<String, i64>> = MemoryEngine::new();
//!
//! let txn = Transaction::begin(&engine);
//! let map = txn.open_map(1);
//! map.put("answer".to_string(), 42)?;
//! assert_eq!(map.get(&"answer".to_string())?, Some(42));
//! drop(map);
//! txn.commit()?;
//!
//! // a later transaction sees the committed value
//! let txn = Transaction::begin(&engine);
//! assert_eq!(txn.open_map(1).get(&"answer".to_string())?, Some(42));
//! # Ok::<(), latticedb::Error>(())
//! ```
//!
//! ## Layers
//!
//! - [`lattice_core`]: ids, versioned values, boundary errors
//! - [`lattice_storage`]: the ordered-map contract and the in-memory
//!   reference implementation
//! - [`lattice_txn`]: engine, transactions, transactional maps
//! - [`lattice_sql`]: table schemas and the MERGE (upsert) statement

#![warn(missing_docs)]

// Core types
pub use lattice_core::{Error, LogId, MapId, OpId, Result, TxnId, VersionedValue};

// Storage seam
pub use lattice_storage::{Cursor, MemoryMap, StorageMap};

// Transaction layer
pub use lattice_txn::{
    MemoryEngine, Transaction, TransactionEngine, TransactionMap, TransactionStatus,
    TransactionValidator, UndoEntry, UndoLog,
};

// Statement surface
pub use lattice_sql::{
    feed_rows, parse_merge, Column, MergeStatement, Rights, RowSink, RowTrigger, Session,
    SqlEngine, SqlMap, SqlTransaction, SqlValue, Table, TableSchema,
};
