//! Transactional map layer
//!
//! This crate implements multi-version concurrency control over an ordered
//! [`StorageMap`](lattice_storage::StorageMap):
//! - [`UndoLog`]: ordered record of displaced versions, shared by all
//!   transactions of one engine
//! - [`TransactionEngine`]: id allocation, the undo log, validation of
//!   in-doubt transactions, commit and rollback
//! - [`Transaction`]: a single writer's context (log position, status,
//!   savepoints)
//! - [`TransactionMap`]: the per-transaction view over one map: snapshot
//!   reads, optimistic writes, visibility-filtered navigation and iteration
//!
//! # Concurrency model
//!
//! Each transaction is owned by one thread at a time; many transactions run
//! in parallel over the same storage. Writers never block: a write against
//! a key held by another local transaction fails with
//! `TRANSACTION_LOCKED` and any waiting is the caller's business. Readers
//! reconstruct the version visible at their read point by walking the undo
//! log, so writers never block readers either.
//!
//! The undo-log mutex is leaf-level: no storage lock is ever acquired while
//! it is held.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod map;
pub mod transaction;
pub mod undo;

pub use engine::TransactionEngine;
pub use map::{EntryIterator, KeyIterator, TransactionMap};
pub use transaction::{Transaction, TransactionStatus, TransactionValidator};
pub use undo::{UndoEntry, UndoLog};

use lattice_core::VersionedValue;
use lattice_storage::MemoryMap;

/// Engine over the in-memory reference storage.
pub type MemoryEngine<K, V> = TransactionEngine<K, V, MemoryMap<K, VersionedValue<V>>>;
