//! Storage layer for lattice
//!
//! This crate provides the ordered-map seam the transaction layer sits on:
//! - [`StorageMap`]: the contract a persistent ordered map must satisfy
//!   (atomic get / put-if-absent / compare-and-swap, ordered navigation,
//!   cursors)
//! - [`MemoryMap`]: the in-memory reference implementation
//!
//! # Note on persistence
//!
//! Page layout, checkpointing and recovery are the storage engine's
//! business; this crate only fixes the interface. The one persistence
//! artifact that leaks through is [`Error::ChunkNotFound`]: cursors may
//! raise it when a page is compacted away mid-iteration, and callers are
//! expected to reseek.
//!
//! [`Error::ChunkNotFound`]: lattice_core::Error::ChunkNotFound

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod map;
pub mod memory;

pub use map::{Cursor, StorageMap};
pub use memory::MemoryMap;
