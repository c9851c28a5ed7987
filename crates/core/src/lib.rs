//! Core types for the lattice transactional map layer
//!
//! This crate defines the fundamental vocabulary shared by every other
//! crate in the workspace:
//! - [`OpId`]: packed identity of a single write (transaction id + log id)
//! - [`VersionedValue`]: a stored entry together with the write that made it
//! - [`Error`]: the boundary error type with canonical error codes
//!
//! Nothing in here touches storage or synchronization; it is the pure data
//! model the transaction layer is built from.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ids;
pub mod value;

pub use error::{Error, Result};
pub use ids::{LogId, MapId, OpId, TxnId};
pub use value::VersionedValue;
