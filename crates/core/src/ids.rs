//! Identifier types for the transaction layer
//!
//! Every write is identified by an [`OpId`] packing the writing
//! transaction's id into the high 32 bits and that transaction's
//! per-write sequence number (the log id) into the low 32 bits. The zero
//! value is reserved: a stored entry carrying `OpId::COMMITTED` belongs to
//! no live transaction.
//!
//! Transaction-id parity is a protocol signal: even ids are locally
//! authoritative, odd ids mark in-doubt transactions whose commit status
//! must be resolved through external validation before their writes can be
//! trusted.

use serde::{Deserialize, Serialize};

/// Identifier of a transaction.
///
/// Even ids are local transactions; odd ids are in-doubt (remotely
/// coordinated) transactions. Allocation starts at 2 and 1 respectively so
/// that no live write ever packs to the committed sentinel.
pub type TxnId = u32;

/// Per-transaction write sequence number; strictly increasing while the
/// transaction is open.
pub type LogId = u32;

/// Identifier of one logical map within an engine.
pub type MapId = u32;

/// Packed identity of a single write within a single transaction.
///
/// Layout: `(txn_id << 32) | log_id`. The packing is invertible through
/// [`OpId::txn_id`] and [`OpId::log_id`], and total order on `OpId` is
/// (transaction, log) order, which makes per-transaction ranges contiguous
/// in any ordered container keyed by the raw value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId(u64);

impl OpId {
    /// The reserved id carried by committed entries.
    pub const COMMITTED: OpId = OpId(0);

    /// Pack a transaction id and log id into one 64-bit identity.
    #[inline]
    pub fn pack(txn_id: TxnId, log_id: LogId) -> Self {
        OpId(((txn_id as u64) << 32) | log_id as u64)
    }

    /// Reconstruct an id from its raw 64-bit representation.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        OpId(raw)
    }

    /// The raw 64-bit representation.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// The transaction that performed the write.
    #[inline]
    pub fn txn_id(self) -> TxnId {
        (self.0 >> 32) as TxnId
    }

    /// The write's position in its transaction's log.
    #[inline]
    pub fn log_id(self) -> LogId {
        self.0 as LogId
    }

    /// Whether this is the committed sentinel.
    #[inline]
    pub fn is_committed(self) -> bool {
        self.0 == 0
    }

    /// Whether the writing transaction is in-doubt (odd id).
    #[inline]
    pub fn is_in_doubt(self) -> bool {
        self.txn_id() & 1 == 1
    }
}

impl std::fmt::Debug for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_committed() {
            write!(f, "OpId(committed)")
        } else {
            write!(f, "OpId({}:{})", self.txn_id(), self.log_id())
        }
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_committed() {
            write!(f, "committed")
        } else {
            write!(f, "{}:{}", self.txn_id(), self.log_id())
        }
    }
}
