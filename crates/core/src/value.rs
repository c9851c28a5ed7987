//! Versioned map entries
//!
//! Every physical entry in a transactional map is a [`VersionedValue`]: the
//! stored value (or a tombstone) together with the [`OpId`] of the write
//! that produced it. An entry whose op id is `OpId::COMMITTED` is shared
//! and immutable; any other op id means the entry is owned by the writing
//! transaction until that transaction commits or rolls back.

use crate::ids::OpId;
use serde::{Deserialize, Serialize};

/// A stored entry together with the identity of the write that made it.
///
/// `value == None` encodes a tombstone (a logical delete that is still a
/// physical entry). Equality covers both fields; the storage layer's
/// compare-and-swap uses exactly this equality, so a concurrent writer that
/// changes either the value or its ownership makes the swap fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue<V> {
    /// Identity of the last write; `OpId::COMMITTED` once the writer committed.
    pub op_id: OpId,
    /// The stored value, or `None` for a logical delete.
    pub value: Option<V>,
}

impl<V> VersionedValue<V> {
    /// Build an entry owned by the write `op_id`.
    pub fn new(op_id: OpId, value: Option<V>) -> Self {
        VersionedValue { op_id, value }
    }

    /// Build a committed entry.
    pub fn committed(value: V) -> Self {
        VersionedValue {
            op_id: OpId::COMMITTED,
            value: Some(value),
        }
    }

    /// Build a tombstone owned by the write `op_id`.
    pub fn tombstone(op_id: OpId) -> Self {
        VersionedValue { op_id, value: None }
    }

    /// Whether the entry is committed (owned by nobody).
    pub fn is_committed(&self) -> bool {
        self.op_id.is_committed()
    }

    /// Whether the entry is a logical delete.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

impl<V: Clone> VersionedValue<V> {
    /// The same value with committed ownership; used when a transaction's
    /// writes are retired at commit.
    pub fn committed_clone(&self) -> Self {
        VersionedValue {
            op_id: OpId::COMMITTED,
            value: self.value.clone(),
        }
    }
}
