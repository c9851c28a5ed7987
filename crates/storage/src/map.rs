//! The ordered persistent map contract
//!
//! [`StorageMap`] is the seam between the transaction layer and whatever
//! actually stores bytes. The transaction layer needs exactly three atomic
//! primitives from it: `get`, `put_if_absent` and `replace` (a
//! compare-and-swap on value equality), plus ordered navigation and
//! forward cursors. `replace` is what serializes writers on a single key.

use lattice_core::Result;

/// Forward cursor over an ordered map.
///
/// Cursors are weakly consistent: they are not required to observe writes
/// made after creation, and they may fail with
/// [`Error::ChunkNotFound`](lattice_core::Error::ChunkNotFound) when
/// storage compacts a page away mid-iteration. Callers tolerate that by
/// reseeking from the last observed key.
pub trait Cursor<K, V> {
    /// Advance and return the next entry in key order, or `None` when the
    /// map is exhausted.
    fn next_entry(&mut self) -> Result<Option<(K, V)>>;
}

/// Contract of the ordered persistent map the transaction layer sits on.
///
/// Implementations provide their own internal concurrency: `get`,
/// `put_if_absent` and `replace` must be atomic with respect to each other.
/// Everything else may be weakly consistent.
pub trait StorageMap<K, V>: Send + Sync {
    /// Read the entry stored under `key`.
    fn get(&self, key: &K) -> Option<V>;

    /// Store `value` under `key`, returning the displaced entry.
    fn put(&self, key: K, value: V) -> Option<V>;

    /// Store `value` only if `key` is absent; returns the existing entry
    /// when the insert loses.
    fn put_if_absent(&self, key: K, value: V) -> Option<V>;

    /// Compare-and-swap: store `value` under `key` only if the current
    /// entry equals `expected` under [`values_equal`](Self::values_equal).
    fn replace(&self, key: &K, expected: &V, value: V) -> bool;

    /// Remove the entry stored under `key`, returning it.
    fn remove_key(&self, key: &K) -> Option<V>;

    /// Smallest key in the map.
    fn first_key(&self) -> Option<K>;

    /// Largest key in the map.
    fn last_key(&self) -> Option<K>;

    /// Smallest key strictly greater than `key`.
    fn higher_key(&self, key: &K) -> Option<K>;

    /// Largest key strictly smaller than `key`.
    fn lower_key(&self, key: &K) -> Option<K>;

    /// Smallest key greater than or equal to `key`.
    fn ceiling_key(&self, key: &K) -> Option<K>;

    /// Largest key smaller than or equal to `key`.
    fn floor_key(&self, key: &K) -> Option<K>;

    /// The key at rank `index` (0-based), if in range.
    fn key_at(&self, index: u64) -> Option<K>;

    /// Rank of `key`: `Ok(index)` when present, `Err(insertion_point)`
    /// when absent.
    fn index_of(&self, key: &K) -> std::result::Result<u64, u64>;

    /// Number of entries.
    fn len(&self) -> u64;

    /// Whether the map holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a forward cursor starting at the smallest key `>= from`
    /// (or the smallest key overall when `from` is `None`).
    fn cursor(&self, from: Option<K>) -> Box<dyn Cursor<K, V> + Send + '_>;

    /// Remove every entry.
    fn clear(&self);

    /// Mark the map closed; a closed map keeps no entries.
    fn close(&self);

    /// Whether [`close`](Self::close) was called.
    fn is_closed(&self) -> bool;

    /// Hint that the map's content is transient and need not survive.
    fn set_volatile(&self, is_volatile: bool);

    /// Whether the map is marked transient.
    fn is_volatile(&self) -> bool;

    /// The value equality `replace` compares with.
    fn values_equal(&self, a: &V, b: &V) -> bool;
}
