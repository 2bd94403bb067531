//! KV store and transaction trait definitions.

use crate::error::{KvError, KvResult};

/// An ordered key/value store that hands out transactions.
///
/// Stores are opaque byte maps with lexicographically ordered keys. All
/// isolation and locking between transactions is the store's concern; the
/// object layer wraps exactly one [`KvTransaction`] at a time and adds no
/// cross-transaction coordination of its own.
pub trait KvStore: Send + Sync {
    /// Opens a new transaction against this store.
    fn transaction(&self) -> Box<dyn KvTransaction>;
}

/// A single transaction over an ordered key/value store.
///
/// # Invariants
///
/// - Keys are byte strings ordered lexicographically (unsigned bytes)
/// - `get` returns exactly the bytes previously `put` at that key
/// - `scan` yields entries in ascending key order
/// - Counter operations are atomic within the transaction; the store may
///   additionally merge concurrent counter adjustments at commit
///
/// After `commit` or `rollback` succeeds, every further operation fails
/// with [`KvError::AlreadyCompleted`].
pub trait KvTransaction: Send {
    /// Reads the value stored at `key`, if any.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Stores `value` at `key`, replacing any existing value.
    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Removes the entry at `key`. Removing an absent key is a no-op.
    fn remove(&mut self, key: &[u8]) -> KvResult<()>;

    /// Removes all entries with `min <= key < max`.
    ///
    /// A `max` of `None` means "to the end of the key space".
    fn remove_range(&mut self, min: &[u8], max: Option<&[u8]>) -> KvResult<()>;

    /// Returns the first entry with `min <= key < max`, if any.
    ///
    /// This is the cursor primitive: callers step through a range by
    /// repeatedly asking for the first entry at or after a moving lower
    /// bound, so every access observes the store's current state.
    fn next_entry(&self, min: &[u8], max: Option<&[u8]>) -> KvResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Collects all entries with `min <= key < max` in ascending key order.
    fn scan(&self, min: &[u8], max: Option<&[u8]>) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        let mut lower = min.to_vec();
        while let Some((key, value)) = self.next_entry(&lower, max)? {
            lower = key_after(&key);
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// Encodes a counter value into its stored representation.
    fn encode_counter(&self, value: i64) -> Vec<u8> {
        value.to_le_bytes().to_vec()
    }

    /// Decodes a stored counter representation.
    fn decode_counter(&self, bytes: &[u8]) -> KvResult<i64> {
        let array: [u8; 8] = bytes
            .try_into()
            .map_err(|_| KvError::InvalidCounter { len: bytes.len() })?;
        Ok(i64::from_le_bytes(array))
    }

    /// Atomically adds `delta` to the counter stored at `key`.
    ///
    /// An absent counter reads as zero. The object layer never performs a
    /// read-modify-write for counter adjustment; atomicity is the store's
    /// responsibility.
    fn adjust_counter(&mut self, key: &[u8], delta: i64) -> KvResult<()>;

    /// Commits the transaction, making all writes durable and visible.
    fn commit(&mut self) -> KvResult<()>;

    /// Rolls the transaction back, discarding all writes.
    fn rollback(&mut self) -> KvResult<()>;
}

/// Returns the smallest key strictly greater than `key`.
fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0x00);
    next
}

/// Computes the exclusive upper bound of the range of keys starting with
/// `prefix`.
///
/// Returns `None` when no such bound exists (the prefix is empty or all
/// `0xff`), meaning the range extends to the end of the key space.
#[must_use]
pub fn key_after_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(&last) = bound.last() {
        if last == 0xff {
            bound.pop();
        } else {
            let end = bound.len() - 1;
            bound[end] = last + 1;
            return Some(bound);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn key_after_prefix_simple() {
        assert_eq!(key_after_prefix(&[1, 2, 3]), Some(vec![1, 2, 4]));
    }

    #[test]
    fn key_after_prefix_trailing_ff() {
        assert_eq!(key_after_prefix(&[1, 0xff, 0xff]), Some(vec![2]));
    }

    #[test]
    fn key_after_prefix_all_ff() {
        assert_eq!(key_after_prefix(&[0xff, 0xff]), None);
    }

    #[test]
    fn key_after_prefix_empty() {
        assert_eq!(key_after_prefix(&[]), None);
    }

    #[test]
    fn key_after_prefix_bounds_the_prefix_range() {
        let prefix = vec![7, 0xff, 3];
        let bound = key_after_prefix(&prefix).unwrap();
        // Every key starting with the prefix sorts below the bound.
        let mut extended = prefix.clone();
        extended.extend_from_slice(&[0xff, 0xff]);
        assert!(prefix < bound);
        assert!(extended < bound);
    }

    proptest! {
        #[test]
        fn key_after_prefix_is_exclusive_upper_bound(
            prefix in proptest::collection::vec(any::<u8>(), 0..12),
            suffix in proptest::collection::vec(any::<u8>(), 0..12),
        ) {
            match key_after_prefix(&prefix) {
                Some(bound) => {
                    // Any key extending the prefix sorts below the bound, and
                    // the bound itself does not start with the prefix.
                    let mut extended = prefix.clone();
                    extended.extend_from_slice(&suffix);
                    prop_assert!(prefix < bound);
                    prop_assert!(extended < bound);
                    prop_assert!(!bound.starts_with(&prefix));
                }
                None => prop_assert!(prefix.iter().all(|&b| b == 0xff)),
            }
        }
    }
}
