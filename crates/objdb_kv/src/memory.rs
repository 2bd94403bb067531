//! In-memory KV store for testing and ephemeral databases.

use crate::error::{KvError, KvResult};
use crate::store::{KvStore, KvTransaction};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Mutation counters shared between a [`MemoryKvStore`] and its transactions.
///
/// Tests use these to verify that logically redundant operations (for
/// example, rewriting a field with its current value) touch the store
/// zero times.
#[derive(Debug, Default)]
pub struct KvStats {
    puts: AtomicU64,
    removes: AtomicU64,
}

impl KvStats {
    /// Number of `put` calls issued, including counter adjustments.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `remove` and `remove_range` calls issued.
    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::SeqCst)
    }

    /// Total mutations issued.
    pub fn mutations(&self) -> u64 {
        self.puts() + self.removes()
    }
}

/// An in-memory ordered KV store.
///
/// Each transaction takes a snapshot of the committed map at open time and
/// applies its writes back atomically at commit. This is sufficient isolation
/// for a single-writer embedding and for tests; concurrency control beyond
/// that is out of scope for this store.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    stats: Arc<KvStats>,
}

impl MemoryKvStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared mutation counters.
    #[must_use]
    pub fn stats(&self) -> Arc<KvStats> {
        Arc::clone(&self.stats)
    }

    /// Returns a copy of the committed contents.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.data.read().clone()
    }

    /// Number of committed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the committed map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn transaction(&self) -> Box<dyn KvTransaction> {
        Box::new(MemoryKvTransaction {
            data: self.data.read().clone(),
            committed: Arc::clone(&self.data),
            stats: Arc::clone(&self.stats),
            completed: false,
        })
    }
}

/// A transaction over a [`MemoryKvStore`].
pub struct MemoryKvTransaction {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    committed: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    stats: Arc<KvStats>,
    completed: bool,
}

impl MemoryKvTransaction {
    fn check_open(&self) -> KvResult<()> {
        if self.completed {
            Err(KvError::AlreadyCompleted)
        } else {
            Ok(())
        }
    }
}

impl KvTransaction for MemoryKvTransaction {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.check_open()?;
        self.stats.puts.fetch_add(1, Ordering::SeqCst);
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> KvResult<()> {
        self.check_open()?;
        self.stats.removes.fetch_add(1, Ordering::SeqCst);
        self.data.remove(key);
        Ok(())
    }

    fn remove_range(&mut self, min: &[u8], max: Option<&[u8]>) -> KvResult<()> {
        self.check_open()?;
        if let Some(max) = max {
            if min > max {
                return Err(KvError::InvalidRange {
                    min: min.to_vec(),
                    max: max.to_vec(),
                });
            }
        }
        self.stats.removes.fetch_add(1, Ordering::SeqCst);
        let doomed: Vec<Vec<u8>> = self
            .data
            .range(range_bounds(min, max))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.data.remove(&key);
        }
        Ok(())
    }

    fn next_entry(&self, min: &[u8], max: Option<&[u8]>) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.check_open()?;
        Ok(self
            .data
            .range(range_bounds(min, max))
            .next()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn adjust_counter(&mut self, key: &[u8], delta: i64) -> KvResult<()> {
        self.check_open()?;
        let current = match self.data.get(key) {
            Some(bytes) => self.decode_counter(bytes)?,
            None => 0,
        };
        let encoded = self.encode_counter(current.wrapping_add(delta));
        self.stats.puts.fetch_add(1, Ordering::SeqCst);
        self.data.insert(key.to_vec(), encoded);
        Ok(())
    }

    fn commit(&mut self) -> KvResult<()> {
        self.check_open()?;
        self.completed = true;
        *self.committed.write() = std::mem::take(&mut self.data);
        Ok(())
    }

    fn rollback(&mut self) -> KvResult<()> {
        self.check_open()?;
        self.completed = true;
        self.data.clear();
        Ok(())
    }
}

fn range_bounds<'a>(
    min: &'a [u8],
    max: Option<&'a [u8]>,
) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let upper = match max {
        Some(max) => Bound::Excluded(max.to_vec()),
        None => Bound::Unbounded,
    };
    (Bound::Included(min.to_vec()), upper)
}
