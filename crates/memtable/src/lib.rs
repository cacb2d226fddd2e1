//! # Memtable
//!
//! The mutable, sorted in-memory table that absorbs every write before it is
//! flushed to an SSTable.
//!
//! * Entries are ordered lexicographically by key (`BTreeMap`).
//! * At most one entry per key; a later write replaces the earlier one.
//! * Deletes are stored as tombstones (`value == None`) so they shadow older
//!   data once flushed.
//! * Sequence numbers are drawn from a [`Sequence`] shared by every memtable
//!   of an engine, *inside* the table's write lock. Once a table is frozen no
//!   further numbers are drawn for it, so every entry of a newer memtable
//!   carries a higher sequence than every entry of an older one.
//!
//! All methods take `&self`; structural mutations are serialized by an
//! internal `RwLock`, reads share it.
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::{Bound, Deref};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// ValueEntry stores the sequence number and the optional value.
/// `value == None` signifies a tombstone (delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: u64,
    pub value: Option<Vec<u8>>,
}

impl ValueEntry {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemtableError {
    /// The table was frozen and no longer accepts writes.
    #[error("memtable is frozen")]
    Frozen,
}

/// Monotonic sequence counter shared between memtables.
///
/// Holds the last assigned number; [`Sequence::next`] returns the following one.
#[derive(Debug, Default)]
pub struct Sequence(AtomicU64);

impl Sequence {
    /// Creates a counter whose next assigned number is `last + 1`.
    pub fn new(last: u64) -> Self {
        Self(AtomicU64::new(last))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last assigned sequence number (0 if none).
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Inner {
    map: BTreeMap<Vec<u8>, ValueEntry>,
    approx_size: usize,
    frozen: bool,
}

#[derive(Debug)]
pub struct Memtable {
    inner: RwLock<Inner>,
    seq: Arc<Sequence>,
}

impl Memtable {
    /// Creates an empty table with its own sequence counter.
    pub fn new() -> Self {
        Self::with_sequence(Arc::new(Sequence::default()))
    }

    /// Creates an empty table drawing sequence numbers from `seq`.
    pub fn with_sequence(seq: Arc<Sequence>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            seq,
        }
    }

    /// Shared sequence counter, for installing a successor table.
    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.seq
    }

    /// Inserts or overwrites `key`, returning the assigned sequence number.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<u64, MemtableError> {
        self.insert(key, Some(value))
    }

    /// Writes a tombstone for `key`, returning the assigned sequence number.
    pub fn delete(&self, key: Vec<u8>) -> Result<u64, MemtableError> {
        self.insert(key, None)
    }

    fn insert(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<u64, MemtableError> {
        let mut inner = self.inner.write();
        if inner.frozen {
            return Err(MemtableError::Frozen);
        }

        let seq = self.seq.next();
        let added = key.len() + value.as_ref().map_or(0, Vec::len);
        let key_len = key.len();
        if let Some(old) = inner.map.insert(key, ValueEntry { seq, value }) {
            let removed = key_len + old.value.as_ref().map_or(0, Vec::len);
            inner.approx_size = inner.approx_size.saturating_sub(removed);
        }
        inner.approx_size += added;
        Ok(seq)
    }

    /// Get the latest value if present and not a tombstone
    pub fn get(&self, key: &[u8]) -> Option<(u64, Vec<u8>)> {
        let inner = self.inner.read();
        inner
            .map
            .get(key)
            .and_then(|e| e.value.as_ref().map(|v| (e.seq, v.clone())))
    }

    /// Returns the stored entry for `key`, tombstones included.
    pub fn get_entry(&self, key: &[u8]) -> Option<ValueEntry> {
        self.inner.read().map.get(key).cloned()
    }

    /// Marks the table read-only. Idempotent.
    pub fn freeze(&self) {
        self.inner.write().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.read().frozen
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().map.is_empty()
    }

    /// Approximate payload size (keys + live values) in bytes.
    pub fn approx_size(&self) -> usize {
        self.inner.read().approx_size
    }

    /// Highest sequence number stored in this table (0 if empty).
    pub fn max_seq(&self) -> u64 {
        self.inner.read().map.values().map(|e| e.seq).max().unwrap_or(0)
    }

    /// Ordered scan over every entry.
    pub fn scan(&self) -> Scan<&Memtable> {
        Scan::new(self, Vec::new())
    }

    /// Ordered scan over entries with `key >= start`.
    pub fn scan_from(&self, start: &[u8]) -> Scan<&Memtable> {
        Scan::new(self, start.to_vec())
    }

    /// Returns the first entry strictly after `after` (or at/after `start`
    /// when `after` is `None`).
    fn next_after(&self, start: &[u8], after: Option<&[u8]>) -> Option<(Vec<u8>, ValueEntry)> {
        let lower = match after {
            Some(k) => Bound::Excluded(k),
            None => Bound::Included(start),
        };
        let inner = self.inner.read();
        inner
            .map
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy, restartable, ascending scan over a memtable.
///
/// Each step re-acquires the read lock and seeks past the last returned key,
/// so the scan never holds the lock between items. On a frozen table the
/// result is a stable point-in-time view; on a live table concurrent writes
/// to keys not yet visited may be observed.
///
/// Generic over the handle so it can borrow (`&Memtable`) or co-own
/// (`Arc<Memtable>`) the table.
pub struct Scan<M: Deref<Target = Memtable>> {
    table: M,
    start: Vec<u8>,
    last: Option<Vec<u8>>,
}

impl<M: Deref<Target = Memtable>> Scan<M> {
    pub fn new(table: M, start: Vec<u8>) -> Self {
        Self {
            table,
            start,
            last: None,
        }
    }

    /// Restarts the scan from its original start key.
    pub fn rewind(&mut self) {
        self.last = None;
    }
}

impl<M: Deref<Target = Memtable>> Iterator for Scan<M> {
    type Item = (Vec<u8>, ValueEntry);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, entry) = self.table.next_after(&self.start, self.last.as_deref())?;
        self.last = Some(key.clone());
        Some((key, entry))
    }
}

#[cfg(test)]
mod tests;
