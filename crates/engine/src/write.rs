//! Write path: `put()`, `delete()` and memtable rotation.
//!
//! Writes go to the active memtable under the version read lock, so the
//! memtable cannot be swapped out mid-insert. Once the memtable holds
//! `max_memtable_entries` entries it is frozen and replaced under the write
//! lock, and the background flusher is woken. Writers never wait on disk I/O.
use anyhow::{ensure, Result};
use memtable::Memtable;
use std::sync::Arc;

use crate::{Engine, Shared, MAX_KEY_SIZE, MAX_VALUE_SIZE};

pub(crate) fn validate_key(key: &[u8]) -> Result<()> {
    ensure!(!key.is_empty(), "key must not be empty");
    ensure!(
        key.len() <= MAX_KEY_SIZE,
        "key too large: {} bytes (max {})",
        key.len(),
        MAX_KEY_SIZE
    );
    Ok(())
}

impl Engine {
    /// Inserts or overwrites `key`.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        validate_key(&key)?;
        ensure!(
            value.len() <= MAX_VALUE_SIZE,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        );
        self.apply(|mem| mem.put(key, value))
    }

    /// Deletes `key` by writing a tombstone that shadows older values.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        validate_key(&key)?;
        self.apply(|mem| mem.delete(key))
    }

    fn apply<F>(&self, write: F) -> Result<()>
    where
        F: FnOnce(&Memtable) -> Result<u64, memtable::MemtableError>,
    {
        let (active, len) = {
            let version = self.shared.version.read();
            write(version.active.as_ref())?;
            (Arc::clone(&version.active), version.active.len())
        };

        if len >= self.shared.cfg.max_memtable_entries && self.shared.freeze_active(Some(&active)) {
            self.request_flush();
        }
        Ok(())
    }

    /// Freezes the active memtable (if it holds anything) and flushes every
    /// frozen memtable before returning.
    pub fn flush(&self) -> Result<()> {
        self.shared.freeze_active(None);
        let flushed = self.shared.flush_frozen()?;
        if flushed > 0 && self.shared.needs_compaction() {
            self.request_compaction();
        }
        Ok(())
    }
}

impl Shared {
    /// Freezes the active memtable and installs an empty successor.
    ///
    /// With `expected`, only rotates if that memtable is still the active one,
    /// so concurrent writers crossing the threshold rotate once. Returns
    /// `true` if a memtable was frozen.
    pub(crate) fn freeze_active(&self, expected: Option<&Arc<Memtable>>) -> bool {
        let mut guard = self.version.write();
        if let Some(expected) = expected {
            if !Arc::ptr_eq(&guard.active, expected) {
                return false;
            }
        }
        if guard.active.is_empty() {
            return false;
        }

        guard.active.freeze();
        let mut next = crate::Version::clone(&guard);
        next.frozen.insert(0, Arc::clone(&guard.active));
        next.active = Arc::new(Memtable::with_sequence(Arc::clone(&self.seq)));
        tracing::debug!(
            entries = guard.active.len(),
            frozen = next.frozen.len(),
            "memtable frozen"
        );
        *guard = Arc::new(next);
        true
    }
}
