//! Read path: `get()` and `scan()`.
//!
//! Both capture the current [`Version`](crate::Version) once and never touch
//! the engine lock again, so a concurrent flush or compaction cannot change
//! what an in-flight read sees.
use anyhow::Result;
use memtable::{Scan as MemScan, ValueEntry};
use sstable::{EntryStream, MergeIterator};
use std::sync::Arc;

use crate::write::validate_key;
use crate::Engine;

impl Engine {
    /// Looks up `key`, returning its live value.
    ///
    /// Checks the active memtable, frozen memtables newest first, then tables
    /// newest first. The first entry found decides: a tombstone means `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if a table read fails (I/O or corruption).
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let version = self.shared.current();

        if let Some(entry) = version.active.get_entry(key) {
            return Ok(entry.value);
        }
        for mem in &version.frozen {
            if let Some(entry) = mem.get_entry(key) {
                return Ok(entry.value);
            }
        }
        for table in version.tables.iter().rev() {
            if let Some(entry) = table.get(key)? {
                return Ok(entry.value);
            }
        }
        Ok(None)
    }

    /// Ascending scan over live keys `>= start`.
    ///
    /// The scan reads a snapshot taken now: later writes, flushes and
    /// compactions do not affect it. Entries of the active memtable are
    /// copied up front; frozen memtables and tables are read lazily.
    pub fn scan(&self, start: &[u8]) -> Result<Scan> {
        let version = self.shared.current();
        let mut sources: Vec<EntryStream> = Vec::with_capacity(1 + version.frozen.len() + version.tables.len());

        let active: Vec<(Vec<u8>, ValueEntry)> = version.active.scan_from(start).collect();
        sources.push(Box::new(active.into_iter().map(Ok::<_, anyhow::Error>)));
        for mem in &version.frozen {
            sources.push(Box::new(MemScan::new(Arc::clone(mem), start.to_vec()).map(Ok::<_, anyhow::Error>)));
        }
        for table in version.tables.iter().rev() {
            sources.push(Box::new(table.scan_from(start)));
        }

        Ok(Scan {
            merged: MergeIterator::new(sources),
        })
    }
}

/// Lazy iterator returned by [`Engine::scan`].
///
/// Yields `(key, value)` pairs in ascending key order, newest version per
/// key, tombstones suppressed. Holds references to the tables it reads, so
/// their files outlive any compaction that replaces them mid-scan.
pub struct Scan {
    merged: MergeIterator,
}

impl Iterator for Scan {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.merged.next()? {
                Ok((key, ValueEntry { value: Some(v), .. })) => return Some(Ok((key, v))),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
