//! Flush pipeline: frozen memtable → durable, published table.
//!
//! 1. Allocate the next table id.
//! 2. Write `sst-<id>.{data,index,bloom}` from the memtable's ordered scan and
//!    open the result, verifying every record
//!    ([`sstable::write_from_memtable`]).
//! 3. Rewrite the manifest with the new table appended (commit point).
//! 4. Publish a version where the table replaces the frozen memtable.
//!
//! Any failure before the manifest rename in step 3 removes the new files;
//! the frozen memtable stays in the version, readable and queued for the
//! next attempt. After the rename the table is published even if the
//! directory fsync fails; that failure is still returned.
use anyhow::{Context, Result};
use memtable::Memtable;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::Shared;

impl Shared {
    /// Flushes every frozen memtable, oldest first. Returns how many were
    /// flushed. Stops at the first failure.
    pub(crate) fn flush_frozen(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock();
        let mut flushed = 0;
        loop {
            let oldest = self.current().frozen.last().cloned();
            match oldest {
                Some(mem) => self.flush_memtable(&mem)?,
                None => break,
            }
            flushed += 1;
        }
        Ok(flushed)
    }

    fn flush_memtable(&self, mem: &Arc<Memtable>) -> Result<()> {
        let id = self.allocate_table_id();
        let (pending, table) = sstable::write_from_memtable(&self.cfg.data_root, id, &self.table_opts, mem)
            .with_context(|| format!("flush memtable to table {}", id))?;
        let table = Arc::new(table);

        let mut manifest = self.manifest.lock();
        let mut tables = self.current().tables.clone();
        tables.push(Arc::clone(&table));
        let next = manifest.with_tables(
            tables.iter().map(|t| *t.info()).collect(),
            self.next_table_id.load(Ordering::SeqCst),
        );
        next.install()
            .with_context(|| format!("record table {} in manifest", id))?;
        // The manifest on disk names the table from here on.
        pending.commit();
        let synced = next.sync();
        *manifest = next;

        self.install(|v| {
            v.frozen.retain(|m| !Arc::ptr_eq(m, mem));
            v.tables = tables;
        });
        drop(manifest);
        synced.with_context(|| format!("sync data root after publishing table {}", id))?;

        tracing::info!(
            table = id,
            entries = table.len(),
            data_bytes = table.info().data_size,
            max_seq = table.max_seq(),
            "flushed memtable"
        );
        Ok(())
    }

    /// True when the background compactor has work to do.
    pub(crate) fn needs_compaction(&self) -> bool {
        let trigger = self.cfg.compaction_trigger;
        trigger > 0 && self.current().tables.len() >= trigger.max(2)
    }
}
