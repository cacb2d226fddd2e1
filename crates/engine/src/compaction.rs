//! Compaction: merges the oldest run of tables into fewer, larger tables.
//!
//! The inputs are always a contiguous run starting at the oldest table, and
//! the outputs take the run's place at the old end of the table list. That
//! keeps list position a valid recency order even though output ids are
//! larger than the ids of tables flushed after the inputs.
//!
//! Because no older table exists below the run, a tombstone that wins the
//! merge shadows nothing and is dropped.
//!
//! Outputs are written and verified through the same [`TableBuilder`] used
//! by flushes, then committed by one manifest rewrite. Input files are
//! deleted only when the last snapshot referencing them is gone.
use anyhow::{bail, Context, Result};
use sstable::{EntryStream, MergeIterator, PendingTable, SSTable, TableBuilder};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::{Engine, Shared};

/// Which tables a compaction run merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    /// The oldest `min(count, max_compaction_inputs)` tables, once the count
    /// reaches `compaction_trigger`.
    Triggered,
    /// Every published table.
    Full,
}

impl Engine {
    /// Merges every published table, dropping overwritten versions and
    /// tombstones. Blocks until the new table set is published.
    pub fn compact(&self) -> Result<()> {
        self.shared.compact(Scope::Full)?;
        Ok(())
    }
}

impl Shared {
    /// Runs one compaction. Returns `false` if there was nothing to merge.
    pub(crate) fn compact(&self, scope: Scope) -> Result<bool> {
        let _guard = self.compaction_lock.lock();

        let tables = self.current().tables.clone();
        let count = match scope {
            Scope::Full => tables.len(),
            Scope::Triggered => {
                if !self.needs_compaction() {
                    return Ok(false);
                }
                tables.len().min(self.cfg.max_compaction_inputs)
            }
        };
        if count == 0 {
            return Ok(false);
        }
        let inputs = &tables[..count];

        let outputs = self
            .merge(inputs)
            .with_context(|| format!("compact tables {:?}", ids(inputs)))?;
        let output_tables: Vec<Arc<SSTable>> = outputs.iter().map(|(_, t)| Arc::clone(t)).collect();

        let mut manifest = self.manifest.lock();
        let current = self.current().tables.clone();
        let still_oldest = current.len() >= count
            && current[..count]
                .iter()
                .zip(inputs)
                .all(|(a, b)| Arc::ptr_eq(a, b));
        if !still_oldest {
            bail!("table set changed under compaction");
        }

        let mut next_tables = output_tables.clone();
        next_tables.extend(current[count..].iter().cloned());
        let next = manifest.with_tables(
            next_tables.iter().map(|t| *t.info()).collect(),
            self.next_table_id.load(Ordering::SeqCst),
        );
        next.install().context("record compaction in manifest")?;
        for (pending, _) in outputs {
            pending.commit();
        }
        let synced = next.sync();
        *manifest = next;

        self.install(|v| v.tables = next_tables);
        drop(manifest);

        // Until the rename is durable the old manifest may come back after a
        // crash, so the inputs stay on disk. Recovery removes them otherwise.
        synced.context("sync data root after compaction")?;
        for t in inputs {
            t.mark_obsolete();
        }

        tracing::info!(
            inputs = ?ids(inputs),
            outputs = ?ids(&output_tables),
            entries = output_tables.iter().map(|t| t.len()).sum::<u64>(),
            "compaction finished"
        );
        Ok(true)
    }

    /// Merges `inputs` (oldest first) into zero or more verified, uncommitted
    /// tables of roughly `target_table_bytes` each.
    fn merge(&self, inputs: &[Arc<SSTable>]) -> Result<Vec<(PendingTable, Arc<SSTable>)>> {
        let total_entries: u64 = inputs.iter().map(|t| t.len()).sum();
        let total_bytes: u64 = inputs.iter().map(|t| t.index().data_size()).sum();
        let per_output = output_capacity(total_entries, total_bytes, self.cfg.target_table_bytes);
        let mut remaining = total_entries;
        let sources: Vec<EntryStream> = inputs
            .iter()
            .rev()
            .map(|t| Box::new(t.iter()) as EntryStream)
            .collect();

        let mut outputs = Vec::new();
        let mut builder: Option<TableBuilder> = None;

        for item in MergeIterator::new(sources) {
            if self.cancel.load(Ordering::SeqCst) {
                bail!("compaction cancelled");
            }
            let (key, entry) = item?;
            if entry.is_tombstone() {
                continue;
            }

            if builder.is_none() {
                builder = Some(TableBuilder::create(
                    &self.cfg.data_root,
                    self.allocate_table_id(),
                    &self.table_opts,
                    remaining.clamp(1, per_output) as usize,
                )?);
            }
            let full = match builder.as_mut() {
                Some(b) => {
                    b.add(&key, &entry)?;
                    b.data_size() >= self.cfg.target_table_bytes
                }
                None => false,
            };
            if full {
                if let Some(b) = builder.take() {
                    remaining = remaining.saturating_sub(b.num_entries());
                    outputs.push(seal(b)?);
                }
            }
        }
        if let Some(last) = builder.take() {
            outputs.push(seal(last)?);
        }
        Ok(outputs)
    }
}

/// Estimated entries per output table: the inputs' average record size
/// divided into `target_bytes`, so each bloom filter is sized for one output
/// rather than for the whole merge.
pub(crate) fn output_capacity(total_entries: u64, total_bytes: u64, target_bytes: u64) -> u64 {
    if total_entries == 0 {
        return 1;
    }
    let avg = (total_bytes / total_entries).max(1);
    (target_bytes / avg).saturating_add(1)
}

fn seal(builder: TableBuilder) -> Result<(PendingTable, Arc<SSTable>)> {
    let pending = builder.finish()?;
    let table = pending.open()?;
    Ok((pending, Arc::new(table)))
}

fn ids(tables: &[Arc<SSTable>]) -> Vec<u64> {
    tables.iter().map(|t| t.id()).collect()
}
