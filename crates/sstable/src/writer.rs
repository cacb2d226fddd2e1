use anyhow::{anyhow, bail, ensure, Context, Result};
use bloom::{BloomFilter, BloomPolicy};
use memtable::{Memtable, ValueEntry};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::format::{encode_index_record, encode_record, MAX_KEY_BYTES, MAX_VALUE_BYTES};
use crate::group::{sync_dir, FileGroup};
use crate::index::IndexBuilder;
use crate::info::{table_paths, SSTableInfo};
use crate::SSTable;

/// Default sparse index gap (64 KiB).
pub const DEFAULT_INDEX_GAP_BYTES: u64 = 64 * 1024;

/// Knobs shared by every table an engine writes and opens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableOptions {
    /// Minimum distance in bytes between two sparse index checkpoints.
    pub index_gap_bytes: u64,
    pub bloom: BloomPolicy,
    /// Serve reads from a read-only memory map instead of buffered reads.
    pub use_mmap: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            index_gap_bytes: DEFAULT_INDEX_GAP_BYTES,
            bloom: BloomPolicy::default(),
            use_mmap: false,
        }
    }
}

/// Streams sorted entries into the three files of a new table.
///
/// The data, index and bloom files are created up front as one [`FileGroup`].
/// Entries go straight to the data file while the sparse index and the bloom
/// filter are built in memory; [`finish`](TableBuilder::finish) writes both
/// out and fsyncs everything.
///
/// Dropping a builder (or hitting an error anywhere before the table is
/// committed) removes every file it created.
pub struct TableBuilder {
    dir: PathBuf,
    id: u64,
    opts: TableOptions,
    data: BufWriter<File>,
    index_file: File,
    bloom_file: File,
    index: IndexBuilder,
    bloom: BloomFilter,
    record_buf: Vec<u8>,
    offset: u64,
    num_entries: u64,
    max_seq: u64,
    last_key: Option<Vec<u8>>,
    // Last, so file handles above are closed before the group removes files.
    group: FileGroup,
}

impl TableBuilder {
    /// Creates `sst-<id>.{data,index,bloom}` in `dir`.
    ///
    /// `expected_entries` sizes the bloom filter when the policy is
    /// rate-based. Over-estimating is safe; under-estimating raises the
    /// false-positive rate.
    pub fn create(dir: &Path, id: u64, opts: &TableOptions, expected_entries: usize) -> Result<Self> {
        let mut group = FileGroup::create(&table_paths(dir, id))
            .with_context(|| format!("open files for table {}", id))?;
        let data = group.take(0).ok_or_else(|| anyhow!("data file handle missing"))?;
        let index_file = group.take(1).ok_or_else(|| anyhow!("index file handle missing"))?;
        let bloom_file = group.take(2).ok_or_else(|| anyhow!("bloom file handle missing"))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            id,
            opts: *opts,
            data: BufWriter::new(data),
            index_file,
            bloom_file,
            index: IndexBuilder::new(opts.index_gap_bytes),
            bloom: opts.bloom.build(expected_entries),
            record_buf: Vec::with_capacity(256),
            offset: 0,
            num_entries: 0,
            max_seq: 0,
            last_key: None,
            group,
        })
    }

    /// Appends one entry. Keys must be strictly ascending.
    pub fn add(&mut self, key: &[u8], entry: &ValueEntry) -> Result<()> {
        ensure!(!key.is_empty(), "empty key");
        ensure!(key.len() <= MAX_KEY_BYTES, "key of {} bytes exceeds maximum", key.len());
        if let Some(v) = &entry.value {
            ensure!(v.len() <= MAX_VALUE_BYTES, "value of {} bytes exceeds maximum", v.len());
        }
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                bail!("keys out of order: {:?} after {:?}", key, last);
            }
        }

        self.record_buf.clear();
        encode_record(&mut self.record_buf, key, entry);
        self.data.write_all(&self.record_buf)?;

        self.index.observe(key, self.offset);
        self.bloom.insert(key);

        self.offset += self.record_buf.len() as u64;
        self.num_entries += 1;
        self.max_seq = self.max_seq.max(entry.seq);
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bytes written to the data file so far.
    pub fn data_size(&self) -> u64 {
        self.offset
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Writes the bloom and index files and fsyncs all three.
    ///
    /// The result is not yet visible to anyone: the files are removed again
    /// unless the returned [`PendingTable`] is committed.
    pub fn finish(self) -> Result<PendingTable> {
        let TableBuilder {
            dir,
            id,
            opts,
            data,
            mut index_file,
            bloom_file,
            index,
            bloom,
            offset,
            num_entries,
            max_seq,
            group,
            ..
        } = self;

        if num_entries == 0 {
            bail!("refusing to write an empty SSTable (no entries)");
        }

        let data = data.into_inner().map_err(|e| e.into_error())?;
        data.sync_all().context("sync data file")?;

        let mut bloom_out = BufWriter::new(bloom_file);
        bloom.write_to(&mut bloom_out)?;
        let bloom_file = bloom_out.into_inner().map_err(|e| e.into_error())?;
        bloom_file.sync_all().context("sync bloom file")?;

        let mut index_buf = Vec::new();
        for e in index.entries() {
            encode_index_record(&mut index_buf, &e.key, e.offset);
        }
        index_file.write_all(&index_buf)?;
        index_file.sync_all().context("sync index file")?;

        sync_dir(&dir)?;

        let info = SSTableInfo {
            id,
            num_entries,
            data_size: offset,
            max_seq,
        };
        tracing::debug!(
            table = id,
            entries = num_entries,
            data_bytes = offset,
            index_entries = index.entries().len(),
            "table files written"
        );

        Ok(PendingTable {
            info,
            dir,
            use_mmap: opts.use_mmap,
            group,
        })
    }
}

/// A fully written table that has not been published yet.
#[derive(Debug)]
pub struct PendingTable {
    info: SSTableInfo,
    dir: PathBuf,
    use_mmap: bool,
    group: FileGroup,
}

impl PendingTable {
    pub fn info(&self) -> &SSTableInfo {
        &self.info
    }

    /// Opens the written table for reading and verifies every record.
    pub fn open(&self) -> Result<SSTable> {
        let table = SSTable::open(&self.dir, self.info, self.use_mmap)?;
        table.verify()?;
        Ok(table)
    }

    /// Keeps the files on disk for good.
    pub fn commit(self) {
        self.group.commit();
    }

    /// Removes the files. Same as dropping the pending table.
    pub fn discard(self) {
        self.group.rollback();
    }
}

/// Flush pipeline: writes one frozen memtable as table `id` and opens it.
///
/// On any failure, including the post-write validation, every file created
/// here is removed and the error is returned; the memtable is untouched.
pub fn write_from_memtable(
    dir: &Path,
    id: u64,
    opts: &TableOptions,
    mem: &Memtable,
) -> Result<(PendingTable, SSTable)> {
    if mem.is_empty() {
        bail!("refusing to write an empty SSTable (empty memtable)");
    }
    let mut builder = TableBuilder::create(dir, id, opts, mem.len())?;
    for (key, entry) in mem.scan() {
        builder.add(&key, &entry)?;
    }
    let pending = builder.finish()?;
    let table = pending.open()?;
    Ok((pending, table))
}
