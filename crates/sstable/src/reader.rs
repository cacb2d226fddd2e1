use anyhow::{Context, Result};
use bloom::BloomFilter;
use memmap2::Mmap;
use memtable::ValueEntry;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::cmp::Ordering as KeyOrdering;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::CorruptionError;
use crate::format::{decode_index_records, RecordReader};
use crate::index::{IndexEntry, SparseIndex};
use crate::info::SSTableInfo;

/// Where record bytes are read from.
enum DataFile {
    /// Seek + read through a shared handle.
    Buffered(Mutex<BufReader<File>>),
    /// Read-only mapping of the whole data file.
    Mapped(Mmap),
}

impl DataFile {
    fn read_range(&self, range: Range<u64>) -> std::io::Result<Cow<'_, [u8]>> {
        match self {
            DataFile::Buffered(file) => {
                let mut buf = vec![0u8; (range.end - range.start) as usize];
                let mut f = file.lock();
                f.seek(SeekFrom::Start(range.start))?;
                f.read_exact(&mut buf)?;
                Ok(Cow::Owned(buf))
            }
            DataFile::Mapped(map) => map
                .get(range.start as usize..range.end as usize)
                .map(Cow::Borrowed)
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof)),
        }
    }
}

/// The three files of a table. Removes them on drop once marked obsolete.
struct TableFiles {
    paths: [PathBuf; 3],
    obsolete: AtomicBool,
}

impl Drop for TableFiles {
    fn drop(&mut self) {
        if !self.obsolete.load(Ordering::Acquire) {
            return;
        }
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove obsolete table file");
            }
        }
    }
}

/// Read handle over one immutable on-disk table.
///
/// On [`open`](SSTable::open) the sparse index and the bloom filter are loaded
/// into memory and checked; the data file stays on disk and is read range by
/// range, either through a mutex-guarded buffered handle or through a
/// read-only memory map. Both paths return identical results.
///
/// A table is shared as `Arc<SSTable>`. Its files are released when the last
/// reference drops, and deleted at that point if the table was
/// [marked obsolete](SSTable::mark_obsolete) by a compaction.
pub struct SSTable {
    info: SSTableInfo,
    index: SparseIndex,
    bloom: BloomFilter,
    data: DataFile,
    files: TableFiles,
}

impl SSTable {
    /// Opens table `info.id` in `dir`.
    ///
    /// Fails if any file is missing, if the data file size disagrees with
    /// `info`, if the bloom checksum does not match, or if the index is not
    /// strictly ordered. Record checksums are checked lazily on read; use
    /// [`verify`](SSTable::verify) for a full pass.
    pub fn open(dir: &Path, info: SSTableInfo, use_mmap: bool) -> Result<Self> {
        let paths = info.paths(dir);
        let [data_path, index_path, bloom_path] = &paths;

        if info.num_entries == 0 || info.data_size == 0 {
            return Err(CorruptionError::new(data_path, "table metadata describes an empty table").into());
        }

        let file = File::open(data_path).with_context(|| format!("open {}", data_path.display()))?;
        let len = file.metadata()?.len();
        if len != info.data_size {
            return Err(CorruptionError::new(
                data_path,
                format!("data file is {} bytes, expected {}", len, info.data_size),
            )
            .into());
        }

        let bloom_bytes = fs::read(bloom_path).with_context(|| format!("read {}", bloom_path.display()))?;
        let bloom = BloomFilter::read_from(&mut bloom_bytes.as_slice())
            .map_err(|e| CorruptionError::new(bloom_path, e.to_string()))?;

        let index_bytes = fs::read(index_path).with_context(|| format!("read {}", index_path.display()))?;
        let entries = decode_index_records(&index_bytes)
            .map_err(|reason| CorruptionError::new(index_path, reason))?
            .into_iter()
            .map(|(key, offset)| IndexEntry { key, offset })
            .collect();
        let index = SparseIndex::from_entries(entries, info.data_size)
            .map_err(|reason| CorruptionError::new(index_path, reason))?;

        let data = if use_mmap {
            // SAFETY: table files are never modified after they are written;
            // the map is read-only and lives no longer than the table.
            let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", data_path.display()))?;
            DataFile::Mapped(map)
        } else {
            DataFile::Buffered(Mutex::new(BufReader::new(file)))
        };

        tracing::debug!(
            table = info.id,
            entries = info.num_entries,
            index_entries = index.len(),
            mmap = use_mmap,
            "opened table"
        );

        Ok(Self {
            info,
            index,
            bloom,
            data,
            files: TableFiles {
                paths,
                obsolete: AtomicBool::new(false),
            },
        })
    }

    pub fn info(&self) -> &SSTableInfo {
        &self.info
    }

    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn len(&self) -> u64 {
        self.info.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.info.num_entries == 0
    }

    pub fn max_seq(&self) -> u64 {
        self.info.max_seq
    }

    pub fn index(&self) -> &SparseIndex {
        &self.index
    }

    /// Point lookup.
    ///
    /// Returns the stored entry, which may be a tombstone, or `None` if the
    /// key is not in this table.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }
        let range = match self.index.locate(key) {
            Some(r) => r,
            None => return Ok(None),
        };

        let buf = self.read_range(range.clone())?;
        let mut records = RecordReader::new(&buf);
        while let Some((k, entry)) = records
            .next_record()
            .map_err(|reason| self.corrupt(format!("{} (segment at {})", reason, range.start)))?
        {
            match k.as_slice().cmp(key) {
                KeyOrdering::Less => continue,
                KeyOrdering::Equal => return Ok(Some(entry)),
                KeyOrdering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Ascending scan over entries with `key >= start`, tombstones included.
    ///
    /// The iterator holds its own reference to the table, so the files stay
    /// readable while it is alive.
    pub fn scan_from(self: &Arc<Self>, start: &[u8]) -> TableIter {
        TableIter {
            table: Arc::clone(self),
            start: start.to_vec(),
            segment: self.index.segment_for(start),
            buffered: VecDeque::new(),
            done: false,
        }
    }

    pub fn iter(self: &Arc<Self>) -> TableIter {
        self.scan_from(&[])
    }

    /// Decodes every record and checks it against the index, the bloom
    /// filter and the metadata.
    pub fn verify(&self) -> Result<()> {
        let buf = self.read_range(0..self.info.data_size)?;
        let mut records = RecordReader::new(&buf);
        let mut checkpoints = self.index.entries().iter().peekable();
        let mut last: Option<Vec<u8>> = None;
        let mut count = 0u64;
        let mut max_seq = 0u64;

        loop {
            let offset = records.position() as u64;
            let (key, entry) = match records.next_record().map_err(|r| self.corrupt(r))? {
                Some(rec) => rec,
                None => break,
            };

            if let Some(prev) = &last {
                if key <= *prev {
                    return Err(self.corrupt(format!("keys not ascending at offset {}", offset)));
                }
            }
            if let Some(cp) = checkpoints.peek() {
                if cp.offset == offset {
                    if cp.key != key {
                        return Err(self.corrupt(format!("index key mismatch at offset {}", offset)));
                    }
                    checkpoints.next();
                } else if cp.offset < offset {
                    return Err(self.corrupt(format!("index offset {} is not a record boundary", cp.offset)));
                }
            }
            if !self.bloom.may_contain(&key) {
                return Err(self.corrupt(format!("bloom filter is missing a key at offset {}", offset)));
            }

            count += 1;
            max_seq = max_seq.max(entry.seq);
            last = Some(key);
        }

        if checkpoints.next().is_some() {
            return Err(self.corrupt("index points past the last record".to_string()));
        }
        if count != self.info.num_entries {
            return Err(self.corrupt(format!(
                "table holds {} entries, metadata says {}",
                count, self.info.num_entries
            )));
        }
        if max_seq != self.info.max_seq {
            return Err(self.corrupt(format!(
                "max sequence {} does not match metadata {}",
                max_seq, self.info.max_seq
            )));
        }
        Ok(())
    }

    /// Schedules the table files for deletion once the last reference drops.
    pub fn mark_obsolete(&self) {
        self.files.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.files.obsolete.load(Ordering::Acquire)
    }

    fn read_range(&self, range: Range<u64>) -> Result<Cow<'_, [u8]>> {
        self.data
            .read_range(range.clone())
            .with_context(|| format!("read {:?} from {}", range, self.data_path().display()))
    }

    fn data_path(&self) -> &Path {
        &self.files.paths[0]
    }

    fn corrupt(&self, reason: String) -> anyhow::Error {
        CorruptionError::new(self.data_path(), reason).into()
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("info", &self.info)
            .field("index_entries", &self.index.len())
            .field("mmap", &matches!(self.data, DataFile::Mapped(_)))
            .finish()
    }
}

/// Lazy ascending iterator over one table, reading one index segment at a time.
pub struct TableIter {
    table: Arc<SSTable>,
    start: Vec<u8>,
    segment: usize,
    buffered: VecDeque<(Vec<u8>, ValueEntry)>,
    done: bool,
}

impl TableIter {
    fn load_segment(&mut self) -> Result<()> {
        let range = self.table.index.segment(self.segment);
        self.segment += 1;
        let buf = self.table.read_range(range.clone())?;
        let mut records = RecordReader::new(&buf);
        while let Some((key, entry)) = records
            .next_record()
            .map_err(|reason| self.table.corrupt(format!("{} (segment at {})", reason, range.start)))?
        {
            if key.as_slice() >= self.start.as_slice() {
                self.buffered.push_back((key, entry));
            }
        }
        Ok(())
    }
}

impl Iterator for TableIter {
    type Item = Result<(Vec<u8>, ValueEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(Ok(item));
            }
            if self.done || self.segment >= self.table.index.len() {
                return None;
            }
            if let Err(e) = self.load_segment() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
