//! Sparse index: periodic `(key, data offset)` checkpoints into a data file.
//!
//! While a data file is written, an [`IndexEntry`] is recorded for the first
//! record and then only when the record starts at least `gap` bytes after the
//! last recorded offset. A gap of 0 indexes every record; a gap larger than
//! the data file leaves a single checkpoint.
//!
//! [`SparseIndex::locate`] turns a key into a byte range `[lo, hi)` that must
//! contain the key's record if the key is present in the table.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub offset: u64,
}

/// Incrementally decides which records get an index entry.
#[derive(Debug)]
pub struct IndexBuilder {
    gap: u64,
    last_offset: Option<u64>,
    entries: Vec<IndexEntry>,
}

impl IndexBuilder {
    pub fn new(gap: u64) -> Self {
        Self {
            gap,
            last_offset: None,
            entries: Vec::new(),
        }
    }

    /// Observes a record written at `offset`. Records must arrive in
    /// ascending key and offset order.
    pub fn observe(&mut self, key: &[u8], offset: u64) {
        let due = match self.last_offset {
            None => true,
            Some(last) => offset - last >= self.gap,
        };
        if due {
            self.entries.push(IndexEntry {
                key: key.to_vec(),
                offset,
            });
            self.last_offset = Some(offset);
        }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn finish(self, data_size: u64) -> SparseIndex {
        SparseIndex {
            entries: self.entries,
            data_size,
        }
    }
}

/// Loaded sparse index of one table.
#[derive(Debug, Clone)]
pub struct SparseIndex {
    entries: Vec<IndexEntry>,
    data_size: u64,
}

impl SparseIndex {
    /// Builds an index from decoded entries, checking the ordering invariants.
    pub fn from_entries(entries: Vec<IndexEntry>, data_size: u64) -> Result<Self, String> {
        if data_size == 0 {
            if !entries.is_empty() {
                return Err("index entries for an empty data file".into());
            }
        } else {
            match entries.first() {
                None => return Err("missing index for non-empty data file".into()),
                Some(first) if first.offset != 0 => {
                    return Err(format!("first index entry at offset {}, expected 0", first.offset))
                }
                _ => {}
            }
        }

        for pair in entries.windows(2) {
            if pair[0].key >= pair[1].key {
                return Err("index keys are not strictly increasing".into());
            }
            if pair[0].offset >= pair[1].offset {
                return Err("index offsets are not strictly increasing".into());
            }
        }
        if let Some(last) = entries.last() {
            if last.offset >= data_size {
                return Err(format!(
                    "index offset {} beyond data size {}",
                    last.offset, data_size
                ));
            }
        }

        Ok(Self { entries, data_size })
    }

    /// Byte range that contains `key`'s record if the key is present.
    ///
    /// `None` means the key sorts before the first indexed key, which proves
    /// it is absent.
    pub fn locate(&self, key: &[u8]) -> Option<Range<u64>> {
        let idx = self.entries.partition_point(|e| e.key.as_slice() <= key);
        if idx == 0 {
            return None;
        }
        Some(self.segment(idx - 1))
    }

    /// Byte range of the `i`-th segment (between checkpoint `i` and `i + 1`).
    pub fn segment(&self, i: usize) -> Range<u64> {
        let lo = self.entries[i].offset;
        let hi = self
            .entries
            .get(i + 1)
            .map_or(self.data_size, |e| e.offset);
        lo..hi
    }

    /// Index of the segment where a scan starting at `key` must begin.
    pub fn segment_for(&self, key: &[u8]) -> usize {
        self.entries
            .partition_point(|e| e.key.as_slice() <= key)
            .saturating_sub(1)
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }
}
