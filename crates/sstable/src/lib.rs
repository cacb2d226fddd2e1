//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the storage engine.
//!
//! When a [`memtable::Memtable`] is frozen the engine flushes it to disk as an
//! SSTable. SSTables are *write-once, read-many*: once created they are never
//! modified, only replaced during compaction.
//!
//! ## Files
//!
//! Each table `N` consists of three files in the data directory:
//!
//! ```text
//! sst-N.data   [body_len u32][crc32 u32][key_len u32][key][seq u64][flags u8][val_len u32][value] ...
//! sst-N.index  [body_len u32][data_offset u64][key] ...            (sparse)
//! sst-N.bloom  [num_hashes u32][num_bytes u32][crc32 u32][bits]
//! ```
//!
//! All integers are little-endian. Records in the data file are sorted by
//! key. The index holds a checkpoint for the first record and for every
//! record starting at least `index_gap_bytes` after the previous checkpoint,
//! so a lookup reads one bounded segment of the data file.
//!
//! ## Write path
//!
//! [`TableBuilder`] opens the three files as one [`FileGroup`], streams
//! entries into the data file, then writes the bloom filter and the index.
//! The result is a [`PendingTable`]: until it is committed, dropping it
//! removes every file.
//!
//! ## Read path
//!
//! [`SSTable::get`] checks the bloom filter, asks the [`SparseIndex`] for a
//! byte range and decodes records in it until the key is found or passed.
//! [`SSTable::scan_from`] and [`MergeIterator`] provide ordered scans.
//!
//! Corrupt files surface as [`CorruptionError`] inside `anyhow::Error`.

mod error;
mod format;
mod group;
mod index;
mod info;
mod merge;
mod reader;
mod writer;

pub use error::{is_corruption, CorruptionError};
pub use format::{
    bloom_file_name, data_file_name, index_file_name, parse_file_name, MAX_KEY_BYTES,
    MAX_VALUE_BYTES,
};
pub use group::{sync_dir, FileGroup};
pub use index::{IndexBuilder, IndexEntry, SparseIndex};
pub use info::{table_paths, SSTableInfo};
pub use merge::{EntryStream, MergeIterator};
pub use reader::{SSTable, TableIter};
pub use writer::{write_from_memtable, PendingTable, TableBuilder, TableOptions, DEFAULT_INDEX_GAP_BYTES};

#[cfg(test)]
mod tests;
