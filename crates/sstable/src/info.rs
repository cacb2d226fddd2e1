use std::path::{Path, PathBuf};

use crate::format::{bloom_file_name, data_file_name, index_file_name};

/// Persistent metadata of one on-disk table. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SSTableInfo {
    /// Allocation-ordered table id.
    pub id: u64,
    pub num_entries: u64,
    /// Size of `sst-<id>.data` in bytes.
    pub data_size: u64,
    /// Highest sequence number stored in the table.
    pub max_seq: u64,
}

impl SSTableInfo {
    pub fn data_file(&self) -> String {
        data_file_name(self.id)
    }

    pub fn index_file(&self) -> String {
        index_file_name(self.id)
    }

    pub fn bloom_file(&self) -> String {
        bloom_file_name(self.id)
    }

    /// Paths of the data, index and bloom files inside `dir`.
    pub fn paths(&self, dir: &Path) -> [PathBuf; 3] {
        table_paths(dir, self.id)
    }
}

/// Paths of the data, index and bloom files of table `id` inside `dir`.
pub fn table_paths(dir: &Path, id: u64) -> [PathBuf; 3] {
    [
        dir.join(data_file_name(id)),
        dir.join(index_file_name(id)),
        dir.join(bloom_file_name(id)),
    ]
}
