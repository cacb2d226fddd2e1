//! Cold-start path: load the manifest, open every listed table, and remove
//! files left behind by an interrupted flush or compaction.
use anyhow::{Context, Result};
use sstable::{parse_file_name, SSTable};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::manifest::{Manifest, MANIFEST_TMP_FILENAME};

pub(crate) struct Recovered {
    pub(crate) manifest: Manifest,
    /// Oldest first, as listed in the manifest.
    pub(crate) tables: Vec<Arc<SSTable>>,
    pub(crate) last_seq: u64,
    pub(crate) next_table_id: u64,
}

/// Rebuilds the table set stored under `dir`.
///
/// # Errors
///
/// Fails if the manifest cannot be parsed or any table it lists is missing or
/// corrupt. Startup never continues with a partial table set.
pub(crate) fn recover(dir: &Path, use_mmap: bool) -> Result<Recovered> {
    fs::create_dir_all(dir).with_context(|| format!("create data root {}", dir.display()))?;

    let manifest = Manifest::load(dir)?;

    let mut tables = Vec::with_capacity(manifest.tables.len());
    for info in &manifest.tables {
        let table = SSTable::open(dir, *info, use_mmap)
            .with_context(|| format!("open table {} listed in manifest", info.id))?;
        tables.push(Arc::new(table));
    }

    let live: HashSet<u64> = manifest.tables.iter().map(|t| t.id).collect();
    let removed = remove_garbage(dir, &live)?;
    if removed > 0 {
        tracing::warn!(files = removed, "removed files not referenced by the manifest");
    }

    let last_seq = manifest.tables.iter().map(|t| t.max_seq).max().unwrap_or(0);
    let next_table_id = manifest
        .tables
        .iter()
        .map(|t| t.id + 1)
        .max()
        .unwrap_or(0)
        .max(manifest.next_table_id);

    Ok(Recovered {
        manifest,
        tables,
        last_seq,
        next_table_id,
    })
}

/// Removes table files whose id is not in `live`, and a stale `MANIFEST.tmp`.
///
/// Returns the number of files removed.
fn remove_garbage(dir: &Path, live: &HashSet<u64>) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(n) => n,
            None => continue,
        };

        let garbage = match parse_file_name(name) {
            Some((id, _)) => !live.contains(&id),
            None => name == MANIFEST_TMP_FILENAME,
        };
        if garbage {
            tracing::warn!(file = name, "removing leftover file");
            fs::remove_file(entry.path()).with_context(|| format!("remove {}", name))?;
            removed += 1;
        }
    }
    Ok(removed)
}
