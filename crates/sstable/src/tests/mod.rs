mod writer_tests;

use crate::*;
use anyhow::Result;
use memtable::{Memtable, ValueEntry};
use std::path::Path;
use std::sync::Arc;

pub(crate) fn put(key: &str, value: &str, seq: u64) -> (Vec<u8>, ValueEntry) {
    (
        key.as_bytes().to_vec(),
        ValueEntry {
            seq,
            value: Some(value.as_bytes().to_vec()),
        },
    )
}

pub(crate) fn del(key: &str, seq: u64) -> (Vec<u8>, ValueEntry) {
    (key.as_bytes().to_vec(), ValueEntry { seq, value: None })
}

/// Writes `entries` (already sorted) as table `id` and commits it.
pub(crate) fn write_table(
    dir: &Path,
    id: u64,
    opts: &TableOptions,
    entries: &[(Vec<u8>, ValueEntry)],
) -> Result<Arc<SSTable>> {
    let mut builder = TableBuilder::create(dir, id, opts, entries.len())?;
    for (k, e) in entries {
        builder.add(k, e)?;
    }
    let pending = builder.finish()?;
    let table = pending.open()?;
    pending.commit();
    Ok(Arc::new(table))
}

pub(crate) fn sample_memtable() -> Memtable {
    let m = Memtable::new();
    m.put(b"a".to_vec(), b"apple".to_vec()).unwrap();
    m.put(b"b".to_vec(), b"banana".to_vec()).unwrap();
    m.put(b"c".to_vec(), b"".to_vec()).unwrap(); // present but empty
    m.delete(b"d".to_vec()).unwrap(); // tombstone
    m
}

pub(crate) fn numbered(n: usize) -> Vec<(Vec<u8>, ValueEntry)> {
    (0..n)
        .map(|i| {
            (
                format!("key{:05}", i).into_bytes(),
                ValueEntry {
                    seq: i as u64 + 1,
                    value: Some(format!("value{:05}", i).into_bytes()),
                },
            )
        })
        .collect()
}
