use super::*;
use tempfile::tempdir;

fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    names.sort();
    Ok(names)
}

// -------------------- Flush pipeline --------------------

#[test]
fn write_empty_memtable_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mem = Memtable::new();
    let err = write_from_memtable(dir.path(), 0, &TableOptions::default(), &mem).unwrap_err();
    assert!(err.to_string().contains("empty"));
    assert!(file_names(dir.path())?.is_empty(), "no files for an empty memtable");
    Ok(())
}

#[test]
fn flush_creates_three_files() -> Result<()> {
    let dir = tempdir()?;
    let mem = sample_memtable();
    let (pending, _table) = write_from_memtable(dir.path(), 7, &TableOptions::default(), &mem)?;
    pending.commit();

    assert_eq!(
        file_names(dir.path())?,
        vec!["sst-7.bloom", "sst-7.data", "sst-7.index"]
    );
    Ok(())
}

#[test]
fn flush_records_table_info() -> Result<()> {
    let dir = tempdir()?;
    let mem = sample_memtable();
    let (pending, table) = write_from_memtable(dir.path(), 3, &TableOptions::default(), &mem)?;
    let info = *pending.info();
    pending.commit();

    assert_eq!(info.id, 3);
    assert_eq!(info.num_entries, 4);
    assert_eq!(info.max_seq, 4);
    let len = std::fs::metadata(dir.path().join(info.data_file()))?.len();
    assert_eq!(info.data_size, len);
    assert_eq!(table.info(), &info);
    Ok(())
}

#[test]
fn flushed_table_answers_like_the_memtable() -> Result<()> {
    let dir = tempdir()?;
    let mem = Memtable::new();
    for i in 0..500u32 {
        let key = format!("k{:04}", i * 2).into_bytes();
        if i % 7 == 0 {
            mem.delete(key).unwrap();
        } else {
            mem.put(key, format!("v{}", i).into_bytes()).unwrap();
        }
    }
    let opts = TableOptions {
        index_gap_bytes: 256,
        ..TableOptions::default()
    };
    let (pending, table) = write_from_memtable(dir.path(), 0, &opts, &mem)?;
    pending.commit();

    // Present keys, absent keys in between, and keys outside the range.
    for i in 0..1_001u32 {
        let key = format!("k{:04}", i).into_bytes();
        assert_eq!(table.get(&key)?, mem.get_entry(&key), "key {}", i);
    }
    assert_eq!(table.get(b"a")?, None);
    assert_eq!(table.get(b"z")?, None);
    Ok(())
}

#[test]
fn uncommitted_pending_table_is_removed() -> Result<()> {
    let dir = tempdir()?;
    let mem = sample_memtable();
    let (pending, table) = write_from_memtable(dir.path(), 1, &TableOptions::default(), &mem)?;
    drop(table);
    pending.discard();
    assert!(file_names(dir.path())?.is_empty());
    Ok(())
}

// -------------------- Builder --------------------

#[test]
fn builder_rejects_out_of_order_keys() -> Result<()> {
    let dir = tempdir()?;
    let mut builder = TableBuilder::create(dir.path(), 0, &TableOptions::default(), 2)?;
    let (k, e) = put("b", "1", 1);
    builder.add(&k, &e)?;
    let (k, e) = put("a", "2", 2);
    assert!(builder.add(&k, &e).is_err());
    let (k, e) = put("b", "3", 3);
    assert!(builder.add(&k, &e).is_err(), "duplicate key must be rejected");
    Ok(())
}

#[test]
fn builder_rejects_oversized_entries() -> Result<()> {
    let dir = tempdir()?;
    let mut builder = TableBuilder::create(dir.path(), 0, &TableOptions::default(), 1)?;
    let big_key = vec![b'k'; MAX_KEY_BYTES + 1];
    assert!(builder.add(&big_key, &ValueEntry { seq: 1, value: None }).is_err());
    assert!(builder.add(b"", &ValueEntry { seq: 1, value: None }).is_err());
    Ok(())
}

#[test]
fn builder_dropped_mid_write_leaves_no_files() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut builder = TableBuilder::create(dir.path(), 9, &TableOptions::default(), 100)?;
        for (k, e) in numbered(100) {
            builder.add(&k, &e)?;
        }
        assert!(builder.data_size() > 0);
        assert_eq!(builder.num_entries(), 100);
        // Interrupted before the bloom and index files are written.
    }
    assert!(file_names(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn finish_without_entries_fails_and_cleans_up() -> Result<()> {
    let dir = tempdir()?;
    let builder = TableBuilder::create(dir.path(), 0, &TableOptions::default(), 0)?;
    assert!(builder.finish().is_err());
    assert!(file_names(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn create_fails_when_directory_is_missing() -> Result<()> {
    let dir = tempdir()?;
    let missing = dir.path().join("nope");
    assert!(TableBuilder::create(&missing, 0, &TableOptions::default(), 1).is_err());
    Ok(())
}

// -------------------- Index density --------------------

#[test]
fn gap_zero_indexes_every_record() -> Result<()> {
    let dir = tempdir()?;
    let opts = TableOptions {
        index_gap_bytes: 0,
        ..TableOptions::default()
    };
    let entries = numbered(50);
    let table = write_table(dir.path(), 0, &opts, &entries)?;
    assert_eq!(table.index().len(), 50);
    for (k, e) in &entries {
        assert_eq!(table.get(k)?.as_ref(), Some(e));
    }
    Ok(())
}

#[test]
fn gap_beyond_file_size_gives_single_checkpoint() -> Result<()> {
    let dir = tempdir()?;
    let opts = TableOptions {
        index_gap_bytes: u64::MAX,
        ..TableOptions::default()
    };
    let entries = numbered(50);
    let table = write_table(dir.path(), 0, &opts, &entries)?;
    assert_eq!(table.index().len(), 1);
    for (k, e) in &entries {
        assert_eq!(table.get(k)?.as_ref(), Some(e));
    }
    Ok(())
}

#[test]
fn sparse_index_checkpoints_respect_gap() -> Result<()> {
    let dir = tempdir()?;
    let opts = TableOptions {
        index_gap_bytes: 100,
        ..TableOptions::default()
    };
    let table = write_table(dir.path(), 0, &opts, &numbered(200))?;
    let entries = table.index().entries();
    assert!(entries.len() > 1 && entries.len() < 200);
    assert_eq!(entries[0].offset, 0);
    for pair in entries.windows(2) {
        assert!(pair[1].offset - pair[0].offset >= 100);
    }
    Ok(())
}

// -------------------- Bloom policy --------------------

#[test]
fn fixed_bloom_policy_sets_file_size() -> Result<()> {
    let dir = tempdir()?;
    let opts = TableOptions {
        bloom: bloom::BloomPolicy::Fixed {
            num_bytes: 512,
            num_hashes: 4,
        },
        ..TableOptions::default()
    };
    write_table(dir.path(), 0, &opts, &numbered(10))?;
    let len = std::fs::metadata(dir.path().join(bloom_file_name(0)))?.len();
    assert_eq!(len, 12 + 512);
    Ok(())
}

#[test]
fn file_names_parse_back() {
    assert_eq!(parse_file_name(&data_file_name(12)), Some((12, "data")));
    assert_eq!(parse_file_name(&index_file_name(0)), Some((0, "index")));
    assert_eq!(parse_file_name(&bloom_file_name(u64::MAX)), Some((u64::MAX, "bloom")));
    assert_eq!(parse_file_name("sst-1.tmp"), None);
    assert_eq!(parse_file_name("sst-x.data"), None);
    assert_eq!(parse_file_name("MANIFEST"), None);
}
