use super::helpers::*;
use crate::manifest::{Manifest, MANIFEST_FILENAME, MANIFEST_TMP_FILENAME};
use crate::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

fn flip_last_byte(path: &std::path::Path) -> Result<()> {
    let mut bytes = fs::read(path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(path, bytes)?;
    Ok(())
}

// --------------------- Reopen ---------------------

#[test]
fn open_creates_data_root() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("nested").join("db");
    let engine = open(&root)?;
    assert!(root.is_dir());
    assert_eq!(engine.stats().last_seq, 0);
    assert_eq!(engine.stats().table_count, 0);
    Ok(())
}

#[test]
fn close_then_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"a".to_vec(), b"1".to_vec())?;
        engine.put(b"b".to_vec(), b"2".to_vec())?;
        engine.delete(b"a".to_vec())?;
        engine.close()?;
    }

    let engine = open(dir.path())?;
    assert_eq!(engine.get(b"a")?, None);
    assert_eq!(get_str(&engine, "b")?, Some("2".into()));
    assert_eq!(engine.stats().last_seq, 3);
    Ok(())
}

#[test]
fn drop_flushes_memtable() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"k".to_vec(), b"v".to_vec())?;
    }
    assert_eq!(count_table_files(dir.path()), 1);

    let engine = open(dir.path())?;
    assert_eq!(get_str(&engine, "k")?, Some("v".into()));
    Ok(())
}

#[test]
fn sequence_resumes_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        for i in 0..10u8 {
            engine.put(vec![b'a' + i], vec![i])?;
        }
        engine.close()?;
    }

    let engine = open(dir.path())?;
    assert_eq!(engine.stats().last_seq, 10);
    engine.put(b"a".to_vec(), b"newer".to_vec())?;
    assert_eq!(engine.stats().last_seq, 11);
    engine.flush()?;
    assert_eq!(get_str(&engine, "a")?, Some("newer".into()));
    Ok(())
}

#[test]
fn reopen_many_times() -> Result<()> {
    let dir = tempdir()?;
    for round in 0..5u32 {
        let engine = open(dir.path())?;
        if round > 0 {
            let prev = format!("round{}", round - 1);
            assert_eq!(get_str(&engine, "latest")?, Some(prev.clone()));
            assert_eq!(get_str(&engine, &prev)?, Some("x".into()));
        }
        let name = format!("round{}", round);
        engine.put(b"latest".to_vec(), name.clone().into_bytes())?;
        engine.put(name.into_bytes(), b"x".to_vec())?;
        engine.close()?;
    }
    let engine = open(dir.path())?;
    assert_eq!(engine.stats().table_count, 5);
    assert_eq!(engine.stats().table_ids, vec![0, 1, 2, 3, 4]);
    Ok(())
}

// --------------------- Leftover files ---------------------

#[test]
fn unreferenced_table_files_are_removed() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"k".to_vec(), b"v".to_vec())?;
        engine.close()?;
    }

    // An interrupted flush: data written, never recorded in the manifest.
    fs::write(dir.path().join("sst-9.data"), b"partial")?;
    fs::write(dir.path().join("sst-9.index"), b"")?;
    fs::write(dir.path().join(MANIFEST_TMP_FILENAME), b"# half written")?;
    fs::write(dir.path().join("notes.txt"), b"keep me")?;

    let engine = open(dir.path())?;
    assert!(!dir.path().join("sst-9.data").exists());
    assert!(!dir.path().join("sst-9.index").exists());
    assert!(!dir.path().join(MANIFEST_TMP_FILENAME).exists());
    assert!(dir.path().join("notes.txt").exists());
    assert!(dir.path().join("sst-0.data").exists());
    assert_eq!(get_str(&engine, "k")?, Some("v".into()));

    // Ids continue from the manifest, not from the removed files.
    engine.put(b"j".to_vec(), b"w".to_vec())?;
    engine.flush()?;
    assert_eq!(engine.stats().table_ids, vec![0, 1]);
    Ok(())
}

#[test]
fn next_table_id_covers_listed_tables() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"k".to_vec(), b"v".to_vec())?;
        engine.close()?;
    }

    // A manifest whose counter lags behind its own tables.
    let manifest = Manifest::load(dir.path())?;
    manifest.with_tables(manifest.tables.clone(), 0).save()?;

    let engine = open(dir.path())?;
    engine.put(b"j".to_vec(), b"w".to_vec())?;
    engine.flush()?;
    assert_eq!(engine.stats().table_ids, vec![0, 1]);
    Ok(())
}

// --------------------- Failed startup ---------------------

#[test]
fn missing_table_file_fails_open() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"k".to_vec(), b"v".to_vec())?;
        engine.close()?;
    }
    fs::remove_file(dir.path().join("sst-0.index"))?;

    assert!(open(dir.path()).is_err());
    Ok(())
}

#[test]
fn corrupt_bloom_fails_open() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"k".to_vec(), b"v".to_vec())?;
        engine.close()?;
    }
    flip_last_byte(&dir.path().join("sst-0.bloom"))?;

    let err = open(dir.path()).unwrap_err();
    assert!(is_corruption(&err), "{:#}", err);
    Ok(())
}

#[test]
fn truncated_data_file_fails_open() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"k".to_vec(), b"v".to_vec())?;
        engine.close()?;
    }
    let path = dir.path().join("sst-0.data");
    let bytes = fs::read(&path)?;
    fs::write(&path, &bytes[..bytes.len() - 1])?;

    let err = open(dir.path()).unwrap_err();
    assert!(is_corruption(&err), "{:#}", err);
    Ok(())
}

#[test]
fn corrupt_record_fails_read() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"k".to_vec(), b"value".to_vec())?;
        engine.close()?;
    }
    flip_last_byte(&dir.path().join("sst-0.data"))?;

    let engine = open(dir.path())?;
    let err = engine.get(b"k").unwrap_err();
    assert!(is_corruption(&err), "{:#}", err);

    let scan_err = engine.scan(b"")?.find_map(|r| r.err());
    assert!(scan_err.map(|e| is_corruption(&e)).unwrap_or(false));
    Ok(())
}

#[test]
fn malformed_manifest_fails_open() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join(MANIFEST_FILENAME), "# lsm manifest\nbogus 1\n")?;
    assert!(open(dir.path()).is_err());
    Ok(())
}
