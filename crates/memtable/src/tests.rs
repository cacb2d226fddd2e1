use super::*;
use std::thread;

// -------------------- Basic CRUD --------------------

#[test]
fn put_and_get_single_key() {
    let m = Memtable::new();
    let seq = m.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
    assert_eq!(seq, 1);
    assert_eq!(m.len(), 1);
    assert_eq!(m.get(b"k1").unwrap(), (1, b"v1".to_vec()));
}

#[test]
fn later_put_replaces_in_place() {
    let m = Memtable::new();
    m.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
    m.put(b"k1".to_vec(), b"v2".to_vec()).unwrap();
    assert_eq!(m.len(), 1);
    assert_eq!(m.get(b"k1").unwrap(), (2, b"v2".to_vec()));
}

#[test]
fn get_missing_key_returns_none() {
    let m = Memtable::new();
    assert!(m.get(b"nonexistent").is_none());
    assert!(m.get_entry(b"nonexistent").is_none());
}

#[test]
fn delete_creates_tombstone() {
    let m = Memtable::new();
    m.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
    m.delete(b"k1".to_vec()).unwrap();
    assert!(m.get(b"k1").is_none());
    assert_eq!(m.len(), 1); // tombstone still present

    let entry = m.get_entry(b"k1").unwrap();
    assert_eq!(entry.seq, 2);
    assert!(entry.is_tombstone());
}

#[test]
fn delete_nonexistent_key_creates_tombstone() {
    let m = Memtable::new();
    m.delete(b"k".to_vec()).unwrap();
    assert_eq!(m.len(), 1);
    assert!(m.get(b"k").is_none());
    assert!(m.get_entry(b"k").is_some());
}

#[test]
fn put_after_delete_resurrects_key() {
    let m = Memtable::new();
    m.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
    m.delete(b"k".to_vec()).unwrap();
    m.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
    assert_eq!(m.get(b"k").unwrap().1, b"v2");
}

// -------------------- Sequence numbers --------------------

#[test]
fn sequence_is_shared_between_tables() {
    let seq = Arc::new(Sequence::new(41));
    let a = Memtable::with_sequence(seq.clone());
    let b = Memtable::with_sequence(seq.clone());

    assert_eq!(a.put(b"x".to_vec(), b"1".to_vec()).unwrap(), 42);
    assert_eq!(b.put(b"x".to_vec(), b"2".to_vec()).unwrap(), 43);
    assert_eq!(a.delete(b"y".to_vec()).unwrap(), 44);
    assert_eq!(seq.current(), 44);
    assert_eq!(a.max_seq(), 44);
    assert_eq!(b.max_seq(), 43);
}

#[test]
fn max_seq_of_empty_table_is_zero() {
    assert_eq!(Memtable::new().max_seq(), 0);
}

// -------------------- Freeze --------------------

#[test]
fn writes_after_freeze_fail() {
    let m = Memtable::new();
    m.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    m.freeze();

    assert!(m.is_frozen());
    assert_eq!(m.put(b"b".to_vec(), b"2".to_vec()), Err(MemtableError::Frozen));
    assert_eq!(m.delete(b"a".to_vec()), Err(MemtableError::Frozen));

    // Reads still work and nothing changed.
    assert_eq!(m.get(b"a").unwrap().1, b"1");
    assert_eq!(m.len(), 1);
}

#[test]
fn rejected_write_does_not_consume_sequence() {
    let m = Memtable::new();
    m.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    m.freeze();
    let _ = m.put(b"b".to_vec(), b"2".to_vec());
    assert_eq!(m.sequence().current(), 1);
}

#[test]
fn freeze_is_idempotent() {
    let m = Memtable::new();
    m.freeze();
    m.freeze();
    assert!(m.is_frozen());
}

// -------------------- Scan --------------------

#[test]
fn scan_yields_sorted_keys() {
    let m = Memtable::new();
    m.put(b"c".to_vec(), b"3".to_vec()).unwrap();
    m.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    m.put(b"b".to_vec(), b"2".to_vec()).unwrap();

    let keys: Vec<Vec<u8>> = m.scan().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn scan_includes_tombstones() {
    let m = Memtable::new();
    m.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    m.delete(b"b".to_vec()).unwrap();
    m.put(b"c".to_vec(), b"3".to_vec()).unwrap();

    let entries: Vec<_> = m.scan().collect();
    assert_eq!(entries.len(), 3);
    assert!(entries[1].1.is_tombstone());
}

#[test]
fn scan_empty_memtable() {
    let m = Memtable::new();
    assert_eq!(m.scan().count(), 0);
}

#[test]
fn scan_from_start_key() {
    let m = Memtable::new();
    for k in ["a", "b", "c", "d"] {
        m.put(k.as_bytes().to_vec(), b"v".to_vec()).unwrap();
    }
    let keys: Vec<Vec<u8>> = m.scan_from(b"bb").map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"c".to_vec(), b"d".to_vec()]);

    let keys: Vec<Vec<u8>> = m.scan_from(b"b").map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
}

#[test]
fn scan_is_restartable() {
    let m = Memtable::new();
    m.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    m.put(b"b".to_vec(), b"2".to_vec()).unwrap();
    m.freeze();

    let mut scan = m.scan();
    let first: Vec<_> = scan.by_ref().collect();
    assert!(scan.next().is_none());

    scan.rewind();
    let second: Vec<_> = scan.collect();
    assert_eq!(first, second);
}

#[test]
fn scan_is_lazy_and_sees_later_keys() {
    let m = Memtable::new();
    m.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    m.put(b"c".to_vec(), b"3".to_vec()).unwrap();

    let mut scan = m.scan();
    assert_eq!(scan.next().unwrap().0, b"a");
    // Insert behind the cursor position; the live scan picks it up.
    m.put(b"b".to_vec(), b"2".to_vec()).unwrap();
    assert_eq!(scan.next().unwrap().0, b"b");
    assert_eq!(scan.next().unwrap().0, b"c");
    assert!(scan.next().is_none());
}

#[test]
fn scan_can_own_the_table() {
    let m = Arc::new(Memtable::new());
    m.put(b"k".to_vec(), b"v".to_vec()).unwrap();
    let scan = Scan::new(m.clone(), Vec::new());
    drop(m);
    assert_eq!(scan.count(), 1);
}

// -------------------- approx_size tracking --------------------

#[test]
fn approx_size_includes_key_and_value() {
    let m = Memtable::new();
    assert_eq!(m.approx_size(), 0);
    // key="ab" (2) + value="ccc" (3) = 5
    m.put(b"ab".to_vec(), b"ccc".to_vec()).unwrap();
    assert_eq!(m.approx_size(), 5);
}

#[test]
fn approx_size_adjusts_on_overwrite_and_delete() {
    let m = Memtable::new();
    m.put(b"a".to_vec(), b"aaa".to_vec()).unwrap(); // 1+3
    m.put(b"a".to_vec(), b"bb".to_vec()).unwrap(); // 1+2
    assert_eq!(m.approx_size(), 3);
    m.delete(b"a".to_vec()).unwrap(); // key stays
    assert_eq!(m.approx_size(), 1);
}

// -------------------- Load / concurrency --------------------

#[test]
fn write_load_with_key_reuse() {
    let m = Memtable::new();
    for i in 0..100_000u64 {
        let key = format!("key{}", i % 1_000).into_bytes();
        m.put(key, vec![b'x'; 50]).unwrap();
    }
    assert_eq!(m.len(), 1_000);
    assert_eq!(m.max_seq(), 100_000);
}

#[test]
fn concurrent_writers_get_unique_sequences() {
    let m = Arc::new(Memtable::new());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let m = m.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    m.put(format!("t{}-{:04}", t, i).into_bytes(), b"v".to_vec())
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(m.len(), 2_000);
    let mut seqs: Vec<u64> = m.scan().map(|(_, e)| e.seq).collect();
    seqs.sort_unstable();
    seqs.dedup();
    assert_eq!(seqs.len(), 2_000);
    assert_eq!(m.sequence().current(), 2_000);
}

// -------------------- Edge cases --------------------

#[test]
fn empty_value() {
    let m = Memtable::new();
    m.put(b"k".to_vec(), b"".to_vec()).unwrap();
    let (_s, v) = m.get(b"k").unwrap();
    assert!(v.is_empty());
    assert!(!m.get_entry(b"k").unwrap().is_tombstone());
}

#[test]
fn binary_key_and_value() {
    let m = Memtable::new();
    let key = vec![0x00, 0xFF, 0x80, 0x01];
    let val = vec![0xDE, 0xAD, 0xBE, 0xEF];
    m.put(key.clone(), val.clone()).unwrap();
    assert_eq!(m.get(&key).unwrap().1, val);
}

#[test]
fn default_creates_empty() {
    let m = Memtable::default();
    assert!(m.is_empty());
    assert!(!m.is_frozen());
    assert_eq!(m.approx_size(), 0);
}
