//! K-way merge over sorted entry streams.
//!
//! Produces `(key, ValueEntry)` pairs in ascending key order. When the same
//! key appears in several sources, only the entry with the **highest
//! sequence number** is emitted (newest wins); equal sequence numbers fall
//! back to the lower source index.
//!
//! Used by compaction (over table scans) and by the engine's range scan
//! (over memtable and table scans).

use anyhow::Result;
use memtable::ValueEntry;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One sorted input of a merge.
pub type EntryStream = Box<dyn Iterator<Item = Result<(Vec<u8>, ValueEntry)>> + Send>;

/// The current head of one source.
struct HeapEntry {
    key: Vec<u8>,
    entry: ValueEntry,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the greatest element is the smallest key,
        // then the highest seq, then the lowest source.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.entry.seq.cmp(&other.entry.seq))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Lazy merge of several ascending streams.
///
/// Sources are primed on the first call to `next`. The first error from any
/// source is yielded once and ends the merge.
pub struct MergeIterator {
    sources: Vec<EntryStream>,
    heap: BinaryHeap<HeapEntry>,
    primed: bool,
    failed: bool,
}

impl MergeIterator {
    pub fn new(sources: Vec<EntryStream>) -> Self {
        let heap = BinaryHeap::with_capacity(sources.len());
        Self {
            sources,
            heap,
            primed: false,
            failed: false,
        }
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(item) = self.sources[source].next() {
            let (key, entry) = item?;
            self.heap.push(HeapEntry { key, entry, source });
        }
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, ValueEntry)>> {
        if !self.primed {
            self.primed = true;
            for i in 0..self.sources.len() {
                self.advance(i)?;
            }
        }

        let top = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };
        self.advance(top.source)?;

        // Older versions of the same key sort right behind the winner.
        while self.heap.peek().map_or(false, |e| e.key == top.key) {
            if let Some(dup) = self.heap.pop() {
                self.advance(dup.source)?;
            }
        }

        Ok(Some((top.key, top.entry)))
    }

    /// Collects all remaining entries into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, ValueEntry)>> {
        self.by_ref().collect()
    }
}

impl Iterator for MergeIterator {
    type Item = Result<(Vec<u8>, ValueEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
