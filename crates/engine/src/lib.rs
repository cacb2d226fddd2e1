//! # Engine - LSM-tree storage engine
//!
//! The central orchestrator that ties together the [`memtable`] and
//! [`sstable`] crates (bloom filters included) into a local, durable
//! key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────────┐
//! │                     ENGINE                        │
//! │                                                   │
//! │ write.rs → active memtable                        │
//! │              |  (max_memtable_entries reached?)   │
//! │              v                                    │
//! │           freeze + install new memtable           │
//! │              |  (signal)                          │
//! │              v                                    │
//! │ worker.rs  flusher thread → flush.rs → sst-N      │
//! │              |  (table count >= trigger?)         │
//! │              v                                    │
//! │ worker.rs  compactor thread → compaction.rs       │
//! │                                                   │
//! │ read.rs → active → frozen → tables newest-first   │
//! │            (first match wins)                     │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                               |
//! |----------------|-------------------------------------------------------|
//! | `lib.rs`       | `Engine`, `Version` snapshots, open/close, stats      |
//! | [`recovery`]   | Manifest load, table open, garbage removal             |
//! | [`write`]      | `put()`, `delete()`, memtable rotation                 |
//! | [`read`]       | `get()`, `scan()`                                      |
//! | [`flush`]      | Frozen memtable → table, publish                       |
//! | [`compaction`] | Oldest-run merge with tombstone removal                |
//! | [`manifest`]   | Persistent table list (atomic file ops)                |
//! | [`worker`]     | Background flusher and compactor threads               |
//!
//! ## Snapshots
//!
//! The published state is an immutable [`Version`] behind a
//! `RwLock<Arc<Version>>`. Readers clone the `Arc` and drop the lock at once;
//! every change (memtable swap, flush registration, compaction swap) builds
//! a new `Version` and publishes it under a brief write lock. A table's files
//! stay open as long as any snapshot references it.
//!
//! ## Crash Safety
//!
//! Table files are written and fsynced before the manifest names them; the
//! manifest rewrite (temp file + fsync + rename) is the commit point of both
//! flush and compaction. On startup, files the manifest does not name are
//! removed. Writes still in memtables when the process dies are lost: the
//! engine has no write-ahead log.
mod compaction;
mod flush;
mod manifest;
mod read;
mod recovery;
mod worker;
mod write;

use anyhow::{Context, Result};
use config::EngineConfig;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use manifest::Manifest;
use memtable::{Memtable, Sequence};
use parking_lot::{Mutex, RwLock};
use sstable::{SSTable, TableOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use worker::Workers;

pub use read::Scan;
pub use sstable::{is_corruption, CorruptionError};

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = sstable::MAX_KEY_BYTES;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = sstable::MAX_VALUE_BYTES;

/// Background failures kept for [`Engine::background_errors`].
pub const MAX_BACKGROUND_ERRORS: usize = 64;

/// One published, immutable view of the engine state.
#[derive(Clone)]
pub(crate) struct Version {
    /// The only memtable accepting writes.
    pub(crate) active: Arc<Memtable>,
    /// Frozen memtables waiting for flush, newest first.
    pub(crate) frozen: Vec<Arc<Memtable>>,
    /// Published tables, oldest first. Position is recency.
    pub(crate) tables: Vec<Arc<SSTable>>,
}

/// State shared between the engine handle and its background threads.
pub(crate) struct Shared {
    pub(crate) cfg: EngineConfig,
    pub(crate) table_opts: TableOptions,
    pub(crate) version: RwLock<Arc<Version>>,
    pub(crate) seq: Arc<Sequence>,
    pub(crate) next_table_id: AtomicU64,
    /// Held while the table list is rewritten; guards the on-disk manifest.
    pub(crate) manifest: Mutex<Manifest>,
    pub(crate) flush_lock: Mutex<()>,
    pub(crate) compaction_lock: Mutex<()>,
    /// Set on shutdown; compaction checks it between merge steps.
    pub(crate) cancel: AtomicBool,
    errors_tx: Sender<anyhow::Error>,
    errors_rx: Receiver<anyhow::Error>,
}

impl Shared {
    /// Current published snapshot.
    pub(crate) fn current(&self) -> Arc<Version> {
        Arc::clone(&self.version.read())
    }

    /// Publishes a new version derived from the current one.
    pub(crate) fn install<F>(&self, change: F)
    where
        F: FnOnce(&mut Version),
    {
        let mut guard = self.version.write();
        let mut next = Version::clone(&guard);
        change(&mut next);
        *guard = Arc::new(next);
    }

    pub(crate) fn allocate_table_id(&self) -> u64 {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Logs a background failure and queues it for `background_errors()`.
    /// Logs a background failure and queues it for `background_errors`.
    /// Once [`MAX_BACKGROUND_ERRORS`] are pending the oldest is dropped.
    pub(crate) fn report(&self, err: anyhow::Error) {
        tracing::error!(error = %format!("{:#}", err), "background task failed");
        let mut err = err;
        loop {
            match self.errors_tx.try_send(err) {
                Err(TrySendError::Full(back)) => {
                    if let Ok(dropped) = self.errors_rx.try_recv() {
                        tracing::warn!(
                            error = %format!("{:#}", dropped),
                            "background error queue full, dropping oldest"
                        );
                    }
                    err = back;
                }
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Point-in-time counters, mostly for tests and the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Last assigned sequence number.
    pub last_seq: u64,
    pub memtable_entries: usize,
    /// Approximate heap bytes held by the active memtable.
    pub memtable_bytes: usize,
    pub frozen_memtables: usize,
    pub table_count: usize,
    /// Table ids, oldest first.
    pub table_ids: Vec<u64>,
}

/// The storage engine.
///
/// Every method takes `&self`; the engine is `Send + Sync` and can be shared
/// across threads behind an `Arc`.
///
/// # Write Path
///
/// 1. Validate key and value sizes.
/// 2. Insert into the active memtable, which assigns the next sequence number.
/// 3. If the memtable reached `max_memtable_entries`, freeze it, install a new
///    empty one and wake the background flusher. Writers never wait for disk.
///
/// # Read Path
///
/// 1. Active memtable, then frozen memtables newest first.
/// 2. Tables newest first (bloom filter, then sparse index range).
/// 3. First match wins; tombstones shadow older values.
pub struct Engine {
    shared: Arc<Shared>,
    workers: Option<Workers>,
}

impl Engine {
    /// Opens (or creates) the engine rooted at `cfg.data_root`.
    ///
    /// Every table named by the manifest is opened; a missing or corrupt
    /// table fails the open. Table files the manifest does not name are
    /// leftovers of an interrupted flush or compaction and are removed.
    pub fn open(cfg: EngineConfig) -> Result<Self> {
        cfg.validate()?;
        let table_opts = TableOptions {
            index_gap_bytes: cfg.index_gap_bytes,
            bloom: cfg.bloom,
            use_mmap: cfg.mmap_data_files,
        };

        let recovered = recovery::recover(&cfg.data_root, cfg.mmap_data_files)
            .with_context(|| format!("recover engine at {}", cfg.data_root.display()))?;

        let seq = Arc::new(Sequence::new(recovered.last_seq));
        let version = Version {
            active: Arc::new(Memtable::with_sequence(Arc::clone(&seq))),
            frozen: Vec::new(),
            tables: recovered.tables,
        };
        let (errors_tx, errors_rx) = crossbeam_channel::bounded(MAX_BACKGROUND_ERRORS);

        tracing::info!(
            data_root = %cfg.data_root.display(),
            tables = version.tables.len(),
            last_seq = recovered.last_seq,
            next_table_id = recovered.next_table_id,
            "engine opened"
        );

        let shared = Arc::new(Shared {
            cfg,
            table_opts,
            version: RwLock::new(Arc::new(version)),
            seq,
            next_table_id: AtomicU64::new(recovered.next_table_id),
            manifest: Mutex::new(recovered.manifest),
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            cancel: AtomicBool::new(false),
            errors_tx,
            errors_rx,
        });

        let workers = Workers::spawn(Arc::clone(&shared))?;
        if shared.needs_compaction() {
            workers.request_compaction();
        }

        Ok(Self {
            shared,
            workers: Some(workers),
        })
    }

    pub fn data_root(&self) -> &Path {
        &self.shared.cfg.data_root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.cfg
    }

    /// Drains failures reported by background flushes and compactions.
    pub fn background_errors(&self) -> Vec<anyhow::Error> {
        self.shared.errors_rx.try_iter().collect()
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let v = self.shared.current();
        EngineStats {
            last_seq: self.shared.seq.current(),
            memtable_entries: v.active.len(),
            memtable_bytes: v.active.approx_size(),
            frozen_memtables: v.frozen.len(),
            table_count: v.tables.len(),
            table_ids: v.tables.iter().map(|t| t.id()).collect(),
        }
    }

    /// Flushes every memtable, stops the background threads and waits for
    /// them. A compaction in progress is cancelled and its output discarded.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let workers = match self.workers.take() {
            Some(w) => w,
            None => return Ok(()),
        };
        self.shared.cancel.store(true, Ordering::SeqCst);
        workers.shutdown();

        self.shared.freeze_active(None);
        self.shared.flush_frozen()?;
        tracing::info!(data_root = %self.shared.cfg.data_root.display(), "engine closed");
        Ok(())
    }

    fn request_flush(&self) {
        if let Some(w) = &self.workers {
            w.request_flush();
        }
    }

    fn request_compaction(&self) {
        if let Some(w) = &self.workers {
            w.request_compaction();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Engine")
            .field("data_root", &self.shared.cfg.data_root)
            .field("last_seq", &stats.last_seq)
            .field("memtable_entries", &stats.memtable_entries)
            .field("frozen_memtables", &stats.frozen_memtables)
            .field("tables", &stats.table_ids)
            .field("max_memtable_entries", &self.shared.cfg.max_memtable_entries)
            .field("compaction_trigger", &self.shared.cfg.compaction_trigger)
            .finish()
    }
}

/// Best-effort close on drop.
///
/// Errors cannot propagate out of `drop`; they are logged. Call
/// [`Engine::close`] to observe them.
impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %format!("{:#}", e), "engine shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests;
