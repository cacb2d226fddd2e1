//! Background flusher and compactor threads.
//!
//! Each thread sleeps on a `crossbeam-channel` receiver. Signals are
//! coalesced: a channel of capacity 1 means "there is work", and a thread
//! that wakes up handles everything pending at that point. Dropping the
//! senders ends both loops after their current unit of work.
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::compaction::Scope;
use crate::Shared;

pub(crate) struct Workers {
    flush_tx: Sender<()>,
    compact_tx: Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    pub(crate) fn spawn(shared: Arc<Shared>) -> Result<Self> {
        let (flush_tx, flush_rx) = bounded(1);
        let (compact_tx, compact_rx) = bounded(1);

        let flusher = {
            let shared = Arc::clone(&shared);
            let compact_tx = compact_tx.clone();
            thread::Builder::new()
                .name("lsm-flush".into())
                .spawn(move || flush_loop(&shared, &flush_rx, &compact_tx))
                .context("spawn flush thread")?
        };
        let compactor = thread::Builder::new()
            .name("lsm-compact".into())
            .spawn(move || compact_loop(&shared, &compact_rx))
            .context("spawn compaction thread")?;

        Ok(Self {
            flush_tx,
            compact_tx,
            handles: vec![flusher, compactor],
        })
    }

    pub(crate) fn request_flush(&self) {
        signal(&self.flush_tx);
    }

    pub(crate) fn request_compaction(&self) {
        signal(&self.compact_tx);
    }

    /// Closes the channels and waits for both threads to exit.
    pub(crate) fn shutdown(self) {
        let Workers {
            flush_tx,
            compact_tx,
            handles,
        } = self;
        drop(flush_tx);
        drop(compact_tx);
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("background thread panicked");
            }
        }
    }
}

fn signal(tx: &Sender<()>) {
    match tx.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => {}
        Err(TrySendError::Disconnected(())) => {
            tracing::debug!("background thread already stopped");
        }
    }
}

fn flush_loop(shared: &Shared, rx: &Receiver<()>, compact_tx: &Sender<()>) {
    for () in rx.iter() {
        match shared.flush_frozen() {
            Ok(0) => {}
            Ok(_) => {
                if shared.needs_compaction() {
                    signal(compact_tx);
                }
            }
            Err(e) => shared.report(e.context("background flush")),
        }
    }
    tracing::debug!("flush thread stopped");
}

fn compact_loop(shared: &Shared, rx: &Receiver<()>) {
    for () in rx.iter() {
        while !shared.cancel.load(Ordering::SeqCst) {
            let before = shared.current().tables.len();
            match shared.compact(Scope::Triggered) {
                Ok(true) if shared.current().tables.len() < before => continue,
                Ok(_) => break,
                Err(e) => {
                    if !shared.cancel.load(Ordering::SeqCst) {
                        shared.report(e.context("background compaction"));
                    }
                    break;
                }
            }
        }
    }
    tracing::debug!("compaction thread stopped");
}
