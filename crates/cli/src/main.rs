//! # CLI - interactive shell
//!
//! A REPL-style command-line interface for the storage engine. Reads
//! commands from stdin, executes them against the engine, and prints results
//! to stdout. Works both interactively and scripted (pipe commands via
//! stdin). Log output goes to stderr.
//!
//! ## Commands
//!
//! ```text
//! PUT key value      Insert or update a key (SET is an alias)
//! GET key            Look up a key (prints value or "(nil)")
//! DEL key            Delete a key (writes a tombstone)
//! SCAN [start]       Ascending scan of live keys >= start
//! FLUSH              Flush every memtable to a table
//! COMPACT            Merge all tables
//! STATS              Print engine counters
//! EXIT / QUIT        Flush and shut down
//! ```
//!
//! ## Configuration
//!
//! Engine settings come from the `KV_*` environment variables documented in
//! the `config` crate (`KV_DATA_ROOT`, `KV_MEMTABLE_ENTRIES`, ...). Log
//! verbosity follows `RUST_LOG` (default `info`).
//!
//! ## Example
//!
//! ```text
//! $ KV_DATA_ROOT=/tmp/db cargo run -p cli
//! > PUT name Alice
//! OK
//! > GET name
//! Alice
//! > SCAN
//! name -> Alice
//! (1 entries)
//! > EXIT
//! bye
//! ```

use anyhow::{Context, Result};
use config::EngineConfig;
use engine::Engine;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let cfg = EngineConfig::from_env().context("load configuration")?;
    let engine = Engine::open(cfg)?;

    let stats = engine.stats();
    println!(
        "started (seq={}, data_root={}, tables={}, memtable_entries={}, compaction_trigger={})",
        stats.last_seq,
        engine.data_root().display(),
        stats.table_count,
        engine.config().max_memtable_entries,
        engine.config().compaction_trigger,
    );
    println!("Commands: PUT key value | GET key | DEL key | SCAN [start]");
    println!("          FLUSH | COMPACT | STATS | EXIT");
    prompt();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "PUT" | "SET" => match parts.next() {
                    Some(k) => {
                        let v = parts.collect::<Vec<&str>>().join(" ");
                        match engine.put(k.as_bytes().to_vec(), v.into_bytes()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR put failed: {:#}", e),
                        }
                    }
                    None => println!("ERR usage: PUT key value"),
                },
                "GET" => match parts.next() {
                    Some(k) => match engine.get(k.as_bytes()) {
                        Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
                        Ok(None) => println!("(nil)"),
                        Err(e) => println!("ERR get failed: {:#}", e),
                    },
                    None => println!("ERR usage: GET key"),
                },
                "DEL" => match parts.next() {
                    Some(k) => match engine.delete(k.as_bytes().to_vec()) {
                        Ok(()) => println!("OK"),
                        Err(e) => println!("ERR del failed: {:#}", e),
                    },
                    None => println!("ERR usage: DEL key"),
                },
                "SCAN" => {
                    let start = parts.next().unwrap_or("");
                    if let Err(e) = print_scan(&engine, start.as_bytes()) {
                        println!("ERR scan failed: {:#}", e);
                    }
                }
                "FLUSH" => match engine.flush() {
                    Ok(()) => println!("OK (tables={})", engine.stats().table_count),
                    Err(e) => println!("ERR flush failed: {:#}", e),
                },
                "COMPACT" => match engine.compact() {
                    Ok(()) => println!("OK (tables={})", engine.stats().table_count),
                    Err(e) => println!("ERR compact failed: {:#}", e),
                },
                "STATS" => {
                    let s = engine.stats();
                    println!(
                        "seq={} memtable_entries={} memtable_bytes={} frozen={} tables={} ids={:?}",
                        s.last_seq,
                        s.memtable_entries,
                        s.memtable_bytes,
                        s.frozen_memtables,
                        s.table_count,
                        s.table_ids
                    );
                    for e in engine.background_errors() {
                        println!("background error: {:#}", e);
                    }
                }
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => println!("unknown command: {}", other),
            }
        }
        prompt();
    }

    engine.close()
}

fn prompt() {
    print!("> ");
    io::stdout().flush().ok();
}

fn print_scan(engine: &Engine, start: &[u8]) -> Result<()> {
    let mut count = 0usize;
    for item in engine.scan(start)? {
        let (k, v) = item?;
        println!("{} -> {}", String::from_utf8_lossy(&k), String::from_utf8_lossy(&v));
        count += 1;
    }
    if count == 0 {
        println!("(empty)");
    } else {
        println!("({} entries)", count);
    }
    Ok(())
}
