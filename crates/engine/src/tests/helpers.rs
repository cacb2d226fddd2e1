use crate::*;
use anyhow::Result;
use config::EngineConfig;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

/// Small tables, no automatic compaction, nothing frozen before 1000 entries.
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig::builder()
        .data_root(dir)
        .max_memtable_entries(1000)
        .index_gap_bytes(128)
        .compaction_trigger(0)
        .build()
        .unwrap()
}

pub fn open(dir: &Path) -> Result<Engine> {
    Engine::open(test_config(dir))
}

/// Number of tables on disk, counted by their data files.
pub fn count_table_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "data")
                .unwrap_or(false)
        })
        .count()
}

/// Polls `cond` for up to five seconds.
pub fn wait_until<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn scan_strings(engine: &Engine, start: &str) -> Result<Vec<(String, String)>> {
    engine
        .scan(start.as_bytes())?
        .map(|r| {
            r.map(|(k, v)| {
                (
                    String::from_utf8_lossy(&k).into_owned(),
                    String::from_utf8_lossy(&v).into_owned(),
                )
            })
        })
        .collect()
}

pub fn get_str(engine: &Engine, key: &str) -> Result<Option<String>> {
    Ok(engine
        .get(key.as_bytes())?
        .map(|v| String::from_utf8_lossy(&v).into_owned()))
}
