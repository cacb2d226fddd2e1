//! # Config
//!
//! Engine configuration. Every option has a default, so
//! `EngineConfig::default()` gives a usable engine rooted at `./data`.
//!
//! ## Environment overrides
//!
//! [`EngineConfig::from_env`] starts from the defaults and applies:
//!
//! ```text
//! KV_DATA_ROOT           data directory                      (default: "./data")
//! KV_MEMTABLE_ENTRIES    entries before a memtable is frozen (default: 1024)
//! KV_BLOOM_FPR           bloom false-positive rate           (default: 0.01)
//! KV_BLOOM_BYTES         fixed bloom size in bytes           (with KV_BLOOM_HASHES)
//! KV_BLOOM_HASHES        fixed bloom hash count              (default: 10 when KV_BLOOM_BYTES is set)
//! KV_INDEX_GAP           sparse index gap in bytes           (default: 65536)
//! KV_MMAP                memory-map data files               (default: false)
//! KV_COMPACTION_TRIGGER  table count that starts compaction  (default: 4, 0 = disabled)
//! ```

use anyhow::{bail, Context, Result};
pub use bloom::BloomPolicy;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_DATA_ROOT: &str = "./data";
pub const DEFAULT_MAX_MEMTABLE_ENTRIES: usize = 1024;
pub const DEFAULT_BLOOM_FPR: f64 = 0.01;
pub const DEFAULT_BLOOM_BYTES: usize = 128 * 1024;
pub const DEFAULT_BLOOM_HASHES: u32 = 10;
pub const DEFAULT_INDEX_GAP_BYTES: u64 = 64 * 1024;
pub const DEFAULT_COMPACTION_TRIGGER: usize = 4;
pub const DEFAULT_MAX_COMPACTION_INPUTS: usize = 8;
pub const DEFAULT_TARGET_TABLE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory holding the manifest and every table file.
    pub data_root: PathBuf,
    /// The active memtable is frozen once it holds this many entries.
    pub max_memtable_entries: usize,
    pub bloom: BloomPolicy,
    /// Minimum distance between sparse index checkpoints. 0 = dense index.
    pub index_gap_bytes: u64,
    /// Serve table reads through read-only memory maps.
    pub mmap_data_files: bool,
    /// Background compaction starts at this many tables. 0 disables it.
    pub compaction_trigger: usize,
    /// Upper bound on tables merged by one background compaction.
    pub max_compaction_inputs: usize,
    /// Compaction starts a new output table past this data size.
    pub target_table_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            max_memtable_entries: DEFAULT_MAX_MEMTABLE_ENTRIES,
            bloom: BloomPolicy::FalsePositiveRate(DEFAULT_BLOOM_FPR),
            index_gap_bytes: DEFAULT_INDEX_GAP_BYTES,
            mmap_data_files: false,
            compaction_trigger: DEFAULT_COMPACTION_TRIGGER,
            max_compaction_inputs: DEFAULT_MAX_COMPACTION_INPUTS,
            target_table_bytes: DEFAULT_TARGET_TABLE_BYTES,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Defaults overridden by `KV_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads variables through
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(root) = lookup("KV_DATA_ROOT") {
            cfg.data_root = PathBuf::from(root);
        }
        if let Some(n) = parse_var(&lookup, "KV_MEMTABLE_ENTRIES")? {
            cfg.max_memtable_entries = n;
        }
        if let Some(fpr) = parse_var(&lookup, "KV_BLOOM_FPR")? {
            cfg.bloom = BloomPolicy::FalsePositiveRate(fpr);
        }
        if let Some(num_bytes) = parse_var(&lookup, "KV_BLOOM_BYTES")? {
            let num_hashes = parse_var(&lookup, "KV_BLOOM_HASHES")?.unwrap_or(DEFAULT_BLOOM_HASHES);
            cfg.bloom = BloomPolicy::Fixed {
                num_bytes,
                num_hashes,
            };
        }
        if let Some(gap) = parse_var(&lookup, "KV_INDEX_GAP")? {
            cfg.index_gap_bytes = gap;
        }
        if let Some(raw) = lookup("KV_MMAP") {
            cfg.mmap_data_files = parse_bool(&raw).with_context(|| format!("KV_MMAP={:?}", raw))?;
        }
        if let Some(trigger) = parse_var(&lookup, "KV_COMPACTION_TRIGGER")? {
            cfg.compaction_trigger = trigger;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_memtable_entries == 0 {
            bail!("max_memtable_entries must be > 0");
        }
        if let Err(reason) = self.bloom.validate() {
            bail!("invalid bloom configuration: {}", reason);
        }
        if self.max_compaction_inputs < 2 {
            bail!("max_compaction_inputs must be at least 2");
        }
        if self.target_table_bytes == 0 {
            bail!("target_table_bytes must be > 0");
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {}={:?}", key, raw)),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got {:?}", other),
    }
}

/// Builder for [`EngineConfig`]; unset fields keep their defaults.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    cfg: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cfg.data_root = root.into();
        self
    }

    pub fn max_memtable_entries(mut self, n: usize) -> Self {
        self.cfg.max_memtable_entries = n;
        self
    }

    pub fn bloom(mut self, policy: BloomPolicy) -> Self {
        self.cfg.bloom = policy;
        self
    }

    pub fn index_gap_bytes(mut self, gap: u64) -> Self {
        self.cfg.index_gap_bytes = gap;
        self
    }

    pub fn mmap_data_files(mut self, on: bool) -> Self {
        self.cfg.mmap_data_files = on;
        self
    }

    pub fn compaction_trigger(mut self, n: usize) -> Self {
        self.cfg.compaction_trigger = n;
        self
    }

    pub fn max_compaction_inputs(mut self, n: usize) -> Self {
        self.cfg.max_compaction_inputs = n;
        self
    }

    pub fn target_table_bytes(mut self, bytes: u64) -> Self {
        self.cfg.target_table_bytes = bytes;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<EngineConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
