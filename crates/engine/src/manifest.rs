//! # Manifest - persistent table list
//!
//! Records which tables make up the engine, in recency order, plus the next
//! table id to allocate.
//!
//! ## File Format
//!
//! A text file named `MANIFEST` in the data root:
//!
//! ```text
//! # lsm manifest
//! next_table_id 12
//! table 3 5000 412330 9811
//! table 11 120 9800 10230
//! ```
//!
//! `table` lines are `<id> <num_entries> <data_size> <max_seq>`, oldest
//! first. Lines starting with `#` and empty lines are ignored.
//!
//! ## Crash Safety
//!
//! The manifest is rewritten atomically: write `MANIFEST.tmp`, fsync, rename
//! over `MANIFEST`, fsync the directory. A crash leaves either the old or the
//! new list, never a mix.

use anyhow::{bail, Context, Result};
use sstable::SSTableInfo;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the manifest file within the data root.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Temporary file used during atomic manifest writes.
pub const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

const HEADER: &str = "# lsm manifest";

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    pub next_table_id: u64,
    /// Tables, oldest first.
    pub tables: Vec<SSTableInfo>,
}

impl Manifest {
    /// Loads `dir/MANIFEST`, or returns an empty manifest if there is none.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILENAME);
        let mut manifest = Self {
            path,
            next_table_id: 0,
            tables: Vec::new(),
        };
        if !manifest.path.exists() {
            return Ok(manifest);
        }

        let text = fs::read_to_string(&manifest.path)
            .with_context(|| format!("failed to read manifest at {}", manifest.path.display()))?;
        let mut seen = HashSet::new();

        for (i, line) in text.lines().enumerate() {
            let line_num = i + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut fields = trimmed.split_whitespace();
            match fields.next() {
                Some("next_table_id") => {
                    let values = parse_fields::<1>(&mut fields, line_num)?;
                    manifest.next_table_id = values[0];
                }
                Some("table") => {
                    let [id, num_entries, data_size, max_seq] = parse_fields::<4>(&mut fields, line_num)?;
                    if !seen.insert(id) {
                        bail!("manifest line {}: duplicate table {}", line_num, id);
                    }
                    manifest.tables.push(SSTableInfo {
                        id,
                        num_entries,
                        data_size,
                        max_seq,
                    });
                }
                Some(other) => bail!("manifest line {}: unknown directive '{}'", line_num, other),
                None => continue,
            }
        }

        Ok(manifest)
    }

    /// Persists the manifest atomically: [`install`](Self::install) followed
    /// by [`sync`](Self::sync).
    pub fn save(&self) -> Result<()> {
        self.install()?;
        self.sync()
    }

    /// Writes and fsyncs `MANIFEST.tmp`, then renames it over `MANIFEST`.
    ///
    /// Once this returns `Ok` the new table list is the one a restart reads,
    /// even if the following [`sync`](Self::sync) fails. On `Err` the old
    /// `MANIFEST` is untouched.
    pub fn install(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| format!("failed to create manifest tmp at {}", tmp_path.display()))?;
            f.write_all(self.render().as_bytes())?;
            f.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to install manifest at {}", self.path.display()))
    }

    /// Fsyncs the directory holding the manifest so the rename is durable.
    pub fn sync(&self) -> Result<()> {
        match self.path.parent() {
            Some(dir) => sstable::sync_dir(dir),
            None => Ok(()),
        }
    }

    /// Returns a copy listing `tables` instead of the current ones.
    pub fn with_tables(&self, tables: Vec<SSTableInfo>, next_table_id: u64) -> Self {
        Self {
            path: self.path.clone(),
            next_table_id,
            tables,
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');
        out.push_str(&format!("next_table_id {}\n", self.next_table_id));
        for t in &self.tables {
            out.push_str(&format!(
                "table {} {} {} {}\n",
                t.id, t.num_entries, t.data_size, t.max_seq
            ));
        }
        out
    }
}

fn parse_fields<'a, const N: usize>(
    fields: &mut impl Iterator<Item = &'a str>,
    line_num: usize,
) -> Result<[u64; N]> {
    let mut out = [0u64; N];
    for slot in out.iter_mut() {
        let raw = fields
            .next()
            .with_context(|| format!("manifest line {}: expected {} values", line_num, N))?;
        *slot = raw
            .parse()
            .with_context(|| format!("manifest line {}: invalid number '{}'", line_num, raw))?;
    }
    if fields.next().is_some() {
        bail!("manifest line {}: expected {} values", line_num, N);
    }
    Ok(out)
}
