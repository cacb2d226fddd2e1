//! All-or-nothing ownership of a set of freshly created files.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// A group of files created together.
///
/// [`FileGroup::create`] opens every path or none: if any open fails, the
/// files already created are removed before the error is returned. Until
/// [`FileGroup::commit`] is called, dropping the group closes and deletes
/// every file, so an error at any later step (or an early return via `?`)
/// leaves nothing behind.
#[derive(Debug)]
pub struct FileGroup {
    paths: Vec<PathBuf>,
    files: Vec<Option<File>>,
    committed: bool,
}

impl FileGroup {
    /// Creates (truncating) every file in `paths`.
    pub fn create(paths: &[PathBuf]) -> Result<Self> {
        let mut group = Self {
            paths: Vec::with_capacity(paths.len()),
            files: Vec::with_capacity(paths.len()),
            committed: false,
        };
        for path in paths {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .with_context(|| format!("create {}", path.display()))?;
            group.paths.push(path.clone());
            group.files.push(Some(file));
        }
        Ok(group)
    }

    /// Takes ownership of the `i`-th file handle. The path stays in the
    /// group and is still removed on rollback.
    pub fn take(&mut self, i: usize) -> Option<File> {
        self.files.get_mut(i).and_then(Option::take)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Keeps the files on disk; dropping the group no longer removes them.
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Closes and removes every file now. Equivalent to dropping the group.
    pub fn rollback(self) {}
}

impl Drop for FileGroup {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.files.clear();
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove partial file");
                }
            }
        }
    }
}

/// Fsyncs a directory so that file creations and renames inside it are
/// durable. A no-op where directories cannot be opened.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)
            .and_then(|d| d.sync_all())
            .with_context(|| format!("sync dir {}", dir.display()))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
