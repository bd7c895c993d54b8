//! Disposable copy of the fixture sources that `code-map` scans.
//!
//! A [`Snapshot`] owns a uniquely named directory under the caller's scratch
//! location. Dropping it deletes the directory, so every early return and
//! unwinding panic between creation and [`Snapshot::close`] cleans up.

use crate::errors::RefreshError;
use crate::logging::append_run_log;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug)]
pub struct Snapshot {
    dir: TempDir,
    data_dir: PathBuf,
}

impl Snapshot {
    /// Creates the temporary directory inside `scratch_dir` and copies
    /// `source` into `<tmp>/<data_dir_name>`.
    pub fn materialize(
        scratch_dir: &Path,
        prefix: &str,
        data_dir_name: &str,
        source: &Path,
    ) -> Result<Self, RefreshError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(scratch_dir)
            .map_err(|e| {
                RefreshError::Io(format!(
                    "create snapshot in {}: {e}",
                    scratch_dir.display()
                ))
            })?;
        let data_dir = dir.path().join(data_dir_name);
        append_run_log(
            "debug",
            "refresh.snapshot.allocated",
            json!({
                "scratch_dir": scratch_dir.display().to_string(),
                "snapshot_dir": dir.path().display().to_string()
            }),
        );

        // `dir` is dropped (and removed) if the copy fails.
        let copied = copy_tree(source, &data_dir)?;
        append_run_log(
            "info",
            "refresh.snapshot.created",
            json!({
                "source": source.display().to_string(),
                "data_dir": data_dir.display().to_string(),
                "files": copied
            }),
        );
        Ok(Self { dir, data_dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Removes the snapshot now, reporting a failure instead of swallowing it.
    pub fn close(self) -> Result<(), RefreshError> {
        let root = self.dir.path().display().to_string();
        self.dir
            .close()
            .map_err(|e| RefreshError::Io(format!("remove snapshot {root}: {e}")))
    }
}

/// Recursively copies `src` to `dst`, following symlinks. Returns the number
/// of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize, RefreshError> {
    let meta = fs::metadata(src)
        .map_err(|e| RefreshError::Io(format!("stat {}: {e}", src.display())))?;
    if meta.is_file() {
        fs::copy(src, dst).map_err(|e| {
            RefreshError::Io(format!(
                "copy {} -> {}: {e}",
                src.display(),
                dst.display()
            ))
        })?;
        return Ok(1);
    }
    if !meta.is_dir() {
        return Err(RefreshError::Io(format!(
            "unsupported file type at {}",
            src.display()
        )));
    }

    fs::create_dir_all(dst)
        .map_err(|e| RefreshError::Io(format!("create {}: {e}", dst.display())))?;
    let mut copied = 0;
    for entry in sorted_entries(src)? {
        let name = entry
            .file_name()
            .ok_or_else(|| RefreshError::Io(format!("bad entry {}", entry.display())))?
            .to_os_string();
        copied += copy_tree(&entry, &dst.join(name))?;
    }
    Ok(copied)
}

/// SHA-256 over every file's relative path and contents, in sorted order.
pub fn tree_digest(root: &Path) -> Result<String, RefreshError> {
    let mut hasher = Sha256::new();
    digest_into(root, root, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn digest_into(root: &Path, current: &Path, hasher: &mut Sha256) -> Result<(), RefreshError> {
    let meta = fs::metadata(current)
        .map_err(|e| RefreshError::Io(format!("stat {}: {e}", current.display())))?;
    if meta.is_dir() {
        for entry in sorted_entries(current)? {
            digest_into(root, &entry, hasher)?;
        }
        return Ok(());
    }
    let relative = current.strip_prefix(root).unwrap_or(current);
    let bytes = fs::read(current)
        .map_err(|e| RefreshError::Io(format!("read {}: {e}", current.display())))?;
    hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
    hasher.update([0u8]);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(&bytes);
    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, RefreshError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| RefreshError::Io(format!("read_dir {}: {e}", dir.display())))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RefreshError::Io(format!("read_dir {}: {e}", dir.display())))?;
    entries.sort();
    Ok(entries)
}
