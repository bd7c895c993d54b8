use crate::config::{lexical_normalize, SnapshotConfig};
use crate::errors::RefreshError;
use crate::logging::{append_run_log, run_logger_installed};
use crate::provenance::write_recording_root;
use crate::runtime::ProcessRunner;
use crate::snapshot::{tree_digest, Snapshot};
use crate::tool::CodeMapClient;
use crate::types::{ProjectLayout, RefreshReport, RefreshStep};
use serde_json::json;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Regenerates the recording directory from a fresh snapshot of the
/// resource directory.
///
/// The scratch dir is checked before anything is touched, then: purge,
/// snapshot, invoke, record provenance, clean up. The first failure aborts
/// the run; the snapshot is removed on every path out of this function and
/// the marker file is only written after the tool succeeded.
pub fn refresh_recording(
    runner: &dyn ProcessRunner,
    layout: &ProjectLayout,
    snapshot_cfg: &SnapshotConfig,
    scratch_dir: &Path,
) -> Result<RefreshReport, RefreshError> {
    check_scratch_dir(scratch_dir, layout)?;
    append_run_log(
        "info",
        "refresh.started",
        json!({
            "project_root": layout.project_root.display().to_string(),
            "scratch_dir": scratch_dir.display().to_string()
        }),
    );

    step(RefreshStep::Purge, || purge_recording_dir(&layout.recording_dir))?;

    let snapshot = step(RefreshStep::Snapshot, || {
        Snapshot::materialize(
            scratch_dir,
            &snapshot_cfg.prefix,
            &snapshot_cfg.data_dir_name,
            &layout.resource_dir,
        )
    })?;
    if run_logger_installed() {
        log_snapshot_digest(snapshot.data_dir());
    }

    let client = CodeMapClient::new(
        runner,
        &layout.tool_path,
        &layout.tool_config_path,
        &layout.project_root,
    );
    step(RefreshStep::Invoke, || {
        client.record(snapshot.data_dir(), &layout.recording_dir)
    })?;

    step(RefreshStep::RecordProvenance, || {
        write_recording_root(&layout.marker_path, snapshot.data_dir())
    })?;

    let data_dir = snapshot.data_dir().to_path_buf();
    let snapshot_root = snapshot.root().display().to_string();
    if let Err(error) = snapshot.close() {
        append_run_log(
            "warn",
            "refresh.cleanup.failed",
            json!({
                "step": RefreshStep::Cleanup.as_str(),
                "snapshot_dir": snapshot_root,
                "error": error.to_string()
            }),
        );
    }

    append_run_log(
        "info",
        "refresh.completed",
        json!({
            "recording_dir": layout.recording_dir.display().to_string(),
            "recording_root": data_dir.display().to_string()
        }),
    );
    Ok(RefreshReport {
        data_dir,
        recording_dir: layout.recording_dir.clone(),
        marker_path: layout.marker_path.clone(),
    })
}

/// Deletes the recording directory. It must exist and be a real directory.
pub fn purge_recording_dir(recording_dir: &Path) -> Result<(), RefreshError> {
    let meta = match fs::symlink_metadata(recording_dir) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(RefreshError::MissingRecordingDir(
                recording_dir.display().to_string(),
            ));
        }
        Err(e) => {
            return Err(RefreshError::Io(format!(
                "stat {}: {e}",
                recording_dir.display()
            )));
        }
    };
    if meta.file_type().is_symlink() {
        return Err(RefreshError::Io(format!(
            "refusing to purge symlink {}",
            recording_dir.display()
        )));
    }
    if !meta.is_dir() {
        return Err(RefreshError::Io(format!(
            "{} is not a directory",
            recording_dir.display()
        )));
    }
    fs::remove_dir_all(recording_dir)
        .map_err(|e| RefreshError::Io(format!("remove {}: {e}", recording_dir.display())))?;
    append_run_log(
        "info",
        "refresh.purge.completed",
        json!({ "recording_dir": recording_dir.display().to_string() }),
    );
    Ok(())
}

fn log_snapshot_digest(data_dir: &Path) {
    match tree_digest(data_dir) {
        Ok(digest) => append_run_log(
            "debug",
            "refresh.snapshot.digest",
            json!({
                "data_dir": data_dir.display().to_string(),
                "sha256": digest
            }),
        ),
        Err(error) => append_run_log(
            "warn",
            "refresh.snapshot.digest_failed",
            json!({
                "step": RefreshStep::Snapshot.as_str(),
                "data_dir": data_dir.display().to_string(),
                "error": error.to_string()
            }),
        ),
    }
}

/// The scratch dir must be an absolute, existing directory outside the
/// resource tree, or the snapshot would be copied into itself.
pub fn check_scratch_dir(scratch_dir: &Path, layout: &ProjectLayout) -> Result<(), RefreshError> {
    if !scratch_dir.is_absolute() {
        return Err(RefreshError::InvalidConfig(format!(
            "scratch dir must be absolute, got {}",
            scratch_dir.display()
        )));
    }
    if !scratch_dir.is_dir() {
        return Err(RefreshError::InvalidConfig(format!(
            "scratch dir {} is not an existing directory",
            scratch_dir.display()
        )));
    }
    let scratch = resolved(scratch_dir);
    let resources = resolved(&layout.resource_dir);
    if scratch.starts_with(&resources) {
        return Err(RefreshError::InvalidConfig(format!(
            "scratch dir {} is inside the resource directory {}",
            scratch_dir.display(),
            layout.resource_dir.display()
        )));
    }
    Ok(())
}

fn resolved(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| lexical_normalize(path))
}

fn step<T>(
    step: RefreshStep,
    f: impl FnOnce() -> Result<T, RefreshError>,
) -> Result<T, RefreshError> {
    f().inspect_err(|error| {
        append_run_log(
            "error",
            "refresh.step.failed",
            json!({
                "step": step.as_str(),
                "error": error.to_string()
            }),
        );
    })
}
