use crate::errors::RefreshError;
use crate::logging::append_run_log;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

/// Overwrites the marker with the absolute scan path, no trailing newline.
pub fn write_recording_root(marker_path: &Path, data_dir: &Path) -> Result<(), RefreshError> {
    if !data_dir.is_absolute() {
        return Err(RefreshError::InvalidConfig(format!(
            "recording root must be absolute, got {}",
            data_dir.display()
        )));
    }
    let contents = data_dir.display().to_string();
    fs::write(marker_path, &contents)
        .map_err(|e| RefreshError::Io(format!("write {}: {e}", marker_path.display())))?;
    append_run_log(
        "info",
        "provenance.written",
        json!({
            "marker": marker_path.display().to_string(),
            "recording_root": contents
        }),
    );
    Ok(())
}

/// Path the current recording was made against.
pub fn read_recording_root(marker_path: &Path) -> Result<PathBuf, RefreshError> {
    let contents = fs::read_to_string(marker_path)
        .map_err(|e| RefreshError::Io(format!("read {}: {e}", marker_path.display())))?;
    let trimmed = contents.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return Err(RefreshError::InvalidConfig(format!(
            "{} is empty",
            marker_path.display()
        )));
    }
    Ok(PathBuf::from(trimmed))
}

#[cfg(test)]
mod tests {
    use super::{read_recording_root, write_recording_root};
    use crate::errors::RefreshError;
    use std::path::{Path, PathBuf};

    #[test]
    fn writes_single_line_without_newline_and_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("recording_root.txt");
        std::fs::write(&marker, "/old/path/that/is/much/longer/than/the/new/one\n")
            .expect("seed");

        write_recording_root(&marker, Path::new("/scratch/recording-1/data")).expect("write");

        assert_eq!(
            std::fs::read_to_string(&marker).expect("read"),
            "/scratch/recording-1/data"
        );
        assert_eq!(
            read_recording_root(&marker).expect("read back"),
            PathBuf::from("/scratch/recording-1/data")
        );
    }

    #[test]
    fn rejects_relative_roots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("recording_root.txt");
        let err = write_recording_root(&marker, Path::new("data")).expect_err("relative");
        assert!(matches!(err, RefreshError::InvalidConfig(_)));
        assert!(!marker.exists());
    }

    #[test]
    fn reader_tolerates_trailing_newline_but_not_empty_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("recording_root.txt");
        std::fs::write(&marker, "/tmp/x/data\n").expect("seed");
        assert_eq!(
            read_recording_root(&marker).expect("read"),
            PathBuf::from("/tmp/x/data")
        );

        std::fs::write(&marker, "\n").expect("seed empty");
        assert!(matches!(
            read_recording_root(&marker),
            Err(RefreshError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unwritable_marker_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("recording_root.txt");
        std::fs::create_dir(&marker).expect("occupy marker path");
        let err = write_recording_root(&marker, Path::new("/abs/data")).expect_err("dir");
        assert!(matches!(err, RefreshError::Io(_)));
    }
}
