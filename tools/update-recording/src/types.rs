use std::path::PathBuf;

/// Absolute locations the refresher touches, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub project_root: PathBuf,
    pub resource_dir: PathBuf,
    pub recording_dir: PathBuf,
    pub marker_path: PathBuf,
    pub tool_path: PathBuf,
    pub tool_config_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStep {
    Purge,
    Snapshot,
    Invoke,
    RecordProvenance,
    Cleanup,
}

impl RefreshStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purge => "purge",
            Self::Snapshot => "snapshot",
            Self::Invoke => "invoke",
            Self::RecordProvenance => "record_provenance",
            Self::Cleanup => "cleanup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    /// Scan target of the run. The directory itself is gone once the report is returned.
    pub data_dir: PathBuf,
    pub recording_dir: PathBuf,
    pub marker_path: PathBuf,
}
