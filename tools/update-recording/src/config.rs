use crate::errors::RefreshError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::types::ProjectLayout;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub project_root: Option<PathBuf>,
    pub layout_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshConfig {
    pub layout: LayoutConfig,
    pub snapshot: SnapshotConfig,
    pub logging: LoggingConfig,
}

/// Paths relative to the project root unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutConfig {
    pub resource_dir: PathBuf,
    pub recording_dir: PathBuf,
    pub marker_file: PathBuf,
    pub tool: PathBuf,
    pub tool_config: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotConfig {
    pub prefix: String,
    pub data_dir_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig {
                resource_dir: PathBuf::from("res/test"),
                recording_dir: PathBuf::from("res/test/recording"),
                marker_file: PathBuf::from("res/test/recording_root.txt"),
                tool: PathBuf::from("zig-out/bin/code-map"),
                tool_config: PathBuf::from("res/config.json"),
            },
            snapshot: SnapshotConfig {
                prefix: "recording-".to_string(),
                data_dir_name: "data".to_string(),
            },
            logging: LoggingConfig {
                path: PathBuf::from(".cache/update-recording/run.jsonl"),
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialRefreshConfig {
    layout: Option<PartialLayoutConfig>,
    snapshot: Option<PartialSnapshotConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLayoutConfig {
    resource_dir: Option<PathBuf>,
    recording_dir: Option<PathBuf>,
    marker_file: Option<PathBuf>,
    tool: Option<PathBuf>,
    tool_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialSnapshotConfig {
    prefix: Option<String>,
    data_dir_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Root of the checkout this tool is built in: two levels above the crate.
pub fn default_project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
) -> Result<(RefreshConfig, ProjectLayout), RefreshError> {
    let mut cfg = RefreshConfig::default();

    if let Some(path) = &overrides.layout_path {
        let path = absolutize(process_cwd, path);
        let file_contents = std::fs::read_to_string(&path)
            .map_err(|e| RefreshError::Io(format!("{}: {e}", path.display())))?;
        let partial: PartialRefreshConfig = toml::from_str(&file_contents)
            .map_err(|e| RefreshError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    validate_config(&cfg)?;

    let project_root = match &overrides.project_root {
        Some(root) => absolutize(process_cwd, root),
        None => default_project_root(),
    };
    let layout = resolve_layout(&cfg, &project_root);
    Ok((cfg, layout))
}

fn merge_partial_config(cfg: &mut RefreshConfig, partial: PartialRefreshConfig) {
    if let Some(layout) = partial.layout {
        if let Some(value) = layout.resource_dir {
            cfg.layout.resource_dir = value;
        }
        if let Some(value) = layout.recording_dir {
            cfg.layout.recording_dir = value;
        }
        if let Some(value) = layout.marker_file {
            cfg.layout.marker_file = value;
        }
        if let Some(value) = layout.tool {
            cfg.layout.tool = value;
        }
        if let Some(value) = layout.tool_config {
            cfg.layout.tool_config = value;
        }
    }

    if let Some(snapshot) = partial.snapshot {
        if let Some(value) = snapshot.prefix {
            cfg.snapshot.prefix = value;
        }
        if let Some(value) = snapshot.data_dir_name {
            cfg.snapshot.data_dir_name = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

pub fn validate_config(cfg: &RefreshConfig) -> Result<(), RefreshError> {
    let paths = [
        ("layout.resource_dir", &cfg.layout.resource_dir),
        ("layout.recording_dir", &cfg.layout.recording_dir),
        ("layout.marker_file", &cfg.layout.marker_file),
        ("layout.tool", &cfg.layout.tool),
        ("layout.tool_config", &cfg.layout.tool_config),
        ("logging.path", &cfg.logging.path),
    ];
    for (name, path) in paths {
        if path.as_os_str().is_empty() {
            return Err(RefreshError::InvalidConfig(format!(
                "{name} must not be empty"
            )));
        }
    }

    if cfg.snapshot.prefix.trim().is_empty() {
        return Err(RefreshError::InvalidConfig(
            "snapshot.prefix must not be empty".to_string(),
        ));
    }

    let mut components = Path::new(&cfg.snapshot.data_dir_name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal {
        return Err(RefreshError::InvalidConfig(format!(
            "snapshot.data_dir_name must be a single directory name, got {:?}",
            cfg.snapshot.data_dir_name
        )));
    }

    let recording = lexical_normalize(&cfg.layout.recording_dir);
    let resources = lexical_normalize(&cfg.layout.resource_dir);
    if recording == resources || !recording.starts_with(&resources) {
        return Err(RefreshError::InvalidConfig(format!(
            "layout.recording_dir ({}) must be inside layout.resource_dir ({})",
            cfg.layout.recording_dir.display(),
            cfg.layout.resource_dir.display()
        )));
    }

    Ok(())
}

pub fn resolve_layout(cfg: &RefreshConfig, project_root: &Path) -> ProjectLayout {
    let root = lexical_normalize(project_root);
    let at_root = |path: &Path| lexical_normalize(&root.join(path));
    ProjectLayout {
        resource_dir: at_root(&cfg.layout.resource_dir),
        recording_dir: at_root(&cfg.layout.recording_dir),
        marker_path: at_root(&cfg.layout.marker_file),
        tool_path: at_root(&cfg.layout.tool),
        tool_config_path: at_root(&cfg.layout.tool_config),
        project_root: root,
    }
}

/// Joins relative paths onto `base`; absolute paths are returned as given.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Drops `.` and folds `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    _ => false,
                };
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
