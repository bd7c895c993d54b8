use crate::errors::RefreshError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Drives the external `code-map` binary in recording mode.
pub struct CodeMapClient<'a> {
    runner: &'a dyn ProcessRunner,
    tool_path: PathBuf,
    config_path: PathBuf,
    cwd: PathBuf,
}

impl<'a> CodeMapClient<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        tool_path: impl AsRef<Path>,
        config_path: impl AsRef<Path>,
        cwd: impl AsRef<Path>,
    ) -> Self {
        Self {
            runner,
            tool_path: tool_path.as_ref().to_path_buf(),
            config_path: config_path.as_ref().to_path_buf(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn request(&self, scan_dir: &Path, recording_dir: &Path) -> ProcessRequest {
        ProcessRequest {
            program: self.tool_path.display().to_string(),
            args: vec![
                "--config".to_string(),
                self.config_path.display().to_string(),
                "--scan-dir".to_string(),
                scan_dir.display().to_string(),
                "--recording-dir".to_string(),
                recording_dir.display().to_string(),
            ],
            cwd: Some(self.cwd.clone()),
        }
    }

    /// Blocks until the tool exits. Any non-zero status is an error.
    pub fn record(&self, scan_dir: &Path, recording_dir: &Path) -> Result<(), RefreshError> {
        let request = self.request(scan_dir, recording_dir);
        append_run_log(
            "info",
            "tool.invoke.started",
            json!({
                "program": request.program,
                "args": request.args,
                "cwd": self.cwd.display().to_string()
            }),
        );
        let status = match self.runner.run(request) {
            Ok(status) => status,
            Err(RefreshError::Interrupted) => {
                append_run_log(
                    "warn",
                    "tool.invoke.interrupted",
                    json!({ "program": self.tool_path.display().to_string() }),
                );
                return Err(RefreshError::Interrupted);
            }
            Err(error) => {
                append_run_log(
                    "error",
                    "tool.invoke.spawn_failed",
                    json!({
                        "program": self.tool_path.display().to_string(),
                        "error": error.to_string()
                    }),
                );
                return Err(error);
            }
        };
        if !status.success() {
            append_run_log(
                "error",
                "tool.invoke.failed",
                json!({
                    "program": self.tool_path.display().to_string(),
                    "exit_code": status.exit_code
                }),
            );
            return Err(RefreshError::ToolFailed {
                exit_code: status.exit_code,
            });
        }
        append_run_log(
            "info",
            "tool.invoke.succeeded",
            json!({
                "program": self.tool_path.display().to_string(),
                "recording_dir": recording_dir.display().to_string()
            }),
        );
        Ok(())
    }
}
