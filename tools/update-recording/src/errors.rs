use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("recording directory missing: {0}")]
    MissingRecordingDir(String),
    #[error("code-map exited with status {exit_code}")]
    ToolFailed { exit_code: i32 },
    #[error("interrupted")]
    Interrupted,
}

impl RefreshError {
    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RefreshError;

    #[test]
    fn interrupted_exits_like_a_shell_on_sigint() {
        assert_eq!(RefreshError::Interrupted.exit_code(), 130);
        assert_eq!(RefreshError::ToolFailed { exit_code: 3 }.exit_code(), 1);
    }
}
