use crate::errors::RefreshError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;
pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), RefreshError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| RefreshError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| RefreshError::Io(e.to_string()))?;

        let over_budget = fs::metadata(&self.path)
            .map(|meta| meta.len() > self.budget_bytes)
            .unwrap_or(false);

        let mut options = OpenOptions::new();
        options.create(true);
        if over_budget {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let mut file = options
            .open(&self.path)
            .map_err(|e| RefreshError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| RefreshError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| RefreshError::Io(e.to_string()))?;
        Ok(())
    }
}

static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<JsonlLogger>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Install the process-wide run logger. Later calls replace the previous one.
pub fn init_run_logger(logger: JsonlLogger) {
    if let Ok(mut slot) = logger_slot().lock() {
        *slot = Some(logger);
    }
}

pub fn clear_run_logger() {
    if let Ok(mut slot) = logger_slot().lock() {
        *slot = None;
    }
}

pub fn run_logger_installed() -> bool {
    logger_slot().lock().map(|slot| slot.is_some()).unwrap_or(false)
}

/// Append an event to the run log, if one is installed. Write failures are dropped.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = match logger_slot().lock() {
        Ok(slot) => slot.clone(),
        Err(_) => None,
    };
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{truncate_json, JsonlLogger, LogEvent};
    use serde_json::{json, Value};

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs/run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "refresh.purge.completed",
                payload: json!({"path": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"refresh.purge.completed\""));
        assert!(text.contains("..."));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn logger_starts_over_once_budget_is_exceeded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        std::fs::write(&path, vec![b'x'; 200]).expect("seed");
        let mut logger = JsonlLogger::new(&path);
        logger.budget_bytes = 100;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "tool.invoke.started",
                payload: json!({}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(!text.contains('x'));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let value = json!({"text": "ééééééééééééééééé"});
        match truncate_json(value, 12) {
            Value::String(s) => assert!(s.ends_with("...")),
            other => panic!("expected truncated string, got {other}"),
        }
    }
}
