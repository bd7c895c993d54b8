use crate::errors::RefreshError;
use crate::interrupt::InterruptFlag;
use crate::logging::append_run_log;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How long an interrupted child gets to exit on its own before it is killed.
pub const DEFAULT_INTERRUPT_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// Exit status of a child whose standard streams were inherited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    /// `-1` when the child was terminated by a signal.
    pub exit_code: i32,
}

impl ProcessStatus {
    pub fn success(self) -> bool {
        self.exit_code == 0
    }
}

pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, RefreshError>;
    fn wait(&self, handle: u64) -> Result<ProcessStatus, RefreshError>;

    fn run(&self, request: ProcessRequest) -> Result<ProcessStatus, RefreshError> {
        let handle = self.spawn(request)?;
        self.wait(handle)
    }
}

#[derive(Default)]
struct ProcessState {
    next_handle: u64,
    children: HashMap<u64, std::process::Child>,
}

pub struct ProductionProcessRunner {
    state: Mutex<ProcessState>,
    interrupt: Option<InterruptFlag>,
    grace: Duration,
}

impl ProductionProcessRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::default()),
            interrupt: None,
            grace: DEFAULT_INTERRUPT_GRACE,
        }
    }

    /// Waits poll `interrupt`. Once it is set, no new child is spawned and a
    /// running child is killed if it outlives `grace`.
    pub fn with_interrupt(interrupt: InterruptFlag, grace: Duration) -> Self {
        Self {
            interrupt: Some(interrupt),
            grace,
            ..Self::new()
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(InterruptFlag::is_set)
    }

    fn poll_until_exit(
        &self,
        child: &mut Child,
        flag: &InterruptFlag,
    ) -> Result<ProcessStatus, RefreshError> {
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| RefreshError::Process(e.to_string()))?
            {
                if flag.is_set() {
                    return Err(RefreshError::Interrupted);
                }
                return Ok(ProcessStatus {
                    exit_code: status.code().unwrap_or(-1),
                });
            }
            if flag.is_set() {
                return self.stop_interrupted(child);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn stop_interrupted(&self, child: &mut Child) -> Result<ProcessStatus, RefreshError> {
        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            if child
                .try_wait()
                .map_err(|e| RefreshError::Process(e.to_string()))?
                .is_some()
            {
                return Err(RefreshError::Interrupted);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        let _ = child.kill();
        let _ = child.wait();
        append_run_log(
            "warn",
            "process.interrupt.killed",
            json!({
                "pid": child.id(),
                "grace_ms": self.grace.as_millis() as u64
            }),
        );
        Err(RefreshError::Interrupted)
    }
}

impl Default for ProductionProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for ProductionProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, RefreshError> {
        if self.interrupted() {
            return Err(RefreshError::Interrupted);
        }
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(std::process::Stdio::inherit())
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::inherit());

        let child = cmd
            .spawn()
            .map_err(|e| RefreshError::Process(format!("{}: {e}", request.program)))?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| RefreshError::Process("process lock poisoned".to_string()))?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state.children.insert(handle, child);
        Ok(handle)
    }

    fn wait(&self, handle: u64) -> Result<ProcessStatus, RefreshError> {
        let child = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| RefreshError::Process("process lock poisoned".to_string()))?;
            state.children.remove(&handle)
        };
        let mut child =
            child.ok_or_else(|| RefreshError::Process(format!("unknown handle {handle}")))?;
        if let Some(flag) = &self.interrupt {
            return self.poll_until_exit(&mut child, flag);
        }
        let status = child
            .wait()
            .map_err(|e| RefreshError::Process(e.to_string()))?;
        Ok(ProcessStatus {
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

pub struct ProductionRuntime {
    pub process_runner: Arc<dyn ProcessRunner>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            process_runner: Arc::new(ProductionProcessRunner::new()),
        }
    }

    pub fn with_interrupt(interrupt: InterruptFlag) -> Self {
        Self {
            process_runner: Arc::new(ProductionProcessRunner::with_interrupt(
                interrupt,
                DEFAULT_INTERRUPT_GRACE,
            )),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

pub type ProcessEffect = Arc<dyn Fn(&ProcessRequest) + Send + Sync>;

/// Scripted runner. Responses are consumed in order; the optional effect runs
/// on every spawn so tests can stand in for what the child would write.
#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessStatus, RefreshError>>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
    waits: Arc<Mutex<Vec<u64>>>,
    next_handle: Arc<Mutex<u64>>,
    effect: Option<ProcessEffect>,
}

impl FakeProcessRunner {
    pub fn with_effect(effect: impl Fn(&ProcessRequest) + Send + Sync + 'static) -> Self {
        let effect: ProcessEffect = Arc::new(effect);
        Self {
            effect: Some(effect),
            ..Self::default()
        }
    }

    pub fn push_response(&self, status: Result<ProcessStatus, RefreshError>) {
        self.responses.lock().expect("responses lock").push(status);
    }

    pub fn push_exit_code(&self, exit_code: i32) {
        self.push_response(Ok(ProcessStatus { exit_code }));
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }

    pub fn waits(&self) -> Vec<u64> {
        self.waits.lock().expect("waits lock").clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, RefreshError> {
        if let Some(effect) = &self.effect {
            effect(&request);
        }
        self.spawned.lock().expect("spawned lock").push(request);
        let mut next = self.next_handle.lock().expect("next lock");
        let handle = *next;
        *next += 1;
        Ok(handle)
    }

    fn wait(&self, handle: u64) -> Result<ProcessStatus, RefreshError> {
        self.waits.lock().expect("waits lock").push(handle);
        let mut responses = self.responses.lock().expect("responses lock");
        if responses.is_empty() {
            return Err(RefreshError::Process(
                "no fake response queued".to_string(),
            ));
        }
        responses.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::{FakeProcessRunner, ProcessRequest, ProcessRunner, ProductionProcessRunner};
    use crate::errors::RefreshError;
    use crate::interrupt::InterruptFlag;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn request() -> ProcessRequest {
        ProcessRequest {
            program: "code-map".to_string(),
            args: vec!["--scan-dir".to_string(), "/tmp/x".to_string()],
            cwd: None,
        }
    }

    #[test]
    fn fake_runner_replays_queued_statuses_in_order() {
        let runner = FakeProcessRunner::default();
        runner.push_exit_code(0);
        runner.push_exit_code(3);

        assert!(runner.run(request()).expect("first").success());
        assert_eq!(runner.run(request()).expect("second").exit_code, 3);
        assert_eq!(runner.waits(), vec![0, 1]);
        assert_eq!(runner.spawned().len(), 2);
    }

    #[test]
    fn fake_runner_errors_when_nothing_is_queued() {
        let runner = FakeProcessRunner::default();
        assert!(runner.run(request()).is_err());
    }

    #[test]
    fn fake_runner_runs_effect_on_spawn() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let runner = FakeProcessRunner::with_effect(move |req| {
            assert_eq!(req.program, "code-map");
            seen.fetch_add(1, Ordering::SeqCst);
        });
        runner.push_exit_code(0);
        runner.run(request()).expect("run");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn production_runner_reports_exit_codes() {
        let runner = ProductionProcessRunner::new();
        let status = runner
            .run(ProcessRequest {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "exit 4".to_string()],
                cwd: None,
            })
            .expect("run sh");
        assert_eq!(status.exit_code, 4);
    }

    #[test]
    fn interrupted_runner_refuses_to_spawn() {
        let flag = InterruptFlag::new();
        flag.trigger();
        let runner = ProductionProcessRunner::with_interrupt(flag, Duration::from_millis(10));
        let err = runner
            .run(ProcessRequest {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "exit 0".to_string()],
                cwd: None,
            })
            .expect_err("interrupted");
        assert!(matches!(err, RefreshError::Interrupted));
    }

    #[cfg(unix)]
    #[test]
    fn interrupt_kills_child_that_outlives_grace() {
        let flag = InterruptFlag::new();
        let runner =
            ProductionProcessRunner::with_interrupt(flag.clone(), Duration::from_millis(100));
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.trigger();
        });

        let started = Instant::now();
        let err = runner
            .run(ProcessRequest {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "exec sleep 30".to_string()],
                cwd: None,
            })
            .expect_err("interrupted");
        trigger.join().expect("trigger thread");

        assert!(matches!(err, RefreshError::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn child_finishing_after_interrupt_still_reports_interrupted() {
        let flag = InterruptFlag::new();
        let runner = ProductionProcessRunner::with_interrupt(flag.clone(), Duration::from_secs(20));
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            flag.trigger();
        });

        let err = runner
            .run(ProcessRequest {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "sleep 1; exit 0".to_string()],
                cwd: None,
            })
            .expect_err("interrupted");
        trigger.join().expect("trigger thread");
        assert!(matches!(err, RefreshError::Interrupted));
    }

    #[cfg(unix)]
    #[test]
    fn uninterrupted_polling_runner_reports_exit_code() {
        let runner =
            ProductionProcessRunner::with_interrupt(InterruptFlag::new(), Duration::from_millis(10));
        let status = runner
            .run(ProcessRequest {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "sleep 0.1; exit 5".to_string()],
                cwd: None,
            })
            .expect("run sh");
        assert_eq!(status.exit_code, 5);
    }

    #[test]
    fn production_runner_surfaces_spawn_failures() {
        let runner = ProductionProcessRunner::new();
        let err = runner
            .run(ProcessRequest {
                program: "/definitely/not/a/real/code-map".to_string(),
                args: Vec::new(),
                cwd: None,
            })
            .expect_err("missing binary");
        assert!(err.to_string().contains("process error"));
    }
}
