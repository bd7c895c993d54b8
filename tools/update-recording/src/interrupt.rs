//! SIGINT/SIGTERM become a flag that the process runner polls, so an
//! interrupted run leaves through ordinary error returns and the snapshot
//! guard still runs.

use crate::errors::RefreshError;
use crate::logging::append_run_log;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Replaces the default terminate-on-signal behavior for the rest of the
/// process. Returns once the handlers are registered.
pub fn install_interrupt_handler() -> Result<InterruptFlag, RefreshError> {
    let flag = InterruptFlag::new();
    let listener_flag = flag.clone();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

    std::thread::Builder::new()
        .name("interrupt-listener".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            runtime.block_on(listen(listener_flag, ready_tx));
        })
        .map_err(|e| RefreshError::Io(format!("spawn interrupt listener: {e}")))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(flag),
        Ok(Err(e)) => Err(RefreshError::Io(format!("install interrupt handler: {e}"))),
        Err(_) => Err(RefreshError::Io(
            "interrupt listener exited before registering".to_string(),
        )),
    }
}

#[cfg(unix)]
async fn listen(flag: InterruptFlag, ready: mpsc::Sender<Result<(), String>>) {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    fn register() -> std::io::Result<(Signal, Signal)> {
        Ok((
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        ))
    }

    let (mut sigint, mut sigterm) = match register() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    loop {
        let name = tokio::select! {
            received = sigint.recv() => match received {
                Some(()) => "SIGINT",
                None => break,
            },
            received = sigterm.recv() => match received {
                Some(()) => "SIGTERM",
                None => break,
            },
        };
        flag.trigger();
        append_run_log(
            "warn",
            "refresh.interrupt.received",
            json!({ "signal": name }),
        );
    }
}

#[cfg(not(unix))]
async fn listen(flag: InterruptFlag, ready: mpsc::Sender<Result<(), String>>) {
    let _ = ready.send(Ok(()));
    while tokio::signal::ctrl_c().await.is_ok() {
        flag.trigger();
        append_run_log(
            "warn",
            "refresh.interrupt.received",
            json!({ "signal": "ctrl_c" }),
        );
    }
}
