//! Shared lifecycle scaffolding: checked state transitions, event reporting,
//! and backend supervision.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thv_core::{ExitInfo, TransportError, TransportEvent, TransportState, WorkloadProcess, shutdown_process};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// State cell with checked transitions.
///
/// `setup` is valid only from `Created`, `start` only from `Configured`;
/// anything may move to `Stopped`, which is terminal.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: watch::Sender<TransportState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(TransportState::Created);
        Self { state }
    }

    pub(crate) fn current(&self) -> TransportState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    fn transition(
        &self,
        operation: &'static str,
        from: TransportState,
        to: TransportState,
    ) -> Result<(), TransportError> {
        let mut observed = from;
        let moved = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                observed = *state;
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(TransportError::InvalidState {
                operation,
                state: observed,
            })
        }
    }

    pub(crate) fn configure(&self) -> Result<(), TransportError> {
        self.transition("setup", TransportState::Created, TransportState::Configured)
    }

    /// Fail unless the instance is ready to start.
    pub(crate) fn ensure_startable(&self) -> Result<(), TransportError> {
        match self.current() {
            TransportState::Configured => Ok(()),
            state => Err(TransportError::InvalidState {
                operation: "start",
                state,
            }),
        }
    }

    pub(crate) fn mark_running(&self) -> Result<(), TransportError> {
        self.transition("start", TransportState::Configured, TransportState::Running)
    }

    /// Move to `Stopped` from any state. Returns the previous state.
    pub(crate) fn stop(&self) -> TransportState {
        let mut previous = TransportState::Stopped;
        self.state.send_if_modified(|state| {
            previous = *state;
            if *state == TransportState::Stopped {
                false
            } else {
                *state = TransportState::Stopped;
                true
            }
        });
        previous
    }

    /// Move `Running → Stopped`; `false` if the instance was not running.
    ///
    /// Used by backend watchers so that exactly one of "owner stopped it" and
    /// "backend died" wins.
    pub(crate) fn stop_if_running(&self) -> bool {
        self.transition("stop", TransportState::Running, TransportState::Stopped)
            .is_ok()
    }
}

/// Unbounded channel for [`TransportEvent`]s; the receiver is taken once.
#[derive(Debug)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl EventSink {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn reporter(&self) -> EventReporter {
        EventReporter {
            tx: self.tx.clone(),
        }
    }

    pub(crate) fn take(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.rx.lock().ok().and_then(|mut rx| rx.take())
    }
}

/// Cloneable sending half of an [`EventSink`].
#[derive(Debug, Clone)]
pub(crate) struct EventReporter {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventReporter {
    pub(crate) fn report(&self, event: TransportEvent) {
        debug!(?event, "Reporting transport event");
        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }
}

/// How a backend watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackendOutcome {
    /// The workload exited on its own.
    Exited(Option<i32>),
    /// The instance was cancelled and the workload was shut down.
    Stopped,
}

/// Wait for either cancellation or workload exit.
///
/// On cancellation the workload is terminated with `grace` before it is
/// killed. On exit the caller decides how to tear the instance down.
pub(crate) async fn watch_backend(
    process: Arc<dyn WorkloadProcess>,
    cancel: CancellationToken,
    grace: Duration,
) -> BackendOutcome {
    let id = process.id();
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            match shutdown_process(process.as_ref(), grace).await {
                Ok(ExitInfo { code }) => debug!(process = %id, ?code, "Backend shut down"),
                Err(e) => warn!(process = %id, error = %e, "Backend shutdown failed"),
            }
            BackendOutcome::Stopped
        }
        exit = process.wait() => {
            let code = match exit {
                Ok(info) => info.code,
                Err(e) => {
                    warn!(process = %id, error = %e, "Lost track of backend process");
                    None
                }
            };
            BackendOutcome::Exited(code)
        }
    }
}
