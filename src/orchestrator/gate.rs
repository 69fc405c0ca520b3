//! Run controls: the pause gate, the stop flag and the external handle.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::captcha::ManualChannel;
use crate::error::CaptchaError;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Searching,
    /// Waiting on a manual CAPTCHA.
    Paused,
    Tabulating,
    Completed,
    StoppedByUser,
    /// The run configuration was rejected before searching.
    Failed,
}

/// Shared open/closed gate. Closed means new work waits.
#[derive(Debug)]
pub struct PauseGate {
    open: watch::Sender<bool>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    /// Reopen the gate for every waiter at once.
    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    pub async fn wait_open(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Run-scoped control state.
#[derive(Debug)]
pub(crate) struct RunControl {
    pub gate: PauseGate,
    stop: watch::Sender<bool>,
    phase: watch::Sender<RunPhase>,
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            gate: PauseGate::new(),
            stop: watch::channel(false).0,
            phase: watch::channel(RunPhase::Idle).0,
        }
    }

    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    pub async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn set_phase(&self, phase: RunPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            info!("Run phase {:?} -> {:?}", previous, phase);
        }
    }
}

/// Cloneable controller for a running orchestrator.
#[derive(Clone)]
pub struct RunHandle {
    control: Arc<RunControl>,
    channel: Arc<ManualChannel>,
}

impl RunHandle {
    pub(crate) fn new(control: Arc<RunControl>, channel: Arc<ManualChannel>) -> Self {
        Self { control, channel }
    }

    /// Ask the run to stop at the next query or batch boundary.
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.control.request_stop();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.control.is_stopped()
    }

    pub fn pause(&self) {
        self.control.gate.close();
    }

    pub fn resume(&self) {
        self.control.gate.open();
    }

    pub fn is_paused(&self) -> bool {
        !self.control.gate.is_open()
    }

    pub fn phase(&self) -> RunPhase {
        self.control.phase()
    }

    /// Answer a published challenge.
    pub fn submit_solution(
        &self,
        id: Uuid,
        solution: impl Into<String>,
    ) -> Result<(), CaptchaError> {
        self.channel.submit_solution(id, solution)
    }
}
