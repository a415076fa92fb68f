//! Event drain loop.
//!
//! One task per open session.  It sleeps on the driver wake-up notifier,
//! queries the combined device status, then either classifies a modem
//! status change or drains the queued receive bytes into the
//! [`ReceiveBuffer`](crate::ftdi::buffer::ReceiveBuffer).  A failed status
//! query is the only transition to [`DrainState::Faulted`]; the task exits
//! and draining stays off until the session is reopened.

use crate::ftdi::driver::EventMask;
use crate::ftdi::session::SessionCore;
use crate::ftdi::status::classify;
use crate::ftdi::types::ErrorFlags;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Observable state of the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DrainState {
    /// Waiting for a driver wake-up.
    #[default]
    Idle,
    /// Reading queued bytes.
    Draining,
    /// Handling a modem status change.
    ClassifyingStatus,
    /// Status query failed; terminal until reopened.
    Faulted,
    /// Session closed.
    Stopped,
}

impl DrainState {
    /// State entered for a wake-up whose event cause is `events`.
    ///
    /// A modem status change takes precedence over received data;
    /// unrecognised causes leave the loop idle.
    pub fn on_wake(events: EventMask) -> DrainState {
        if events.contains(EventMask::MODEM_STATUS) {
            DrainState::ClassifyingStatus
        } else if events.contains(EventMask::RXCHAR) {
            DrainState::Draining
        } else {
            DrainState::Idle
        }
    }

    /// The loop no longer runs in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DrainState::Faulted | DrainState::Stopped)
    }
}

/// Shutdown signal shared between a session and its drain task.
#[derive(Default)]
pub(crate) struct DrainControl {
    stopping: AtomicBool,
    stop: Notify,
}

impl DrainControl {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.stop.notify_one();
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    async fn stopped(&self) {
        if self.is_stopping() {
            return;
        }
        self.stop.notified().await;
    }
}

enum Step {
    Continue,
    Stop,
    Fault,
}

/// Drive the loop until shutdown or fault.
pub(crate) async fn run(core: Arc<SessionCore>, wake: Arc<Notify>, control: Arc<DrainControl>) {
    loop {
        core.set_drain_state(DrainState::Idle);
        tokio::select! {
            biased;
            _ = control.stopped() => break,
            _ = wake.notified() => {}
        }
        match step(&core, &control).await {
            Step::Continue => {}
            Step::Stop => break,
            Step::Fault => {
                core.set_drain_state(DrainState::Faulted);
                warn!("Drain loop faulted; draining disabled until reopen");
                return;
            }
        }
    }
    core.set_drain_state(DrainState::Stopped);
    trace!("Drain loop stopped");
}

async fn step(core: &SessionCore, control: &DrainControl) -> Step {
    let status = match core.hardware.query_status().await {
        Ok(status) => status,
        Err(e) => {
            if control.is_stopping() {
                return Step::Stop;
            }
            // NOT_OPEN only shows up when the handle went away without a
            // stop request; a regular close stops the loop silently.
            core.report_error(core.failure_flag(ErrorFlags::READ), &e.message);
            return Step::Fault;
        }
    };

    match DrainState::on_wake(status.events) {
        DrainState::ClassifyingStatus => {
            core.set_drain_state(DrainState::ClassifyingStatus);
            classify_status(core, control).await;
        }
        DrainState::Draining => {
            core.set_drain_state(DrainState::Draining);
            drain(core, control).await;
        }
        _ => trace!("Ignoring wake-up with events {:?}", status.events),
    }
    Step::Continue
}

async fn classify_status(core: &SessionCore, control: &DrainControl) {
    let word = match core.hardware.modem_status().await {
        Ok(word) => word,
        Err(e) => {
            if !control.is_stopping() {
                core.report_error(core.failure_flag(ErrorFlags::READ), &e.message);
            }
            return;
        }
    };

    let status = classify(word);
    if status.serious {
        debug!("Serious line error in status {:#06x}; purging buffers", word);
        match core.hardware.purge().await {
            Ok(()) => core.record_purge(),
            Err(e) => warn!("Purge after line error failed: {}", e),
        }
    } else {
        core.set_error_flags(status.errors);
    }
}

async fn drain(core: &SessionCore, control: &DrainControl) {
    match core.hardware.drain_rx().await {
        Ok(bytes) if bytes.is_empty() => {}
        Ok(bytes) => {
            core.buffer.push(&bytes);
            core.record_drain(bytes.len());
            trace!("Drained {} bytes", bytes.len());
            core.emit(crate::ftdi::session::SessionEvent::ReadyRead {
                received: bytes.len(),
                available: core.buffer.available(),
            });
        }
        Err(e) => {
            if !control.is_stopping() {
                core.report_error(core.failure_flag(ErrorFlags::READ), &e.message);
            }
        }
    }
}
