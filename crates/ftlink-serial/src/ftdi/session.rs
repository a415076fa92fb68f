//! Device session: the byte-stream surface over one FTDI device.
//!
//! A [`DeviceSession`] owns a [`HardwareSession`], a [`ReceiveBuffer`] and,
//! while open, one drain task.  Callers read from the buffer without ever
//! touching the hardware mutex; writes and configuration go through it.
//! Notifications are published on a broadcast channel.

use crate::ftdi::buffer::ReceiveBuffer;
use crate::ftdi::drain::{self, DrainControl, DrainState};
use crate::ftdi::driver::FtDriver;
use crate::ftdi::error::{FtError, FtResult};
use crate::ftdi::hardware::HardwareSession;
use crate::ftdi::types::*;
use crate::ftdi::wait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Notifications emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Connected,
    AboutToClose,
    /// Bytes were appended to the receive buffer.
    ReadyRead { received: usize, available: usize },
    BaudRateChanged { baud_rate: u32 },
    LineFormatChanged { line_format: LineFormat },
    FlowControlChanged { flow_control: FlowControl },
    DataTerminalReadyChanged { on: bool },
    RequestToSendChanged { on: bool },
    ErrorOccurred { flags: ErrorFlags, message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Shared core
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct ErrorState {
    flags: ErrorFlags,
    message: String,
}

#[derive(Default)]
struct Counters {
    bytes_rx: AtomicU64,
    bytes_tx: AtomicU64,
    drains: AtomicU64,
    purges: AtomicU64,
    errors: AtomicU64,
}

/// State shared between a session handle and its drain task.
pub(crate) struct SessionCore {
    pub(crate) hardware: HardwareSession,
    pub(crate) buffer: ReceiveBuffer,
    error: Mutex<ErrorState>,
    drain_state: Mutex<DrainState>,
    events: broadcast::Sender<SessionEvent>,
    counters: Counters,
}

impl SessionCore {
    pub(crate) fn new(driver: Arc<dyn FtDriver>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            hardware: HardwareSession::new(driver, config),
            buffer: ReceiveBuffer::new(),
            error: Mutex::new(ErrorState::default()),
            drain_state: Mutex::new(DrainState::Stopped),
            events,
            counters: Counters::default(),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// `when_open` while the handle is held, otherwise `NOT_OPEN`.
    pub(crate) fn failure_flag(&self, when_open: ErrorFlags) -> ErrorFlags {
        if self.hardware.is_open() {
            when_open
        } else {
            ErrorFlags::NOT_OPEN
        }
    }

    /// Overwrite the error flags, store the message and notify listeners.
    pub(crate) fn report_error(&self, flags: ErrorFlags, message: &str) {
        {
            let mut st = self.error.lock();
            st.flags = flags;
            st.message = message.to_string();
        }
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!("{} ({:?})", message, flags);
        self.emit(SessionEvent::ErrorOccurred {
            flags,
            message: message.to_string(),
        });
    }

    pub(crate) fn set_error_flags(&self, flags: ErrorFlags) {
        self.error.lock().flags = flags;
    }

    pub(crate) fn set_error_string(&self, message: &str) {
        self.error.lock().message = message.to_string();
    }

    pub(crate) fn error_flags(&self) -> ErrorFlags {
        self.error.lock().flags
    }

    pub(crate) fn error_string(&self) -> String {
        self.error.lock().message.clone()
    }

    pub(crate) fn clear_error(&self) {
        self.error.lock().flags = ErrorFlags::empty();
    }

    pub(crate) fn set_drain_state(&self, state: DrainState) {
        *self.drain_state.lock() = state;
    }

    pub(crate) fn drain_state(&self) -> DrainState {
        *self.drain_state.lock()
    }

    pub(crate) fn record_drain(&self, bytes: usize) {
        self.counters.drains.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_rx.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_purge(&self) {
        self.counters.purges.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self, bytes: usize) {
        self.counters.bytes_tx.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> SessionStats {
        SessionStats {
            bytes_rx: self.counters.bytes_rx.load(Ordering::Relaxed),
            bytes_tx: self.counters.bytes_tx.load(Ordering::Relaxed),
            drains: self.counters.drains.load(Ordering::Relaxed),
            purges: self.counters.purges.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Store a failed call's message and hand the error back.
    fn fail<T>(&self, err: FtError) -> FtResult<T> {
        self.set_error_string(&err.message);
        Err(err)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct DrainTask {
    control: Arc<DrainControl>,
    join: JoinHandle<()>,
}

/// A byte-stream session over one FTDI device.
pub struct DeviceSession {
    core: Arc<SessionCore>,
    drain: Mutex<Option<DrainTask>>,
}

impl DeviceSession {
    /// Session with default configuration.
    pub fn new(driver: Arc<dyn FtDriver>) -> Self {
        Self::build(driver, SessionConfig::default())
    }

    /// Session with a caller-supplied configuration, validated up front.
    pub fn with_config(driver: Arc<dyn FtDriver>, config: SessionConfig) -> FtResult<Self> {
        config.validate()?;
        Ok(Self::build(driver, config))
    }

    fn build(driver: Arc<dyn FtDriver>, config: SessionConfig) -> Self {
        Self {
            core: Arc::new(SessionCore::new(driver, config)),
            drain: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.subscribe()
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Open the first device matching the selected vendor/product pair and
    /// start draining it.
    pub async fn open(&self) -> FtResult<DeviceIdentity> {
        let (identity, wake) = match self.core.hardware.open().await {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Open failed: {}", e);
                return self.core.fail(e);
            }
        };

        let control = DrainControl::new();
        self.core.set_drain_state(DrainState::Idle);
        let join = tokio::spawn(drain::run(self.core.clone(), wake, control.clone()));
        if let Some(stale) = self.drain.lock().replace(DrainTask { control, join }) {
            stale.control.request_stop();
            stale.join.abort();
        }

        info!("Session connected to {}", identity.product_name);
        self.core.emit(SessionEvent::Connected);
        Ok(identity)
    }

    /// Select a vendor/product pair and open it.
    pub async fn open_device(&self, vendor_id: u16, product_id: u16) -> FtResult<DeviceIdentity> {
        self.set_port(vendor_id, product_id);
        self.open().await
    }

    /// Stop draining and release the handle.  Safe to call repeatedly.
    pub async fn close(&self) {
        let task = self.drain.lock().take();
        if let Some(task) = &task {
            task.control.request_stop();
        }

        let was_open = self.core.hardware.close().await;

        if let Some(task) = task {
            if let Err(e) = task.join.await {
                debug!("Drain task ended abnormally: {}", e);
            }
        }
        self.core.set_drain_state(DrainState::Stopped);

        if was_open {
            info!("Session closed");
            self.core.emit(SessionEvent::AboutToClose);
        }
    }

    pub fn is_open(&self) -> bool {
        self.core.hardware.is_open()
    }

    // ── I/O ───────────────────────────────────────────────────────

    /// Copy up to `buf.len()` buffered bytes into `buf`; never waits.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.core.buffer.read(buf)
    }

    /// Claim up to `max` buffered bytes.
    pub fn read_to_vec(&self, max: usize) -> Vec<u8> {
        self.core.buffer.read_to_vec(max)
    }

    pub fn bytes_available(&self) -> usize {
        self.core.buffer.available()
    }

    /// Write `data` to the device, returning the driver's byte count.
    pub async fn write(&self, data: &[u8]) -> FtResult<usize> {
        match self.core.hardware.write_raw(data).await {
            Ok(n) => {
                self.core.record_write(n);
                Ok(n)
            }
            Err(e) => {
                self.core
                    .report_error(self.core.failure_flag(ErrorFlags::WRITE), &e.message);
                Err(e)
            }
        }
    }

    /// Wait for the next drain to deliver data.
    pub async fn wait_for_data(&self, timeout: Duration) -> FtResult<()> {
        wait::wait_for_data(&self.core, timeout).await
    }

    /// Wait until at least `min` bytes are buffered.
    pub async fn wait_for_bytes(&self, min: usize, timeout: Duration) -> FtResult<()> {
        wait::wait_for_bytes(&self.core, min, timeout).await
    }

    // ── Configuration ─────────────────────────────────────────────

    pub async fn set_baud_rate(&self, baud_rate: u32) -> FtResult<()> {
        match self.core.hardware.set_baud_rate(baud_rate).await {
            Ok(true) => {
                self.core.emit(SessionEvent::BaudRateChanged { baud_rate });
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => self.core.fail(e),
        }
    }

    pub async fn set_line_format(&self, line_format: LineFormat) -> FtResult<()> {
        if let Err(e) = self.core.hardware.set_line_format(line_format).await {
            return self.core.fail(e);
        }
        self.core.emit(SessionEvent::LineFormatChanged { line_format });
        Ok(())
    }

    pub async fn set_flow_control(&self, flow_control: FlowControl) -> FtResult<()> {
        if let Err(e) = self.core.hardware.set_flow_control(flow_control).await {
            return self.core.fail(e);
        }
        self.core.emit(SessionEvent::FlowControlChanged { flow_control });
        Ok(())
    }

    pub async fn set_data_terminal_ready(&self, on: bool) -> FtResult<()> {
        if let Err(e) = self.core.hardware.set_dtr(on).await {
            return self.core.fail(e);
        }
        self.core.emit(SessionEvent::DataTerminalReadyChanged { on });
        Ok(())
    }

    pub async fn set_request_to_send(&self, on: bool) -> FtResult<()> {
        if let Err(e) = self.core.hardware.set_rts(on).await {
            return self.core.fail(e);
        }
        self.core.emit(SessionEvent::RequestToSendChanged { on });
        Ok(())
    }

    pub fn settings(&self) -> PortSettings {
        self.core.hardware.settings()
    }

    pub fn baud_rate(&self) -> u32 {
        self.settings().baud_rate
    }

    pub fn line_format(&self) -> LineFormat {
        self.settings().line_format
    }

    pub fn flow_control(&self) -> FlowControl {
        self.settings().flow_control
    }

    pub fn is_data_terminal_ready(&self) -> bool {
        self.settings().dtr
    }

    pub fn is_request_to_send(&self) -> bool {
        self.settings().rts
    }

    /// Input line signals; empty while closed or when the read fails.
    pub async fn pinout_signals(&self) -> SignalFlags {
        match self.core.hardware.pinout_signals().await {
            Ok(signals) => signals,
            Err(e) => {
                self.core.set_error_string(&e.message);
                SignalFlags::empty()
            }
        }
    }

    // ── Errors ────────────────────────────────────────────────────

    /// Sticky error flags; cleared only by [`clear_error`](Self::clear_error).
    pub fn error(&self) -> ErrorFlags {
        self.core.error_flags()
    }

    pub fn clear_error(&self) {
        self.core.clear_error();
    }

    /// Message of the most recent failure.
    pub fn error_string(&self) -> String {
        self.core.error_string()
    }

    // ── Identity ──────────────────────────────────────────────────

    /// Select the vendor/product pair matched on the next open.
    pub fn set_port(&self, vendor_id: u16, product_id: u16) {
        self.core.hardware.set_port(vendor_id, product_id);
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.core.hardware.identity()
    }

    /// Product name of the opened device, empty before the first open.
    pub fn port_name(&self) -> String {
        self.identity().map(|i| i.product_name).unwrap_or_default()
    }

    pub fn manufacturer(&self) -> String {
        self.identity().map(|i| i.manufacturer).unwrap_or_default()
    }

    pub fn serial_number(&self) -> String {
        self.identity().map(|i| i.serial_number).unwrap_or_default()
    }

    pub fn chip_id(&self) -> u32 {
        self.identity().map(|i| i.chip_id).unwrap_or_default()
    }

    pub fn library_version(&self) -> String {
        self.identity().map(|i| i.library_version).unwrap_or_default()
    }

    /// Vendor id of the opened device, or the selected one before opening.
    pub fn vendor_id(&self) -> u16 {
        match self.identity() {
            Some(i) => i.vendor_id,
            None => self.core.hardware.port().0,
        }
    }

    /// Product id of the opened device, or the selected one before opening.
    pub fn product_id(&self) -> u16 {
        match self.identity() {
            Some(i) => i.product_id,
            None => self.core.hardware.port().1,
        }
    }

    // ── Observation ───────────────────────────────────────────────

    pub fn drain_state(&self) -> DrainState {
        self.core.drain_state()
    }

    pub fn stats(&self) -> SessionStats {
        self.core.stats()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(task) = self.drain.get_mut().take() {
            task.control.request_stop();
            task.join.abort();
        }
        if !self.core.hardware.is_open() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let core = self.core.clone();
                rt.spawn(async move {
                    core.hardware.close().await;
                    core.set_drain_state(DrainState::Stopped);
                });
            }
            Err(_) => warn!("Session dropped while open outside a runtime; handle not closed"),
        }
    }
}
