//! Hardware session: the open device handle and everything that touches it.
//!
//! The handle lives inside a single `tokio::sync::Mutex`; every driver call
//! scoped to the handle (open, close, configuration, write, status queries,
//! drains, purges) runs with that mutex held, so at most one hardware
//! operation is in flight per session.  The mutex is held for the driver
//! call only, never for bookkeeping.

use crate::ftdi::driver::{DriverStatus, EventMask, FtDriver, FtHandle, QueueStatus};
use crate::ftdi::error::{FtError, FtResult};
use crate::ftdi::status;
use crate::ftdi::types::*;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, Notify};

/// Events armed on open.
pub const ARMED_EVENTS: EventMask = EventMask::RXCHAR.union(EventMask::MODEM_STATUS);

/// Owns the driver handle, the hardware mutex and the configuration record.
pub struct HardwareSession {
    driver: Arc<dyn FtDriver>,
    handle: Mutex<Option<FtHandle>>,
    open: AtomicBool,
    port: RwLock<(u16, u16)>,
    settings: RwLock<PortSettings>,
    identity: RwLock<Option<DeviceIdentity>>,
    config: SessionConfig,
}

impl HardwareSession {
    pub fn new(driver: Arc<dyn FtDriver>, config: SessionConfig) -> Self {
        Self {
            driver,
            handle: Mutex::new(None),
            open: AtomicBool::new(false),
            port: RwLock::new((config.vendor_id, config.product_id)),
            settings: RwLock::new(config.port_settings()),
            identity: RwLock::new(None),
            config,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Select the vendor/product pair matched on the next open.
    pub fn set_port(&self, vendor_id: u16, product_id: u16) {
        *self.port.write() = (vendor_id, product_id);
    }

    pub fn port(&self) -> (u16, u16) {
        *self.port.read()
    }

    pub fn settings(&self) -> PortSettings {
        *self.settings.read()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity.read().clone()
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Open the first device matching the selected vendor/product pair.
    ///
    /// Returns the cached identity and the driver's wake-up notifier.  Any
    /// failure after the handle was obtained closes it before returning.
    pub async fn open(&self) -> FtResult<(DeviceIdentity, Arc<Notify>)> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return Err(FtError::already_open());
        }

        let (vendor_id, product_id) = self.port();
        let nodes = self.driver.enumerate().await.map_err(|s| {
            FtError::enumeration_failed("an error occurred while enumerating devices").with_status(s)
        })?;

        let node = nodes
            .iter()
            .find(|n| n.matches(vendor_id, product_id))
            .copied()
            .ok_or_else(|| FtError::no_matching_device(vendor_id, product_id))?;

        let handle = self.driver.open(node.index).await.map_err(|s| {
            FtError::open_failed("an error occurred while opening the device").with_status(s)
        })?;

        match self.initialise(handle, node.device_type).await {
            Ok((identity, wake)) => {
                *guard = Some(handle);
                self.open.store(true, Ordering::SeqCst);
                *self.identity.write() = Some(identity.clone());
                info!(
                    "Opened {} ({:04X}:{:04X}, serial {}) at {}",
                    identity.product_name,
                    vendor_id,
                    product_id,
                    identity.serial_number,
                    self.settings().shorthand()
                );
                Ok((identity, wake))
            }
            Err(e) => {
                if let Err(s) = self.driver.close(handle).await {
                    debug!("Closing half-open handle failed: {}", s);
                }
                Err(e)
            }
        }
    }

    /// Apply configuration, read identity, purge and arm events on a fresh handle.
    async fn initialise(&self, handle: FtHandle, chip_id: u32) -> FtResult<(DeviceIdentity, Arc<Notify>)> {
        let settings = self.settings();
        let cfg = &self.config;

        self.driver
            .set_baud_rate(handle, settings.baud_rate)
            .await
            .map_err(|s| config_error("an error occurred while setting the baudrate", s))?;

        let lf = settings.line_format;
        self.driver
            .set_data_characteristics(handle, DATA_BITS, lf.stop_bits(), lf.parity())
            .await
            .map_err(|s| config_error("an error occurred while setting the data characteristics", s))?;

        self.driver
            .set_flow_control(handle, settings.flow_control, cfg.xon_char, cfg.xoff_char)
            .await
            .map_err(|s| config_error("an error occurred while setting the flow control", s))?;

        self.driver
            .set_latency_timer(handle, cfg.latency_timer_ms)
            .await
            .map_err(|s| config_error("an error occurred while setting the latency timer", s))?;

        self.driver
            .set_timeouts(handle, cfg.read_timeout_ms, cfg.write_timeout_ms)
            .await
            .map_err(|s| config_error("an error occurred while setting the timeouts", s))?;

        let eeprom = self.driver.read_identity(handle).await.map_err(|s| {
            FtError::identity_read_failed("an error occurred while reading the EEPROM").with_status(s)
        })?;

        let version = self.driver.library_version().await.map_err(|s| {
            FtError::identity_read_failed("an error occurred while getting the driver library version")
                .with_status(s)
        })?;

        if let Err(s) = self.driver.purge(handle, true, true).await {
            warn!("Initial buffer purge failed: {}", s);
        }

        let wake = self
            .driver
            .arm_event_notification(handle, ARMED_EVENTS)
            .await
            .map_err(|s| {
                FtError::event_arm_failed("an error occurred while setting the event notification")
                    .with_status(s)
            })?;

        let identity = DeviceIdentity {
            product_name: eeprom.description,
            serial_number: eeprom.serial_number.to_uppercase(),
            manufacturer: eeprom.manufacturer,
            chip_id,
            library_version: format_library_version(version),
            vendor_id: eeprom.vendor_id,
            product_id: eeprom.product_id,
        };
        Ok((identity, wake))
    }

    /// Close the handle if one is held.  Returns whether it was open.
    pub async fn close(&self) -> bool {
        let mut guard = self.handle.lock().await;
        let was_open = match guard.take() {
            Some(handle) => {
                if let Err(s) = self.driver.close(handle).await {
                    debug!("Driver close reported {}", s);
                }
                true
            }
            None => false,
        };
        self.open.store(false, Ordering::SeqCst);
        was_open
    }

    /// Lock the hardware mutex, requiring an open handle.
    async fn lock_open(&self) -> FtResult<(MutexGuard<'_, Option<FtHandle>>, FtHandle)> {
        let guard = self.handle.lock().await;
        match *guard {
            Some(handle) => Ok((guard, handle)),
            None => Err(FtError::not_open()),
        }
    }

    // ── Configuration ─────────────────────────────────────────────

    /// Apply a baud rate.  While closed the value is only stored for the
    /// next open; returns whether hardware was touched.
    pub async fn set_baud_rate(&self, baud: u32) -> FtResult<bool> {
        if baud == 0 {
            return Err(FtError::invalid_config("baud rate must be positive"));
        }
        {
            let guard = self.handle.lock().await;
            if let Some(handle) = *guard {
                self.driver
                    .set_baud_rate(handle, baud)
                    .await
                    .map_err(|s| config_error("an error occurred while setting the baudrate", s))?;
            } else {
                self.settings.write().baud_rate = baud;
                return Ok(false);
            }
        }
        self.settings.write().baud_rate = baud;
        debug!("Baud rate set to {}", baud);
        Ok(true)
    }

    pub async fn set_line_format(&self, line: LineFormat) -> FtResult<()> {
        {
            let (_guard, handle) = self.lock_open().await?;
            self.driver
                .set_data_characteristics(handle, DATA_BITS, line.stop_bits(), line.parity())
                .await
                .map_err(|s| config_error("an error occurred while setting the data characteristics", s))?;
        }
        self.settings.write().line_format = line;
        debug!("Line format set to {}", line.shorthand());
        Ok(())
    }

    pub async fn set_flow_control(&self, flow: FlowControl) -> FtResult<()> {
        {
            let (_guard, handle) = self.lock_open().await?;
            self.driver
                .set_flow_control(handle, flow, self.config.xon_char, self.config.xoff_char)
                .await
                .map_err(|s| config_error("an error occurred while setting the flow control", s))?;
        }
        self.settings.write().flow_control = flow;
        debug!("Flow control set to {:?}", flow);
        Ok(())
    }

    pub async fn set_dtr(&self, on: bool) -> FtResult<()> {
        {
            let (_guard, handle) = self.lock_open().await?;
            self.driver
                .set_dtr(handle, on)
                .await
                .map_err(|s| config_error("an error occurred while setting the DTR", s))?;
        }
        self.settings.write().dtr = on;
        Ok(())
    }

    pub async fn set_rts(&self, on: bool) -> FtResult<()> {
        {
            let (_guard, handle) = self.lock_open().await?;
            self.driver
                .set_rts(handle, on)
                .await
                .map_err(|s| config_error("an error occurred while setting the RTS", s))?;
        }
        self.settings.write().rts = on;
        Ok(())
    }

    // ── I/O ───────────────────────────────────────────────────────

    /// Write bytes; blocks behind any in-flight drain or configuration call.
    pub async fn write_raw(&self, data: &[u8]) -> FtResult<usize> {
        let (_guard, handle) = self.lock_open().await?;
        self.driver.write(handle, data).await.map_err(|s| {
            FtError::write_failed("an error occurred while writing to the port").with_status(s)
        })
    }

    /// Current input line signals; empty while closed.
    pub async fn pinout_signals(&self) -> FtResult<SignalFlags> {
        if !self.is_open() {
            return Ok(SignalFlags::empty());
        }
        let word = self.modem_status().await?;
        Ok(status::signals(word))
    }

    // ── Drain-loop primitives ─────────────────────────────────────

    /// Combined queue/event status.
    pub async fn query_status(&self) -> FtResult<QueueStatus> {
        let (_guard, handle) = self.lock_open().await?;
        self.driver.get_status(handle).await.map_err(|s| {
            FtError::status_failed("an error occurred while reading the device status").with_status(s)
        })
    }

    /// Raw modem status word.
    pub async fn modem_status(&self) -> FtResult<u32> {
        let (_guard, handle) = self.lock_open().await?;
        self.driver.get_modem_status(handle).await.map_err(|s| {
            FtError::read_failed("an error occurred while reading the modem status").with_status(s)
        })
    }

    /// Discard both hardware buffers.
    pub async fn purge(&self) -> FtResult<()> {
        let (_guard, handle) = self.lock_open().await?;
        self.driver
            .purge(handle, true, true)
            .await
            .map_err(|s| FtError::read_failed("an error occurred while purging the buffers").with_status(s))
    }

    /// Re-check the queued receive count and read exactly that many bytes,
    /// all under one hold of the hardware mutex.
    pub async fn drain_rx(&self) -> FtResult<Vec<u8>> {
        let (_guard, handle) = self.lock_open().await?;
        let queued = self.driver.get_queue_status(handle).await.map_err(|s| {
            FtError::read_failed("an error occurred while reading the queue status").with_status(s)
        })?;
        if queued == 0 {
            return Ok(Vec::new());
        }
        self.driver
            .read(handle, queued as usize)
            .await
            .map_err(|s| match s {
                DriverStatus::IoError => FtError::read_failed("an I/O error occurred").with_status(s),
                _ => FtError::read_failed("an error occurred while reading bytes from the device")
                    .with_status(s),
            })
    }
}

fn config_error(msg: &str, status: DriverStatus) -> FtError {
    FtError::configuration_failed(msg).with_status(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftdi::error::FtErrorKind;
    use crate::ftdi::simulated::{HwCall, HwOp, SimulatedDriver};

    fn session(driver: &Arc<SimulatedDriver>) -> HardwareSession {
        HardwareSession::new(driver.clone(), SessionConfig::default())
    }

    #[tokio::test]
    async fn test_open_applies_configuration() {
        let d = SimulatedDriver::with_ft232r();
        let hw = session(&d);
        let (identity, _wake) = hw.open().await.unwrap();
        assert!(hw.is_open());
        assert_eq!(identity.product_name, "FT232R USB UART");
        assert_eq!(identity.serial_number, "A9XK2B1Q");
        assert_eq!(identity.library_version, "3.02.11");
        assert_eq!(identity.chip_id, 5);

        let calls = d.calls();
        assert_eq!(calls[0], HwCall::Open(0));
        assert!(calls.contains(&HwCall::SetBaudRate(115200)));
        assert!(calls.contains(&HwCall::SetDataCharacteristics {
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }));
        assert!(calls.contains(&HwCall::SetLatencyTimer(3)));
        assert!(calls.contains(&HwCall::SetTimeouts {
            read_ms: 5000,
            write_ms: 2000,
        }));
        assert!(calls.contains(&HwCall::Purge { rx: true, tx: true }));
        assert_eq!(d.armed_events(), ARMED_EVENTS);
    }

    #[tokio::test]
    async fn test_open_twice_rejected() {
        let d = SimulatedDriver::with_ft232r();
        let hw = session(&d);
        hw.open().await.unwrap();
        let err = hw.open().await.unwrap_err();
        assert_eq!(err.kind, FtErrorKind::AlreadyOpen);
        assert_eq!(d.open_handle_count(), 1);
    }

    #[tokio::test]
    async fn test_open_failures_map_to_kinds() {
        let cases = [
            (HwOp::Enumerate, FtErrorKind::EnumerationFailed),
            (HwOp::Open, FtErrorKind::OpenFailed),
            (HwOp::SetBaudRate, FtErrorKind::ConfigurationFailed),
            (HwOp::SetDataCharacteristics, FtErrorKind::ConfigurationFailed),
            (HwOp::SetFlowControl, FtErrorKind::ConfigurationFailed),
            (HwOp::SetLatencyTimer, FtErrorKind::ConfigurationFailed),
            (HwOp::SetTimeouts, FtErrorKind::ConfigurationFailed),
            (HwOp::ReadIdentity, FtErrorKind::IdentityReadFailed),
            (HwOp::LibraryVersion, FtErrorKind::IdentityReadFailed),
            (HwOp::ArmEvents, FtErrorKind::EventArmFailed),
        ];
        for (op, kind) in cases {
            let d = SimulatedDriver::with_ft232r();
            d.fail(op, DriverStatus::OtherError);
            let hw = session(&d);
            let err = hw.open().await.unwrap_err();
            assert_eq!(err.kind, kind, "failing {:?}", op);
            assert!(!hw.is_open());
            assert_eq!(d.open_handle_count(), 0, "handle leaked when failing {:?}", op);
        }
    }

    #[tokio::test]
    async fn test_setters_fail_while_closed_without_touching_hardware() {
        let d = SimulatedDriver::with_ft232r();
        let hw = session(&d);
        assert_eq!(hw.set_dtr(true).await.unwrap_err().kind, FtErrorKind::NotOpen);
        assert_eq!(hw.set_rts(true).await.unwrap_err().kind, FtErrorKind::NotOpen);
        assert_eq!(
            hw.set_line_format(LineFormat::Serial8E1).await.unwrap_err().kind,
            FtErrorKind::NotOpen
        );
        assert_eq!(
            hw.set_flow_control(FlowControl::RtsCts).await.unwrap_err().kind,
            FtErrorKind::NotOpen
        );
        assert!(d.calls().is_empty());
        assert_eq!(hw.settings(), PortSettings::default());
    }

    #[tokio::test]
    async fn test_baud_rate_stored_while_closed() {
        let d = SimulatedDriver::with_ft232r();
        let hw = session(&d);
        assert!(!hw.set_baud_rate(921_600).await.unwrap());
        assert!(d.calls().is_empty());
        hw.open().await.unwrap();
        assert!(d.calls().contains(&HwCall::SetBaudRate(921_600)));
        assert!(!d.calls().contains(&HwCall::SetBaudRate(115_200)));
    }

    #[tokio::test]
    async fn test_failed_setter_keeps_previous_value() {
        let d = SimulatedDriver::with_ft232r();
        let hw = session(&d);
        hw.open().await.unwrap();
        hw.set_flow_control(FlowControl::XonXoff).await.unwrap();
        d.fail(HwOp::SetFlowControl, DriverStatus::InvalidParameter);
        let err = hw.set_flow_control(FlowControl::DtrDsr).await.unwrap_err();
        assert_eq!(err.kind, FtErrorKind::ConfigurationFailed);
        assert_eq!(err.driver_status, Some(DriverStatus::InvalidParameter));
        assert_eq!(hw.settings().flow_control, FlowControl::XonXoff);
        assert!(hw.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let d = SimulatedDriver::with_ft232r();
        let hw = session(&d);
        hw.open().await.unwrap();
        assert!(hw.close().await);
        assert!(!hw.close().await);
        assert!(!hw.is_open());
        assert_eq!(d.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn test_pinout_signals_closed_is_empty() {
        let d = SimulatedDriver::with_ft232r();
        d.set_modem_status(0x00F0);
        let hw = session(&d);
        assert_eq!(hw.pinout_signals().await.unwrap(), SignalFlags::empty());
        hw.open().await.unwrap();
        assert_eq!(hw.pinout_signals().await.unwrap(), SignalFlags::all());
    }

    #[tokio::test]
    async fn test_drain_rx_reads_queued_count() {
        let d = SimulatedDriver::with_ft232r();
        let hw = session(&d);
        hw.open().await.unwrap();
        d.inject_rx(b"payload");
        d.clear_calls();
        assert_eq!(hw.drain_rx().await.unwrap(), b"payload");
        assert_eq!(d.calls(), vec![HwCall::GetQueueStatus, HwCall::Read(7)]);
        // Nothing queued: no read issued.
        d.clear_calls();
        assert!(hw.drain_rx().await.unwrap().is_empty());
        assert_eq!(d.calls(), vec![HwCall::GetQueueStatus]);
    }

    #[tokio::test]
    async fn test_drain_rx_io_error_message() {
        let d = SimulatedDriver::with_ft232r();
        let hw = session(&d);
        hw.open().await.unwrap();
        d.inject_rx(b"x");
        d.fail(HwOp::Read, DriverStatus::IoError);
        let err = hw.drain_rx().await.unwrap_err();
        assert_eq!(err.kind, FtErrorKind::ReadFailed);
        assert_eq!(err.message, "an I/O error occurred");
    }
}
