//! Driver collaborator seam.
//!
//! The vendor library (D2XX or equivalent) is a return-code based API
//! operating on opaque device handles.  The session core only ever talks to
//! it through [`FtDriver`], so the real back-end is injected at construction
//! and tests substitute [`SimulatedDriver`](crate::ftdi::simulated::SimulatedDriver).

use crate::ftdi::types::{FlowControl, Parity, StopBits};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Driver-level values
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque device handle issued by [`FtDriver::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FtHandle(pub u64);

/// Non-OK driver return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    InvalidHandle,
    DeviceNotFound,
    DeviceNotOpened,
    IoError,
    InsufficientResources,
    InvalidParameter,
    InvalidBaudRate,
    EepromReadFailed,
    NotSupported,
    OtherError,
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidHandle => "invalid handle",
            Self::DeviceNotFound => "device not found",
            Self::DeviceNotOpened => "device not opened",
            Self::IoError => "I/O error",
            Self::InsufficientResources => "insufficient resources",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidBaudRate => "invalid baud rate",
            Self::EepromReadFailed => "EEPROM read failed",
            Self::NotSupported => "not supported",
            Self::OtherError => "other error",
        };
        f.write_str(text)
    }
}

/// One entry of the driver's device info list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNode {
    /// Index to pass to [`FtDriver::open`].
    pub index: u32,
    /// Packed `vendor << 16 | product` id.
    pub id: u32,
    /// Device type word (chip id).
    pub device_type: u32,
}

impl DeviceNode {
    pub fn new(index: u32, vendor_id: u16, product_id: u16, device_type: u32) -> Self {
        Self {
            index,
            id: Self::raw_id(vendor_id, product_id),
            device_type,
        }
    }

    /// Pack a vendor/product pair the way the driver reports it.
    pub fn raw_id(vendor_id: u16, product_id: u16) -> u32 {
        ((vendor_id as u32) << 16) | product_id as u32
    }

    pub fn vendor_id(&self) -> u16 {
        (self.id >> 16) as u16
    }

    pub fn product_id(&self) -> u16 {
        (self.id & 0xFFFF) as u16
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.id == Self::raw_id(vendor_id, product_id)
    }
}

bitflags! {
    /// Event causes the driver can signal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        const RXCHAR = 0x01;
        const MODEM_STATUS = 0x02;
        const LINE_STATUS = 0x04;
    }
}

/// Combined device status returned by [`FtDriver::get_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    pub rx_queued: u32,
    pub tx_queued: u32,
    pub events: EventMask,
}

/// Identity strings read from the device EEPROM.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EepromIdentity {
    pub manufacturer: String,
    pub description: String,
    pub serial_number: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Driver trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// USB-UART driver back-end.
///
/// Implementations must be `Send + Sync` so they can be held behind an
/// `Arc` and used from the drain task and caller tasks at once.  The
/// session guarantees that at most one handle-scoped call is in flight per
/// handle.
#[async_trait::async_trait]
pub trait FtDriver: Send + Sync {
    /// Build and return the device info list.
    async fn enumerate(&self) -> Result<Vec<DeviceNode>, DriverStatus>;

    /// Open the device at `index` of the last enumeration.
    async fn open(&self, index: u32) -> Result<FtHandle, DriverStatus>;

    /// Close a handle.  Closing an already-closed handle must not block.
    async fn close(&self, handle: FtHandle) -> Result<(), DriverStatus>;

    async fn set_baud_rate(&self, handle: FtHandle, baud: u32) -> Result<(), DriverStatus>;

    async fn set_data_characteristics(
        &self,
        handle: FtHandle,
        data_bits: u8,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<(), DriverStatus>;

    async fn set_flow_control(
        &self,
        handle: FtHandle,
        flow: FlowControl,
        xon: u8,
        xoff: u8,
    ) -> Result<(), DriverStatus>;

    async fn set_timeouts(&self, handle: FtHandle, read_ms: u32, write_ms: u32) -> Result<(), DriverStatus>;

    async fn set_latency_timer(&self, handle: FtHandle, latency_ms: u8) -> Result<(), DriverStatus>;

    async fn set_dtr(&self, handle: FtHandle, on: bool) -> Result<(), DriverStatus>;

    async fn set_rts(&self, handle: FtHandle, on: bool) -> Result<(), DriverStatus>;

    /// Discard pending bytes in the receive and/or transmit buffers.
    async fn purge(&self, handle: FtHandle, rx: bool, tx: bool) -> Result<(), DriverStatus>;

    async fn read_identity(&self, handle: FtHandle) -> Result<EepromIdentity, DriverStatus>;

    /// Packed library version word (`0x00MMmmbb`).
    async fn library_version(&self) -> Result<u32, DriverStatus>;

    /// Arm event notification for `mask`.  The returned notifier is
    /// signalled (auto-reset) whenever one of the events occurs.
    async fn arm_event_notification(
        &self,
        handle: FtHandle,
        mask: EventMask,
    ) -> Result<Arc<Notify>, DriverStatus>;

    /// Queued receive/transmit byte counts plus the pending event causes.
    async fn get_status(&self, handle: FtHandle) -> Result<QueueStatus, DriverStatus>;

    /// Queued receive byte count.
    async fn get_queue_status(&self, handle: FtHandle) -> Result<u32, DriverStatus>;

    /// Raw modem status word.
    async fn get_modem_status(&self, handle: FtHandle) -> Result<u32, DriverStatus>;

    /// Read up to `count` bytes.
    async fn read(&self, handle: FtHandle, count: usize) -> Result<Vec<u8>, DriverStatus>;

    /// Write `data`, returning the number of bytes accepted.
    async fn write(&self, handle: FtHandle, data: &[u8]) -> Result<usize, DriverStatus>;
}
