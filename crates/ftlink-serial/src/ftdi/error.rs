//! FTDI-specific error type.

use crate::ftdi::driver::DriverStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised session error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtError {
    pub kind: FtErrorKind,
    pub message: String,
    /// Driver return code that triggered the error, if any.
    pub driver_status: Option<DriverStatus>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtErrorKind {
    /// The driver could not build its device list.
    EnumerationFailed,
    /// No enumerated device matched the requested vendor/product pair.
    NoMatchingDevice,
    /// The matching device could not be opened.
    OpenFailed,
    /// The hardware rejected a setting (baud, line format, flow, timeouts, latency, DTR/RTS).
    ConfigurationFailed,
    /// Receive / modem-status event notification could not be armed.
    EventArmFailed,
    /// EEPROM or library version could not be read during open.
    IdentityReadFailed,
    /// `open` was called on an open session.
    AlreadyOpen,
    /// Operation requires an open session.
    NotOpen,
    /// Hardware write failed.
    WriteFailed,
    /// Hardware read failed.
    ReadFailed,
    /// Device status query failed.
    StatusFailed,
    /// A blocking wait expired.
    TimedOut,
    /// Config / parameter validation error.
    InvalidConfig,
}

pub type FtResult<T> = Result<T, FtError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtError {
    pub fn new(kind: FtErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            driver_status: None,
        }
    }

    pub fn with_status(mut self, status: DriverStatus) -> Self {
        self.driver_status = Some(status);
        self
    }

    pub fn enumeration_failed(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::EnumerationFailed, msg)
    }

    pub fn no_matching_device(vendor_id: u16, product_id: u16) -> Self {
        Self::new(
            FtErrorKind::NoMatchingDevice,
            format!(
                "no compatible devices found ({:04X}:{:04X})",
                vendor_id, product_id
            ),
        )
    }

    pub fn open_failed(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::OpenFailed, msg)
    }

    pub fn configuration_failed(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::ConfigurationFailed, msg)
    }

    pub fn event_arm_failed(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::EventArmFailed, msg)
    }

    pub fn identity_read_failed(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::IdentityReadFailed, msg)
    }

    pub fn already_open() -> Self {
        Self::new(FtErrorKind::AlreadyOpen, "the device is already open")
    }

    pub fn not_open() -> Self {
        Self::new(FtErrorKind::NotOpen, "the device is not open")
    }

    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::WriteFailed, msg)
    }

    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::ReadFailed, msg)
    }

    pub fn status_failed(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::StatusFailed, msg)
    }

    pub fn timed_out(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::TimedOut, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtErrorKind::InvalidConfig, msg)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FtErrorKind::TimedOut
    }
}

impl fmt::Display for FtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.driver_status {
            write!(f, "[FTDI {:?} {:?}] {}", self.kind, status, self.message)
        } else {
            write!(f, "[FTDI {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtError {}

impl From<FtError> for String {
    fn from(e: FtError) -> String {
        e.message
    }
}
