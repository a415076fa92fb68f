//! Shared types for the FTDI crate.
//!
//! Covers line configuration, error/signal flag sets, device identity,
//! discovery descriptors, session configuration and statistics.

use crate::ftdi::error::{FtError, FtResult};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Default FTDI USB vendor id.
pub const FTDI_VID: u16 = 0x0403;
/// Default FT232R USB product id.
pub const FTDI_PID: u16 = 0x6001;
/// Fixed port name reported by discovered devices.
pub const FTDI_NAME: &str = "FTDI";
/// Default latency timer in milliseconds.
pub const FTDI_LATENCY_MS: u8 = 3;

/// Software flow control resume character.
pub const XON: u8 = 0x11;
/// Software flow control pause character.
pub const XOFF: u8 = 0x13;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Line configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parity mode as understood by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "N",
            Self::Odd => "O",
            Self::Even => "E",
            Self::Mark => "M",
            Self::Space => "S",
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl StopBits {
    pub fn label(&self) -> &'static str {
        match self {
            Self::One => "1",
            Self::Two => "2",
        }
    }
}

/// Data bits are fixed at eight for every line format.
pub const DATA_BITS: u8 = 8;

/// Parity × stop-bit combination applied in a single driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineFormat {
    #[default]
    #[serde(rename = "8N1")]
    Serial8N1,
    #[serde(rename = "8N2")]
    Serial8N2,
    #[serde(rename = "8E1")]
    Serial8E1,
    #[serde(rename = "8E2")]
    Serial8E2,
    #[serde(rename = "8O1")]
    Serial8O1,
    #[serde(rename = "8O2")]
    Serial8O2,
    #[serde(rename = "8M1")]
    Serial8M1,
    #[serde(rename = "8M2")]
    Serial8M2,
    #[serde(rename = "8S1")]
    Serial8S1,
    #[serde(rename = "8S2")]
    Serial8S2,
}

impl LineFormat {
    /// Every supported line format.
    pub const ALL: [LineFormat; 10] = [
        Self::Serial8N1,
        Self::Serial8N2,
        Self::Serial8E1,
        Self::Serial8E2,
        Self::Serial8O1,
        Self::Serial8O2,
        Self::Serial8M1,
        Self::Serial8M2,
        Self::Serial8S1,
        Self::Serial8S2,
    ];

    pub fn parity(&self) -> Parity {
        match self {
            Self::Serial8N1 | Self::Serial8N2 => Parity::None,
            Self::Serial8E1 | Self::Serial8E2 => Parity::Even,
            Self::Serial8O1 | Self::Serial8O2 => Parity::Odd,
            Self::Serial8M1 | Self::Serial8M2 => Parity::Mark,
            Self::Serial8S1 | Self::Serial8S2 => Parity::Space,
        }
    }

    pub fn stop_bits(&self) -> StopBits {
        match self {
            Self::Serial8N1
            | Self::Serial8E1
            | Self::Serial8O1
            | Self::Serial8M1
            | Self::Serial8S1 => StopBits::One,
            _ => StopBits::Two,
        }
    }

    /// Shorthand notation (e.g. "8E1").
    pub fn shorthand(&self) -> String {
        format!("{}{}{}", DATA_BITS, self.parity().label(), self.stop_bits().label())
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowControl {
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    RtsCts,
    /// Software flow control (XON/XOFF).
    XonXoff,
    /// Hardware flow control (DTR/DSR).
    DtrDsr,
}

/// Current configuration record of a session.
///
/// Each field holds the last value the hardware accepted (or, for the baud
/// rate while closed, the value to apply on the next open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSettings {
    pub baud_rate: u32,
    pub line_format: LineFormat,
    pub flow_control: FlowControl,
    pub dtr: bool,
    pub rts: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            line_format: LineFormat::default(),
            flow_control: FlowControl::default(),
            dtr: false,
            rts: false,
        }
    }
}

impl PortSettings {
    /// Shorthand notation (e.g. "115200-8N1").
    pub fn shorthand(&self) -> String {
        format!("{}-{}", self.baud_rate, self.line_format.shorthand())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Error / signal flag sets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

bitflags! {
    /// Sticky port error flags, overwritten wholesale on each recomputation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ErrorFlags: u8 {
        const NOT_OPEN = 0x01;
        const OVERRUN = 0x02;
        const PARITY = 0x04;
        const WRITE = 0x08;
        const FRAMING = 0x10;
        const BREAK_CONDITION = 0x20;
        const FIFO = 0x40;
        const READ = 0x80;
    }
}

bitflags! {
    /// Input line signals read from the modem status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SignalFlags: u8 {
        const RECEIVED_LINE_SIGNAL_DETECT = 0x02;
        const DATA_SET_READY = 0x10;
        const RING_INDICATOR = 0x20;
        const CLEAR_TO_SEND = 0x80;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Identity / discovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity fields cached once at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Product description from the EEPROM.
    pub product_name: String,
    /// Upper-cased serial number.
    pub serial_number: String,
    pub manufacturer: String,
    /// Device type word reported by enumeration.
    pub chip_id: u32,
    /// Driver library version as `major.minor.build`.
    pub library_version: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// One device found by [`available_ports`](crate::ftdi::discovery::available_ports).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub manufacturer: String,
    pub description: String,
    pub serial_number: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceDescriptor {
    pub fn port_name(&self) -> &'static str {
        FTDI_NAME
    }
}

/// Format a packed driver library version word.
///
/// Each byte of `0x00MMmmbb` holds two BCD digits, so `0x00030211` is
/// "3.02.11".
pub fn format_library_version(word: u32) -> String {
    let major = (word >> 16) & 0xFF;
    let minor = (word >> 8) & 0xFF;
    let build = word & 0xFF;
    format!("{:x}.{:02x}.{:02x}", major, minor, build)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration a session is constructed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// USB vendor id matched on open.
    #[serde(default = "default_vid")]
    pub vendor_id: u16,

    /// USB product id matched on open.
    #[serde(default = "default_pid")]
    pub product_id: u16,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default)]
    pub line_format: LineFormat,

    #[serde(default)]
    pub flow_control: FlowControl,

    /// USB latency timer (1-255 ms).
    #[serde(default = "default_latency")]
    pub latency_timer_ms: u8,

    /// Driver read timeout in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u32,

    /// Driver write timeout in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u32,

    #[serde(default = "default_xon")]
    pub xon_char: u8,

    #[serde(default = "default_xoff")]
    pub xoff_char: u8,

    /// Capacity of the session event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_vid() -> u16 {
    FTDI_VID
}
fn default_pid() -> u16 {
    FTDI_PID
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_latency() -> u8 {
    FTDI_LATENCY_MS
}
fn default_read_timeout() -> u32 {
    5000
}
fn default_write_timeout() -> u32 {
    2000
}
fn default_xon() -> u8 {
    XON
}
fn default_xoff() -> u8 {
    XOFF
}
fn default_event_capacity() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vid(),
            product_id: default_pid(),
            baud_rate: default_baud_rate(),
            line_format: LineFormat::default(),
            flow_control: FlowControl::default(),
            latency_timer_ms: default_latency(),
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
            xon_char: default_xon(),
            xoff_char: default_xoff(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> FtResult<Self> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| FtError::invalid_config(format!("invalid session config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FtResult<()> {
        if self.baud_rate == 0 {
            return Err(FtError::invalid_config("baud rate must be positive"));
        }
        if self.latency_timer_ms == 0 {
            return Err(FtError::invalid_config("latency timer must be between 1 and 255 ms"));
        }
        if self.event_capacity == 0 {
            return Err(FtError::invalid_config("event capacity must be positive"));
        }
        Ok(())
    }

    /// Initial configuration record derived from this config.
    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            baud_rate: self.baud_rate,
            line_format: self.line_format,
            flow_control: self.flow_control,
            dtr: false,
            rts: false,
        }
    }
}

/// Running totals for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub drains: u64,
    pub purges: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format_mapping() {
        assert_eq!(LineFormat::Serial8E2.parity(), Parity::Even);
        assert_eq!(LineFormat::Serial8E2.stop_bits(), StopBits::Two);
        assert_eq!(LineFormat::Serial8S1.parity(), Parity::Space);
        assert_eq!(LineFormat::Serial8S1.stop_bits(), StopBits::One);
        assert_eq!(LineFormat::Serial8M2.shorthand(), "8M2");
    }

    #[test]
    fn test_line_formats_are_distinct() {
        for (i, a) in LineFormat::ALL.iter().enumerate() {
            for b in &LineFormat::ALL[i + 1..] {
                assert_ne!((a.parity(), a.stop_bits()), (b.parity(), b.stop_bits()));
            }
        }
    }

    #[test]
    fn test_port_settings_default() {
        let s = PortSettings::default();
        assert_eq!(s.baud_rate, 115200);
        assert_eq!(s.line_format, LineFormat::Serial8N1);
        assert_eq!(s.flow_control, FlowControl::None);
        assert!(!s.dtr);
        assert!(!s.rts);
        assert_eq!(s.shorthand(), "115200-8N1");
    }

    #[test]
    fn test_library_version_format() {
        assert_eq!(format_library_version(0x0003_0211), "3.02.11");
        assert_eq!(format_library_version(0x0001_0000), "1.00.00");
        // BCD: 0x19 is build 19, not 25.
        assert_eq!(format_library_version(0x0002_1219), "2.12.19");
    }

    #[test]
    fn test_error_flag_bits() {
        assert_eq!(ErrorFlags::NOT_OPEN.bits(), 0x01);
        assert_eq!(ErrorFlags::FRAMING.bits(), 0x10);
        assert_eq!(ErrorFlags::READ.bits(), 0x80);
        assert!(ErrorFlags::default().is_empty());
    }

    #[test]
    fn test_session_config_defaults_from_empty_json() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.vendor_id, 0x0403);
        assert_eq!(config.product_id, 0x6001);
        assert_eq!(config.read_timeout_ms, 5000);
        assert_eq!(config.write_timeout_ms, 2000);
    }

    #[test]
    fn test_session_config_partial_json() {
        let config =
            SessionConfig::from_json(r#"{"baudRate": 9600, "lineFormat": "8E1", "flowControl": "rtsCts"}"#)
                .unwrap();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.line_format, LineFormat::Serial8E1);
        assert_eq!(config.flow_control, FlowControl::RtsCts);
        assert_eq!(config.latency_timer_ms, FTDI_LATENCY_MS);
    }

    #[test]
    fn test_session_config_rejects_zero_baud() {
        let err = SessionConfig::from_json(r#"{"baudRate": 0}"#).unwrap_err();
        assert_eq!(err.kind, crate::ftdi::error::FtErrorKind::InvalidConfig);
    }

    #[test]
    fn test_session_config_rejects_garbage() {
        assert!(SessionConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_flags_serde() {
        let flags = ErrorFlags::BREAK_CONDITION | ErrorFlags::READ;
        let json = serde_json::to_string(&flags).unwrap();
        let back: ErrorFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
    }
}
