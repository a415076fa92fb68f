//! # ftlink – FTDI USB-UART byte stream
//!
//! Adapts an FTDI (D2XX-style) USB-serial chip into a byte stream:
//!
//! - **Driver seam** – the vendor driver is injected through the
//!   [`FtDriver`](ftdi::FtDriver) trait; a scriptable in-memory test
//!   double records the hardware traffic
//! - **Receive pipeline** – driver wake-ups are drained into an internal
//!   FIFO, so reads never block on hardware
//! - **Serialised hardware access** – configuration, writes, status queries
//!   and drains never overlap on the same handle
//! - **Modem status** – line signals and UART error flags, with silent
//!   purge-and-discard for serious receive errors
//! - **Discovery** – list attached devices by USB vendor/product id

pub mod ftdi;
