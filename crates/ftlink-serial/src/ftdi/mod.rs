//! FTDI crate: sub-modules.

pub mod types;
pub mod error;
pub mod driver;
pub mod simulated;
pub mod status;
pub mod buffer;
pub mod hardware;
pub mod drain;
pub mod wait;
pub mod discovery;
pub mod session;

// Re-export top-level items for convenience.
pub use types::*;
pub use error::{FtError, FtErrorKind, FtResult};
pub use driver::{DeviceNode, DriverStatus, EepromIdentity, EventMask, FtDriver, FtHandle, QueueStatus};
pub use simulated::{HwCall, HwOp, SimulatedDriver};
pub use status::{classify, ModemStatus};
pub use buffer::ReceiveBuffer;
pub use drain::DrainState;
pub use discovery::available_ports;
pub use session::{DeviceSession, SessionEvent};
