//! Modem status word classification.
//!
//! Line status bit field (low byte):
//!
//! | bit | signal                             |
//! |-----|------------------------------------|
//! | B4  | clear to send (CTS)                |
//! | B5  | data set ready (DSR)               |
//! | B6  | ring indicator (RI)                |
//! | B7  | receive line signal detect (RLSD)  |
//!
//! UART error bit field (high byte, `*` marks serious errors):
//!
//! | bit  | condition                          |
//! |------|------------------------------------|
//! | B8   | data ready                         |
//! | B9*  | overrun                            |
//! | B10* | parity                             |
//! | B11* | framing                            |
//! | B12  | break interrupt                    |
//! | B13  | transmitter holding register empty |
//! | B14  | transmitter empty                  |
//! | B15* | error in receiver FIFO             |

use crate::ftdi::types::{ErrorFlags, SignalFlags};

/// Error bits whose recovery policy is purge-and-discard.
pub const SERIOUS_MASK: u32 = 0b1000_1110_0000_0000;

const CTS: u32 = 0x0010;
const DSR: u32 = 0x0020;
const RI: u32 = 0x0040;
const RLSD: u32 = 0x0080;

const OVERRUN: u32 = 0x0200;
const PARITY: u32 = 0x0400;
const FRAMING: u32 = 0x0800;
const BREAK: u32 = 0x1000;
const FIFO: u32 = 0x8000;

/// Classified modem status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModemStatus {
    pub signals: SignalFlags,
    pub errors: ErrorFlags,
    /// Any of overrun, parity, framing or FIFO error is set.
    pub serious: bool,
}

/// Split a raw status word into its signal and error halves.
pub fn classify(word: u32) -> ModemStatus {
    ModemStatus {
        signals: signals(word),
        errors: errors(word),
        serious: word & SERIOUS_MASK != 0,
    }
}

/// Signal half of the status word.
pub fn signals(word: u32) -> SignalFlags {
    let mut flags = SignalFlags::empty();
    if word & RLSD != 0 {
        flags |= SignalFlags::RECEIVED_LINE_SIGNAL_DETECT;
    }
    if word & RI != 0 {
        flags |= SignalFlags::RING_INDICATOR;
    }
    if word & DSR != 0 {
        flags |= SignalFlags::DATA_SET_READY;
    }
    if word & CTS != 0 {
        flags |= SignalFlags::CLEAR_TO_SEND;
    }
    flags
}

/// Error half of the status word.
pub fn errors(word: u32) -> ErrorFlags {
    let mut flags = ErrorFlags::empty();
    if word & FIFO != 0 {
        flags |= ErrorFlags::FIFO;
    }
    if word & BREAK != 0 {
        flags |= ErrorFlags::BREAK_CONDITION;
    }
    if word & FRAMING != 0 {
        flags |= ErrorFlags::FRAMING;
    }
    if word & PARITY != 0 {
        flags |= ErrorFlags::PARITY;
    }
    if word & OVERRUN != 0 {
        flags |= ErrorFlags::OVERRUN;
    }
    flags
}
