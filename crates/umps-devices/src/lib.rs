//! Memory-mapped peripheral device models.
//!
//! Every device exposes four 32-bit registers (STATUS, COMMAND, DATA0, DATA1)
//! to the bus. A COMMAND write mutates device state and usually schedules a
//! completion on the bus event queue; when the completion is dispatched the
//! device finalises the operation, rewrites STATUS, and asserts its interrupt
//! line. Devices never touch the bus directly; they are handed a [`BusHandle`]
//! scoped to their own slot for the duration of each call.

#![forbid(unsafe_code)]

pub mod device;
pub mod disk;
mod error;
pub mod eth;
pub mod flash;
pub mod net;
pub mod printer;
pub mod terminal;

pub use device::{BusHandle, Device, DeviceKind, NullDevice, Signal};
pub use disk::DiskDevice;
pub use error::DeviceError;
pub use eth::EthDevice;
pub use flash::FlashDevice;
pub use net::{
    NetError, NetworkInterface, QueueInterface, SharedQueueInterface, MODE_INTERRUPT, MODE_NAMED,
    MODE_PROMISQ, PACKET_SIZE,
};
pub use printer::PrinterDevice;
pub use terminal::TerminalDevice;

/// Interrupt lines carrying devices, and the device type installed on each.
pub const IL_DISK: u32 = 3;
pub const IL_FLASH: u32 = 4;
pub const IL_ETH: u32 = 5;
pub const IL_PRINTER: u32 = 6;
pub const IL_TERMINAL: u32 = 7;

pub const N_DEV_LINES: usize = 5;
pub const N_DEV_PER_LINE: usize = 8;

/// Registers per device.
pub const DEV_REGS: usize = 4;

// Register indices. Terminals rename the same physical quadruple.
pub const STATUS: usize = 0;
pub const COMMAND: usize = 1;
pub const DATA0: usize = 2;
pub const DATA1: usize = 3;
pub const RECV_STATUS: usize = 0;
pub const RECV_COMMAND: usize = 1;
pub const TRANS_STATUS: usize = 2;
pub const TRANS_COMMAND: usize = 3;

// Status values common to all devices.
pub const STAT_UNINSTALLED: u32 = 0;
pub const STAT_READY: u32 = 1;
pub const STAT_ILLEGAL_OP: u32 = 2;
pub const STAT_BUSY: u32 = 3;

// Commands common to all devices.
pub const CMD_RESET: u32 = 0;
pub const CMD_ACK: u32 = 1;

// COMMAND word field helpers.
pub const BYTE_BITS: u32 = 8;
pub const BYTE_MASK: u32 = 0xFF;
pub const HWORD_BITS: u32 = 16;
pub const IMM_MASK: u32 = 0xFFFF;

/// Microtick cost of one whole-block DMA transfer.
pub const DMA_TICKS: u64 = 256;

#[cfg(test)]
pub(crate) mod testing;
