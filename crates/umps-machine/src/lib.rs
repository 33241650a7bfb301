//! Canonical machine integration layer: the system bus.
//!
//! This crate composes the device models (`umps-devices`), the event queue
//! (`umps-time`) and guest RAM into the memory-mapped bus a CPU core drives:
//! register window reads/writes, interrupt line aggregation, DMA, and the
//! virtual clock that paces every device completion.

#![forbid(unsafe_code)]

mod bus;
mod config;
mod error;
mod memory;

pub use bus::{SlotId, SystemBus, FIRST_DEV_LINE};
pub use config::{ConfigError, DeviceSlot, MachineConfig};
pub use error::MachineError;
pub use memory::{DmaMemory, Ram, RAM_BASE};
