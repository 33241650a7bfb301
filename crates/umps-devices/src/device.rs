use umps_storage::Block;

use crate::{DEV_REGS, IL_DISK, IL_ETH, IL_FLASH, IL_PRINTER, IL_TERMINAL, STATUS};

/// Installed device type. One type per interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Null,
    Printer,
    Terminal,
    Disk,
    Flash,
    Eth,
}

impl DeviceKind {
    /// Device type installed on interrupt line `line`, if it carries devices.
    pub fn for_line(line: u32) -> Option<DeviceKind> {
        match line {
            IL_DISK => Some(DeviceKind::Disk),
            IL_FLASH => Some(DeviceKind::Flash),
            IL_ETH => Some(DeviceKind::Eth),
            IL_PRINTER => Some(DeviceKind::Printer),
            IL_TERMINAL => Some(DeviceKind::Terminal),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::Null => "empty slot",
            DeviceKind::Printer => "printer",
            DeviceKind::Terminal => "terminal",
            DeviceKind::Disk => "disk",
            DeviceKind::Flash => "flash",
            DeviceKind::Eth => "ethernet",
        }
    }
}

/// Observer notifications accumulated by a device and drained by the embedder.
///
/// Dispatch is single-threaded, so a plain queue replaces callback wiring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    StatusChanged(String),
    Transmitted(u8),
    ConditionChanged(bool),
}

/// Bus services available to a device while it handles a register write or a
/// completion. The handle is already scoped to the device's own slot, so IRQ
/// and scheduling calls need no addressing.
pub trait BusHandle {
    /// Current virtual time in microticks.
    fn tod(&self) -> u64;

    /// Low word of the TOD clock, as the CPU sees it.
    fn tod_lo(&self) -> u32 {
        self.tod() as u32
    }

    /// Schedule this device's completion `delay` microticks from now.
    /// Returns the absolute fire time.
    fn schedule(&mut self, delay: u64) -> u64;

    /// Assert this device's interrupt.
    fn int_req(&mut self);

    /// Clear this device's pending interrupt.
    fn int_ack(&mut self);

    /// Copy a block into guest memory at `paddr`. True on decode failure.
    fn dma_to_memory(&mut self, paddr: u32, block: &Block) -> bool;

    /// Fill a block from guest memory at `paddr`. True on decode failure.
    fn dma_from_memory(&mut self, paddr: u32, block: &mut Block) -> bool;

    /// Variable-length variants used by packet devices.
    fn dma_to_memory_bytes(&mut self, paddr: u32, bytes: &[u8]) -> bool;
    fn dma_from_memory_bytes(&mut self, paddr: u32, bytes: &mut [u8]) -> bool;
}

/// Contract between the bus and every device slot.
pub trait Device {
    fn kind(&self) -> DeviceKind;

    /// Register file read. `index` must address one of the four registers.
    fn read_register(&self, index: usize) -> u32;

    /// Register file write. Ignored while the addressed sub-device is busy,
    /// except where a device notes otherwise.
    fn write_register(&mut self, index: usize, value: u32, bus: &mut dyn BusHandle);

    /// Called by the bus when this device's completion event fires. Returns
    /// the index of the register the completion rewrote.
    fn complete(&mut self, bus: &mut dyn BusHandle) -> usize;

    /// Hook invoked once after the device is installed on the bus, for models
    /// that self-schedule (the ethernet poll loop).
    fn attach(&mut self, _bus: &mut dyn BusHandle) {}

    /// True while an operation is pending on any sub-device.
    fn is_busy(&self) -> bool;

    fn is_working(&self) -> bool;

    /// Flip the fault-injection mode. Data-transferring operations fail while
    /// the device is not working; RESET still succeeds.
    fn set_condition(&mut self, working: bool);

    /// Human-readable description of the current device state.
    fn status_text(&self) -> String;

    /// Formatted completion time of the pending operation, empty when idle.
    fn completion_info(&self) -> String;

    /// Feed host input. Only terminal receivers accept input.
    fn input(&mut self, _line: &str) {
        panic!("input directed to a device without a receiver");
    }

    /// Drain accumulated observer notifications.
    fn take_signals(&mut self) -> Vec<Signal>;
}

/// Decode a device's previous STATUS into the result tag embedded in status
/// descriptions.
pub(crate) fn last_op_str(success: bool) -> &'static str {
    if success {
        "SUCCESSFUL"
    } else {
        "UNSUCCESSFUL"
    }
}

/// Placeholder occupying an empty device slot. All registers read zero
/// (UNINSTALLED), writes are dropped, and it never works.
#[derive(Debug, Default)]
pub struct NullDevice {
    regs: [u32; DEV_REGS],
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Device for NullDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Null
    }

    fn read_register(&self, index: usize) -> u32 {
        assert!(index < DEV_REGS, "register index {index} out of range");
        self.regs[index]
    }

    fn write_register(&mut self, _index: usize, _value: u32, _bus: &mut dyn BusHandle) {}

    fn complete(&mut self, _bus: &mut dyn BusHandle) -> usize {
        STATUS
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn is_working(&self) -> bool {
        false
    }

    fn set_condition(&mut self, _working: bool) {}

    fn status_text(&self) -> String {
        "Not operational".into()
    }

    fn completion_info(&self) -> String {
        String::new()
    }

    fn take_signals(&mut self) -> Vec<Signal> {
        Vec::new()
    }
}
