use umps_devices::{
    BusHandle, Device, DeviceKind, DiskDevice, EthDevice, FlashDevice, NetworkInterface,
    NullDevice, PrinterDevice, QueueInterface, Signal, TerminalDevice, DEV_REGS, IL_DISK,
    N_DEV_LINES, N_DEV_PER_LINE,
};
use umps_storage::{Block, BLOCK_SIZE_BYTES, BLOCK_WORDS};
use umps_time::EventQueue;

use crate::{DeviceSlot, DmaMemory, MachineConfig, MachineError};

/// Lowest interrupt line carrying devices.
pub const FIRST_DEV_LINE: u32 = IL_DISK;

/// Address of one of the 40 device slots: `(interrupt line, device number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId {
    pub line: u32,
    pub dev: u32,
}

impl SlotId {
    pub fn new(line: u32, dev: u32) -> Self {
        assert!(
            (FIRST_DEV_LINE..FIRST_DEV_LINE + N_DEV_LINES as u32).contains(&line),
            "interrupt line {line} carries no devices"
        );
        assert!(
            (dev as usize) < N_DEV_PER_LINE,
            "device number {dev} out of range"
        );
        Self { line, dev }
    }

    fn index(self) -> usize {
        (self.line - FIRST_DEV_LINE) as usize * N_DEV_PER_LINE + self.dev as usize
    }

    fn line_index(self) -> usize {
        (self.line - FIRST_DEV_LINE) as usize
    }
}

/// Clock, event queue, interrupt state and DMA target: everything the bus
/// owns apart from the devices themselves, split out so a device can be
/// borrowed mutably alongside it during dispatch.
struct BusCore {
    tod: u64,
    queue: EventQueue<SlotId>,
    /// Per-line pending bitmap, one bit per device number.
    pending: [u8; N_DEV_LINES],
    memory: Box<dyn DmaMemory>,
}

impl BusCore {
    fn int_req(&mut self, slot: SlotId) {
        self.pending[slot.line_index()] |= 1 << slot.dev;
    }

    fn int_ack(&mut self, slot: SlotId) {
        self.pending[slot.line_index()] &= !(1 << slot.dev);
    }
}

/// [`BusHandle`] scoped to one device slot for the duration of a register
/// write or completion dispatch.
struct SlotHandle<'a> {
    core: &'a mut BusCore,
    slot: SlotId,
}

impl BusHandle for SlotHandle<'_> {
    fn tod(&self) -> u64 {
        self.core.tod
    }

    fn schedule(&mut self, delay: u64) -> u64 {
        let fire_time = self.core.tod + delay;
        self.core.queue.schedule(fire_time, self.slot);
        fire_time
    }

    fn int_req(&mut self) {
        self.core.int_req(self.slot);
    }

    fn int_ack(&mut self) {
        self.core.int_ack(self.slot);
    }

    fn dma_to_memory(&mut self, paddr: u32, block: &Block) -> bool {
        let mut bytes = [0u8; BLOCK_SIZE_BYTES];
        for (chunk, i) in bytes.chunks_exact_mut(4).zip(0..BLOCK_WORDS) {
            chunk.copy_from_slice(&block.word(i).to_le_bytes());
        }
        self.core.memory.write(paddr, &bytes)
    }

    fn dma_from_memory(&mut self, paddr: u32, block: &mut Block) -> bool {
        let mut bytes = [0u8; BLOCK_SIZE_BYTES];
        if self.core.memory.read(paddr, &mut bytes) {
            return true;
        }
        for (chunk, i) in bytes.chunks_exact(4).zip(0..BLOCK_WORDS) {
            block.set_word(i, u32::from_le_bytes(chunk.try_into().unwrap()));
        }
        false
    }

    fn dma_to_memory_bytes(&mut self, paddr: u32, bytes: &[u8]) -> bool {
        self.core.memory.write(paddr, bytes)
    }

    fn dma_from_memory_bytes(&mut self, paddr: u32, bytes: &mut [u8]) -> bool {
        self.core.memory.read(paddr, bytes)
    }
}

fn default_mac(slot: &DeviceSlot, dev: u32) -> [u8; 6] {
    slot.mac.unwrap_or([0x52, 0x54, 0x00, 0x00, 0x00, dev as u8])
}

/// The event-driven system bus: owns the 40 device slots, the event queue,
/// the interrupt bitmaps and the virtual clock, and routes register-window
/// accesses from the CPU to the addressed device.
pub struct SystemBus {
    devices: Vec<Box<dyn Device>>,
    core: BusCore,
}

impl std::fmt::Debug for SystemBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemBus")
            .field("devices", &self.devices.len())
            .finish()
    }
}

impl SystemBus {
    /// Build the bus from a validated configuration. Enabled slots get a
    /// typed device, everything else the NULL placeholder. Ethernet slots use
    /// the in-memory queue backend.
    pub fn new(config: &MachineConfig, memory: Box<dyn DmaMemory>) -> Result<Self, MachineError> {
        Self::new_with_net(config, memory, |dev, slot| {
            Box::new(QueueInterface::new(0, default_mac(slot, dev)))
        })
    }

    /// Like [`SystemBus::new`], but with a caller-supplied network backend
    /// per enabled ethernet slot.
    pub fn new_with_net(
        config: &MachineConfig,
        memory: Box<dyn DmaMemory>,
        mut net_for: impl FnMut(u32, &DeviceSlot) -> Box<dyn NetworkInterface>,
    ) -> Result<Self, MachineError> {
        config.validate()?;

        let mut devices: Vec<Box<dyn Device>> = Vec::with_capacity(N_DEV_LINES * N_DEV_PER_LINE);
        for line_index in 0..N_DEV_LINES as u32 {
            let line = FIRST_DEV_LINE + line_index;
            let kind = DeviceKind::for_line(line).expect("device line");
            for dev in 0..N_DEV_PER_LINE as u32 {
                let slot = config.slot(line, dev);
                if !slot.enabled {
                    devices.push(Box::new(NullDevice::new()));
                    continue;
                }
                devices.push(build_device(kind, slot, config.clock_rate, &mut net_for, line, dev)?);
            }
        }

        let mut bus = Self {
            devices,
            core: BusCore {
                tod: 0,
                queue: EventQueue::new(),
                pending: [0; N_DEV_LINES],
                memory,
            },
        };

        // Self-scheduling devices (the ethernet poll loop) arm themselves
        // once everything is installed.
        for line in FIRST_DEV_LINE..FIRST_DEV_LINE + N_DEV_LINES as u32 {
            for dev in 0..N_DEV_PER_LINE as u32 {
                let slot = SlotId::new(line, dev);
                let mut handle = SlotHandle {
                    core: &mut bus.core,
                    slot,
                };
                bus.devices[slot.index()].attach(&mut handle);
            }
        }

        Ok(bus)
    }

    /// Current virtual time in microticks.
    pub fn tod(&self) -> u64 {
        self.core.tod
    }

    /// Low word of the TOD clock, as mapped into the CPU's register window.
    pub fn tod_lo(&self) -> u32 {
        self.core.tod as u32
    }

    /// Advance the clock one microtick and dispatch whatever comes due.
    pub fn tick(&mut self) {
        self.core.tod += 1;
        self.dispatch_due();
    }

    /// Advance the clock `ticks` microticks.
    pub fn advance(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Jump the clock to the next pending completion and dispatch it. False
    /// when the queue is empty.
    pub fn idle_until_next_event(&mut self) -> bool {
        let Some(fire_time) = self.core.queue.next_fire_time() else {
            return false;
        };
        self.core.tod = self.core.tod.max(fire_time);
        self.dispatch_due();
        true
    }

    fn dispatch_due(&mut self) {
        while let Some(event) = self.core.queue.pop_due(self.core.tod) {
            let slot = event.payload;
            let mut handle = SlotHandle {
                core: &mut self.core,
                slot,
            };
            let reg = self.devices[slot.index()].complete(&mut handle);
            tracing::trace!(
                line = slot.line,
                dev = slot.dev,
                reg,
                tod = self.core.tod,
                "device completion dispatched"
            );
        }
    }

    pub fn read_device_register(&self, line: u32, dev: u32, index: usize) -> u32 {
        assert!(index < DEV_REGS, "register index {index} out of range");
        self.devices[SlotId::new(line, dev).index()].read_register(index)
    }

    pub fn write_device_register(&mut self, line: u32, dev: u32, index: usize, value: u32) {
        assert!(index < DEV_REGS, "register index {index} out of range");
        let slot = SlotId::new(line, dev);
        let mut handle = SlotHandle {
            core: &mut self.core,
            slot,
        };
        self.devices[slot.index()].write_register(index, value, &mut handle);
    }

    /// Whether interrupt line `line` is asserted towards the CPU.
    pub fn int_line_asserted(&self, line: u32) -> bool {
        self.pending_bitmap(line) != 0
    }

    /// Per-device pending bitmap for `line`, one bit per device number.
    pub fn pending_bitmap(&self, line: u32) -> u8 {
        self.core.pending[SlotId::new(line, 0).line_index()]
    }

    pub fn interrupt_request(&mut self, line: u32, dev: u32) {
        self.core.int_req(SlotId::new(line, dev));
    }

    pub fn interrupt_acknowledge(&mut self, line: u32, dev: u32) {
        self.core.int_ack(SlotId::new(line, dev));
    }

    /// Feed host input to a terminal receiver.
    pub fn device_input(&mut self, line: u32, dev: u32, text: &str) {
        self.devices[SlotId::new(line, dev).index()].input(text);
    }

    /// Flip a device's fault-injection mode.
    pub fn set_device_condition(&mut self, line: u32, dev: u32, working: bool) {
        self.devices[SlotId::new(line, dev).index()].set_condition(working);
    }

    pub fn device_is_busy(&self, line: u32, dev: u32) -> bool {
        self.devices[SlotId::new(line, dev).index()].is_busy()
    }

    pub fn device_status(&self, line: u32, dev: u32) -> String {
        self.devices[SlotId::new(line, dev).index()].status_text()
    }

    pub fn device_completion_info(&self, line: u32, dev: u32) -> String {
        self.devices[SlotId::new(line, dev).index()].completion_info()
    }

    pub fn device_kind(&self, line: u32, dev: u32) -> DeviceKind {
        self.devices[SlotId::new(line, dev).index()].kind()
    }

    /// Direct access to the DMA target, standing in for the CPU side of the
    /// memory hierarchy.
    pub fn memory_mut(&mut self) -> &mut dyn DmaMemory {
        &mut *self.core.memory
    }

    /// Drain every device's accumulated observer notifications, tagged with
    /// the slot they came from.
    pub fn drain_signals(&mut self) -> Vec<(SlotId, Signal)> {
        let mut out = Vec::new();
        for line in FIRST_DEV_LINE..FIRST_DEV_LINE + N_DEV_LINES as u32 {
            for dev in 0..N_DEV_PER_LINE as u32 {
                let slot = SlotId::new(line, dev);
                for signal in self.devices[slot.index()].take_signals() {
                    out.push((slot, signal));
                }
            }
        }
        out
    }
}

fn build_device(
    kind: DeviceKind,
    slot: &DeviceSlot,
    clock_rate: u32,
    net_for: &mut impl FnMut(u32, &DeviceSlot) -> Box<dyn NetworkInterface>,
    line: u32,
    dev: u32,
) -> Result<Box<dyn Device>, MachineError> {
    let path = std::path::Path::new(&slot.file);
    let setup_err = |source| MachineError::DeviceSetup {
        kind: kind.name(),
        line,
        dev,
        source,
    };
    Ok(match kind {
        DeviceKind::Printer => Box::new(PrinterDevice::create(path, clock_rate).map_err(setup_err)?),
        DeviceKind::Terminal => {
            Box::new(TerminalDevice::create(path, clock_rate).map_err(setup_err)?)
        }
        DeviceKind::Disk => Box::new(DiskDevice::create(path, clock_rate).map_err(setup_err)?),
        DeviceKind::Flash => Box::new(FlashDevice::create(path, clock_rate).map_err(setup_err)?),
        DeviceKind::Eth => Box::new(EthDevice::new(net_for(dev, slot), clock_rate)),
        DeviceKind::Null => Box::new(NullDevice::new()),
    })
}
