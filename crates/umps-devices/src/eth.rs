use umps_time::format_tod;

use crate::device::{last_op_str, BusHandle, Device, DeviceKind, Signal};
use crate::net::{NetworkInterface, MODE_INTERRUPT, PACKET_SIZE};
use crate::{
    CMD_ACK, CMD_RESET, COMMAND, DATA0, DATA1, DEV_REGS, HWORD_BITS, STATUS, STAT_BUSY,
    STAT_ILLEGAL_OP, STAT_READY,
};

pub const CMD_READ_CONF: u32 = 2;
pub const CMD_READ_NET: u32 = 3;
pub const CMD_WRITE_NET: u32 = 4;
pub const CMD_CONFIGURE: u32 = 5;

pub const STAT_READ_ERR: u32 = 5;
pub const STAT_WRITE_ERR: u32 = 6;
pub const STAT_DMA_ERR: u32 = 7;

/// STATUS bit 7 latches "a packet is waiting to be read"; the low seven bits
/// carry the ordinary status value.
pub const READ_PENDING: u32 = 0x80;
pub const READ_PENDING_MASK: u32 = 0x7F;

/// CONFIGURE mode-byte bit requesting a MAC load from DATA0/DATA1.
pub const SETMAC: u32 = 0x80;

// Operation latencies in microseconds (scaled by the CPU clock rate).
pub const ETH_RESET_US: u64 = 200;
pub const READ_NET_US: u64 = 1220;
pub const WRITE_NET_US: u64 = READ_NET_US;
pub const CONF_NET_US: u64 = 40;
pub const POLL_NET_US: u64 = READ_NET_US / 2;

/// Packet interface to a pluggable network backend.
///
/// When the backend is configured for interrupt-driven receive, the device
/// keeps a poll event circulating; a poll that finds frames waiting latches
/// [`READ_PENDING`] into STATUS and interrupts the CPU once, until the next
/// ACK.
pub struct EthDevice {
    regs: [u32; DEV_REGS],
    working: bool,
    clock_rate: u32,
    compl_time: u64,
    status: String,
    signals: Vec<Signal>,
    netif: Box<dyn NetworkInterface>,
    rx_frame: Vec<u8>,
    tx_frame: Vec<u8>,
    polling: bool,
}

impl EthDevice {
    pub fn new(netif: Box<dyn NetworkInterface>, clock_rate: u32) -> Self {
        let mut regs = [0; DEV_REGS];
        regs[STATUS] = STAT_READY;
        Self {
            regs,
            working: true,
            clock_rate,
            compl_time: 0,
            status: "Idle".into(),
            signals: Vec::new(),
            netif,
            rx_frame: vec![0; PACKET_SIZE],
            tx_frame: Vec::new(),
            polling: false,
        }
    }

    fn last_op(&self) -> &'static str {
        last_op_str(self.regs[STATUS] & READ_PENDING_MASK == STAT_READY)
    }

    fn scaled(&self, micros: u64) -> u64 {
        micros * u64::from(self.clock_rate)
    }

    fn complete_operation(&mut self, bus: &mut dyn BusHandle) -> u32 {
        // Returns the READ_PENDING bit to re-latch into STATUS.
        let rp = self.regs[STATUS] & READ_PENDING;
        match self.regs[COMMAND] {
            CMD_RESET => {
                // A reset completes successfully even when not working.
                self.status = "Reset completed : waiting for ACK".into();
                self.regs[STATUS] = STAT_READY;
                rp
            }
            CMD_READ_CONF => {
                let mac = self.netif.mac_addr();
                self.regs[DATA0] = (self.netif.mode() << HWORD_BITS)
                    | (u32::from(mac[0]) << 8)
                    | u32::from(mac[1]);
                self.regs[DATA1] = u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]]);
                self.status = "Interface Configuration Read : waiting for ACK".into();
                self.regs[STATUS] = STAT_READY;
                rp
            }
            CMD_CONFIGURE => {
                let mut mode = self.regs[DATA0] >> HWORD_BITS;
                if mode & SETMAC != 0 {
                    let d0 = self.regs[DATA0];
                    let d1 = self.regs[DATA1].to_be_bytes();
                    self.netif.set_mac_addr([
                        (d0 >> 8) as u8,
                        d0 as u8,
                        d1[0],
                        d1[1],
                        d1[2],
                        d1[3],
                    ]);
                }
                mode &= !SETMAC;
                self.netif.set_mode(mode);
                self.status = "Interface Reconfigured : waiting for ACK".into();
                self.regs[STATUS] = STAT_READY;
                rp
            }
            CMD_READ_NET => {
                if !self.working {
                    self.status = "Net reading error : waiting for ACK".into();
                    self.regs[STATUS] = STAT_READ_ERR;
                    return rp;
                }
                match self.netif.recv(&mut self.rx_frame) {
                    Err(_) => {
                        self.regs[DATA1] = 0;
                        self.status = "Net reading error : waiting for ACK".into();
                        self.regs[STATUS] = STAT_READ_ERR;
                    }
                    Ok(0) => {
                        self.regs[DATA1] = 0;
                        self.status = "No pending packet for read : waiting for ACK".into();
                        self.regs[STATUS] = STAT_READY;
                    }
                    Ok(len) => {
                        self.regs[DATA1] = len as u32;
                        if bus.dma_to_memory_bytes(self.regs[DATA0], &self.rx_frame[..len]) {
                            self.status = "DMA error on netread : waiting for ACK".into();
                            self.regs[STATUS] = STAT_DMA_ERR;
                        } else {
                            self.status = "Packet received : waiting for ACK".into();
                            self.regs[STATUS] = STAT_READY;
                        }
                    }
                }
                // The pending latch tracks whatever is still queued behind
                // the frame just consumed.
                if self.netif.rx_pending() {
                    READ_PENDING
                } else {
                    0
                }
            }
            CMD_WRITE_NET => {
                if !self.working {
                    self.status = "Net writing error : waiting for ACK".into();
                    self.regs[STATUS] = STAT_WRITE_ERR;
                    return rp;
                }
                match self.netif.send(&self.tx_frame) {
                    Ok(sent) if sent == self.tx_frame.len() => {
                        self.status = "Packet Sent : waiting for ACK".into();
                        self.regs[STATUS] = STAT_READY;
                    }
                    _ => {
                        self.status = "Net writing error : waiting for ACK".into();
                        self.regs[STATUS] = STAT_WRITE_ERR;
                    }
                }
                rp
            }
            other => panic!("unknown operation {other:#x} completing on ethernet"),
        }
    }
}

impl Device for EthDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Eth
    }

    fn read_register(&self, index: usize) -> u32 {
        assert!(index < DEV_REGS, "register index {index} out of range");
        self.regs[index]
    }

    fn write_register(&mut self, index: usize, value: u32, bus: &mut dyn BusHandle) {
        let rp = self.regs[STATUS] & READ_PENDING;
        if self.regs[STATUS] & READ_PENDING_MASK == STAT_BUSY {
            return;
        }

        match index {
            COMMAND => {
                self.regs[COMMAND] = value;
                let mut err = false;
                match value {
                    CMD_RESET => {
                        bus.int_ack();
                        self.status = "Reset requested : waiting for ACK".into();
                        self.regs[STATUS] = STAT_BUSY;
                        self.compl_time = bus.schedule(self.scaled(ETH_RESET_US));
                    }
                    CMD_ACK => {
                        bus.int_ack();
                        self.status = format!("Idle (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_READY;
                    }
                    CMD_READ_CONF => {
                        bus.int_ack();
                        self.status = "Reading Interface Configuration".into();
                        self.regs[STATUS] = STAT_BUSY;
                        self.compl_time = bus.schedule(self.scaled(CONF_NET_US));
                    }
                    CMD_CONFIGURE => {
                        bus.int_ack();
                        self.status = "Writing Interface Configuration".into();
                        self.regs[STATUS] = STAT_BUSY;
                        self.compl_time = bus.schedule(self.scaled(CONF_NET_US));
                    }
                    CMD_READ_NET => {
                        bus.int_ack();
                        self.status = "Receiving Data".into();
                        self.regs[STATUS] = STAT_BUSY;
                        self.compl_time = bus.schedule(self.scaled(READ_NET_US));
                    }
                    CMD_WRITE_NET => {
                        bus.int_ack();
                        let len = self.regs[DATA1] as usize;
                        let dma_failed = if len > PACKET_SIZE {
                            true
                        } else {
                            self.tx_frame.resize(len, 0);
                            bus.dma_from_memory_bytes(self.regs[DATA0], &mut self.tx_frame)
                        };
                        if dma_failed {
                            self.status = "DMA error on netwrite : waiting for ACK".into();
                            self.regs[STATUS] = STAT_DMA_ERR;
                            err = true;
                        } else {
                            self.status = "Sending Data".into();
                            self.regs[STATUS] = STAT_BUSY;
                            self.compl_time = bus.schedule(self.scaled(WRITE_NET_US));
                        }
                    }
                    _ => {
                        self.status = format!("Unknown command (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_ILLEGAL_OP;
                        err = true;
                    }
                }
                self.regs[STATUS] |= rp;
                if err {
                    bus.int_req();
                }
                self.signals.push(Signal::StatusChanged(self.status.clone()));
            }
            DATA0 => self.regs[DATA0] = value,
            DATA1 => self.regs[DATA1] = value,
            _ => {}
        }
    }

    fn complete(&mut self, bus: &mut dyn BusHandle) -> usize {
        let rp = self.regs[STATUS] & READ_PENDING;
        let busy = self.regs[STATUS] & READ_PENDING_MASK == STAT_BUSY;

        if self.polling && !busy {
            // Poll event with no operation in flight.
            self.polling = false;
            if rp == 0 {
                if self.netif.rx_pending() {
                    // Latch the pending read and tell the CPU exactly once.
                    self.regs[STATUS] |= READ_PENDING;
                    self.signals.push(Signal::StatusChanged(self.status.clone()));
                    bus.int_req();
                } else if self.netif.mode() & MODE_INTERRUPT != 0 {
                    bus.schedule(self.scaled(POLL_NET_US));
                    self.polling = true;
                }
            }
            return STATUS;
        }

        let rp = self.complete_operation(bus);
        self.signals.push(Signal::StatusChanged(self.status.clone()));
        self.regs[STATUS] |= rp;
        bus.int_req();

        // Keep the poll loop alive while the interface wants interrupts and
        // no read is already latched.
        if self.netif.mode() & MODE_INTERRUPT != 0 && !self.polling && rp == 0 {
            bus.schedule(self.scaled(POLL_NET_US));
            self.polling = true;
        }
        STATUS
    }

    fn attach(&mut self, bus: &mut dyn BusHandle) {
        if self.netif.mode() & MODE_INTERRUPT != 0 {
            bus.schedule(self.scaled(POLL_NET_US));
            self.polling = true;
        }
    }

    fn is_busy(&self) -> bool {
        self.regs[STATUS] & READ_PENDING_MASK == STAT_BUSY
    }

    fn is_working(&self) -> bool {
        self.working
    }

    fn set_condition(&mut self, working: bool) {
        if working != self.working {
            self.working = working;
            self.signals.push(Signal::ConditionChanged(working));
        }
    }

    fn status_text(&self) -> String {
        self.status.clone()
    }

    fn completion_info(&self) -> String {
        if self.is_busy() {
            format_tod(self.compl_time)
        } else {
            String::new()
        }
    }

    fn take_signals(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{QueueInterface, SharedQueueInterface, MODE_PROMISQ};
    use crate::testing::MockBus;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn eth_with_mode(mode: u32) -> (EthDevice, SharedQueueInterface) {
        let shared: SharedQueueInterface = Rc::new(RefCell::new(QueueInterface::new(
            mode,
            [2, 0, 0, 0, 0, 7],
        )));
        let dev = EthDevice::new(Box::new(shared.clone()), 1);
        (dev, shared)
    }

    #[test]
    fn readconf_reports_mode_and_mac() {
        let (mut dev, _net) = eth_with_mode(MODE_PROMISQ);
        let mut bus = MockBus::new();

        dev.write_register(COMMAND, CMD_READ_CONF, &mut bus);
        bus.advance_to_last();
        dev.complete(&mut bus);

        assert_eq!(dev.read_register(STATUS), STAT_READY);
        assert_eq!(
            dev.read_register(DATA0),
            (MODE_PROMISQ << HWORD_BITS) | (2 << 8)
        );
        assert_eq!(dev.read_register(DATA1), 0x0000_0007);
    }

    #[test]
    fn configure_with_setmac_loads_the_address() {
        let (mut dev, net) = eth_with_mode(0);
        let mut bus = MockBus::new();

        dev.write_register(DATA0, ((SETMAC | MODE_PROMISQ) << HWORD_BITS) | 0x0A0B, &mut bus);
        dev.write_register(DATA1, 0x0C0D_0E0F, &mut bus);
        dev.write_register(COMMAND, CMD_CONFIGURE, &mut bus);
        bus.advance_to_last();
        dev.complete(&mut bus);

        assert_eq!(
            net.borrow().mac_addr(),
            [0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F]
        );
        assert_eq!(net.borrow().mode(), MODE_PROMISQ);
    }

    #[test]
    fn writenet_sends_the_dma_d_frame() {
        let (mut dev, net) = eth_with_mode(0);
        let mut bus = MockBus::new();

        bus.memory[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        dev.write_register(DATA0, 0, &mut bus);
        dev.write_register(DATA1, 4, &mut bus);
        dev.write_register(COMMAND, CMD_WRITE_NET, &mut bus);
        assert!(dev.is_busy());

        bus.advance_to_last();
        dev.complete(&mut bus);
        assert_eq!(dev.read_register(STATUS), STAT_READY);
        assert_eq!(net.borrow_mut().take_tx(), vec![vec![0xDE, 0xAD, 0xBE, 0xEF]]);
    }

    #[test]
    fn readnet_with_nothing_queued_reports_zero_length() {
        let (mut dev, _net) = eth_with_mode(0);
        let mut bus = MockBus::new();

        dev.write_register(COMMAND, CMD_READ_NET, &mut bus);
        bus.advance_to_last();
        dev.complete(&mut bus);

        assert_eq!(dev.read_register(STATUS), STAT_READY);
        assert_eq!(dev.read_register(DATA1), 0);
    }

    #[test]
    fn readnet_copies_the_frame_and_latches_further_pending_packets() {
        let (mut dev, net) = eth_with_mode(0);
        let mut bus = MockBus::new();

        net.borrow_mut().push_rx(&[1, 2, 3, 4, 5]);
        net.borrow_mut().push_rx(&[9]);

        dev.write_register(DATA0, 64, &mut bus);
        dev.write_register(COMMAND, CMD_READ_NET, &mut bus);
        bus.advance_to_last();
        dev.complete(&mut bus);

        assert_eq!(dev.read_register(DATA1), 5);
        assert_eq!(&bus.memory[64..69], &[1, 2, 3, 4, 5]);
        // A second frame is still queued, so the pending latch is set while
        // the status value itself reads READY.
        assert_eq!(dev.read_register(STATUS), READ_PENDING | STAT_READY);
        assert!(!dev.is_busy());
    }

    #[test]
    fn poll_loop_latches_read_pending_and_interrupts_once() {
        let (mut dev, net) = eth_with_mode(MODE_INTERRUPT);
        let mut bus = MockBus::new();

        dev.attach(&mut bus);
        assert_eq!(bus.scheduled, vec![POLL_NET_US]);

        // Nothing waiting yet: the poll re-arms silently.
        bus.advance_to_last();
        dev.complete(&mut bus);
        assert!(!bus.irq);
        assert_eq!(bus.scheduled.len(), 2);

        // A frame arrives before the next poll fires.
        net.borrow_mut().push_rx(&[7, 7, 7]);
        bus.advance_to_last();
        dev.complete(&mut bus);
        assert_eq!(dev.read_register(STATUS) & READ_PENDING, READ_PENDING);
        assert_eq!(bus.irq_raises, 1);
        // The latch holds the loop: no further poll is scheduled.
        assert_eq!(bus.scheduled.len(), 2);
    }

    #[test]
    fn broken_interface_fails_transfers_but_still_resets() {
        let (mut dev, _net) = eth_with_mode(0);
        let mut bus = MockBus::new();

        dev.set_condition(false);
        dev.write_register(COMMAND, CMD_READ_NET, &mut bus);
        bus.advance_to_last();
        dev.complete(&mut bus);
        assert_eq!(dev.read_register(STATUS), STAT_READ_ERR);

        dev.write_register(COMMAND, CMD_RESET, &mut bus);
        bus.advance_to_last();
        dev.complete(&mut bus);
        assert_eq!(dev.read_register(STATUS), STAT_READY);
    }
}
