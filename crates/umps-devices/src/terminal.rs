use std::fs::File;
use std::io::Write;
use std::path::Path;

use umps_time::format_tod;

use crate::device::{last_op_str, BusHandle, Device, DeviceKind, Signal};
use crate::{
    DeviceError, BYTE_BITS, BYTE_MASK, CMD_ACK, CMD_RESET, DEV_REGS, RECV_COMMAND, RECV_STATUS,
    STAT_BUSY, STAT_ILLEGAL_OP, STAT_READY, TRANS_COMMAND, TRANS_STATUS,
};

pub const CMD_RECV_CHAR: u32 = 2;
pub const CMD_TRANS_CHAR: u32 = 2;

pub const STAT_RECV_ERR: u32 = 4;
pub const STAT_TRANS_ERR: u32 = 4;
pub const STAT_RECEIVED: u32 = 5;
pub const STAT_TRANSMITTED: u32 = 5;

// Operation latencies in microseconds (scaled by the CPU clock rate). The
// character figures work out to a throughput of about 12.5 KB/s.
pub const TERM_RESET_US: u64 = 400;
pub const TERM_RECV_US: u64 = 80;
pub const TERM_TRANS_US: u64 = 80;

#[derive(Debug)]
struct SubDevice {
    compl_time: u64,
    int_pending: bool,
    status: String,
}

impl SubDevice {
    fn new() -> Self {
        Self {
            compl_time: 0,
            int_pending: false,
            status: "Idle".into(),
        }
    }
}

/// Serial dumb terminal: independent receiver and transmitter sub-devices
/// sharing one register quadruple and one interrupt line.
///
/// A TRANS_COMMAND word carries its payload character in bits 15..8
/// (`(ch << 8) | op`); RECV_STATUS reports a received character the same way.
pub struct TerminalDevice {
    regs: [u32; DEV_REGS],
    working: bool,
    clock_rate: u32,
    rx: SubDevice,
    tx: SubDevice,
    rx_buf: Vec<u8>,
    rx_pos: usize,
    signals: Vec<Signal>,
    log: File,
}

impl TerminalDevice {
    pub fn create(log_path: &Path, clock_rate: u32) -> Result<Self, DeviceError> {
        let log = File::create(log_path)?;
        let mut regs = [0; DEV_REGS];
        regs[RECV_STATUS] = STAT_READY;
        regs[TRANS_STATUS] = STAT_READY;
        Ok(Self {
            regs,
            working: true,
            clock_rate,
            rx: SubDevice::new(),
            tx: SubDevice::new(),
            rx_buf: Vec::new(),
            rx_pos: 0,
            signals: Vec::new(),
            log,
        })
    }

    fn sub_last_op(&self, status_index: usize) -> &'static str {
        last_op_str(matches!(
            self.regs[status_index] & BYTE_MASK,
            STAT_READY | STAT_RECEIVED
        ))
    }

    fn scaled(&self, micros: u64) -> u64 {
        micros * u64::from(self.clock_rate)
    }

    fn log_write(&mut self, bytes: &[u8]) {
        if let Err(err) = self.log.write_all(bytes).and_then(|_| self.log.flush()) {
            panic!("error writing terminal log file: {err}");
        }
    }

    fn emit_status(&mut self) {
        self.signals
            .push(Signal::StatusChanged(self.status_text()));
    }

    fn write_recv_command(&mut self, value: u32, bus: &mut dyn BusHandle) {
        if self.regs[RECV_STATUS] == STAT_BUSY {
            return;
        }
        self.regs[RECV_COMMAND] = value;

        match value {
            CMD_RESET => {
                // Clearing our interrupt must not tear down one pending on
                // the transmitter side.
                if !self.tx.int_pending {
                    bus.int_ack();
                }
                self.rx.int_pending = false;
                self.rx.compl_time = bus.schedule(self.scaled(TERM_RESET_US));
                self.rx.status = format!("Resetting (last op: {})", self.sub_last_op(RECV_STATUS));
                self.regs[RECV_STATUS] = STAT_BUSY;
            }
            CMD_ACK => {
                if !self.tx.int_pending {
                    bus.int_ack();
                }
                self.rx.int_pending = false;
                self.rx.status = format!("Idle (last op: {})", self.sub_last_op(RECV_STATUS));
                self.regs[RECV_STATUS] = STAT_READY;
            }
            CMD_RECV_CHAR => {
                if !self.tx.int_pending {
                    bus.int_ack();
                }
                self.rx.int_pending = false;
                self.rx.status = format!("Receiving (last op: {})", self.sub_last_op(RECV_STATUS));
                self.rx.compl_time = bus.schedule(self.scaled(TERM_RECV_US));
                self.regs[RECV_STATUS] = STAT_BUSY;
            }
            _ => {
                self.rx.status =
                    format!("Unknown command (last op: {})", self.sub_last_op(RECV_STATUS));
                self.regs[RECV_STATUS] = STAT_ILLEGAL_OP;
                bus.int_req();
                self.rx.int_pending = true;
            }
        }
        self.emit_status();
    }

    fn write_trans_command(&mut self, value: u32, bus: &mut dyn BusHandle) {
        if self.regs[TRANS_STATUS] == STAT_BUSY {
            return;
        }
        self.regs[TRANS_COMMAND] = value;

        match value & BYTE_MASK {
            CMD_RESET => {
                if !self.rx.int_pending {
                    bus.int_ack();
                }
                self.tx.int_pending = false;
                self.tx.compl_time = bus.schedule(self.scaled(TERM_RESET_US));
                self.tx.status =
                    format!("Resetting (last op: {})", self.sub_last_op(TRANS_STATUS));
                self.regs[TRANS_STATUS] = STAT_BUSY;
            }
            CMD_ACK => {
                if !self.rx.int_pending {
                    bus.int_ack();
                }
                self.tx.int_pending = false;
                self.tx.status = format!("Idle (last op: {})", self.sub_last_op(TRANS_STATUS));
                self.regs[TRANS_STATUS] = STAT_READY;
            }
            CMD_TRANS_CHAR => {
                if !self.rx.int_pending {
                    bus.int_ack();
                }
                self.tx.int_pending = false;
                self.tx.status = format!(
                    "Transm. char 0x{:02X} (last op: {})",
                    (value >> BYTE_BITS) & BYTE_MASK,
                    self.sub_last_op(TRANS_STATUS)
                );
                self.tx.compl_time = bus.schedule(self.scaled(TERM_TRANS_US));
                self.regs[TRANS_STATUS] = STAT_BUSY;
            }
            _ => {
                self.tx.status =
                    format!("Unknown command (last op: {})", self.sub_last_op(TRANS_STATUS));
                self.regs[TRANS_STATUS] = STAT_ILLEGAL_OP;
                bus.int_req();
                self.tx.int_pending = true;
            }
        }
        self.emit_status();
    }

    fn complete_recv(&mut self, bus: &mut dyn BusHandle) {
        match self.regs[RECV_COMMAND] {
            CMD_RESET => {
                // A reset completes successfully even when not working.
                self.rx.status = "Reset completed : waiting for ACK".into();
                self.regs[RECV_STATUS] = STAT_READY;
                self.rx.int_pending = true;
                bus.int_req();
            }
            CMD_RECV_CHAR => {
                if self.rx_pos >= self.rx_buf.len() {
                    // No character waiting: try again one receive interval
                    // from now. This is how host input gets polled.
                    self.rx.compl_time = bus.schedule(self.scaled(TERM_RECV_US));
                } else {
                    if self.working {
                        let ch = self.rx_buf[self.rx_pos];
                        self.rx_pos += 1;
                        self.rx.status =
                            format!("Received char 0x{ch:02X} : waiting for ACK");
                        self.regs[RECV_STATUS] = (u32::from(ch) << BYTE_BITS) | STAT_RECEIVED;
                    } else {
                        self.rx.status = "Error receiving char : waiting for ACK".into();
                        self.regs[RECV_STATUS] = STAT_RECV_ERR;
                    }
                    self.rx.int_pending = true;
                    bus.int_req();
                }
            }
            other => panic!("unknown operation {other:#x} completing on terminal receiver"),
        }
    }

    fn complete_trans(&mut self, bus: &mut dyn BusHandle) {
        match self.regs[TRANS_COMMAND] & BYTE_MASK {
            CMD_RESET => {
                self.tx.status = "Reset completed : waiting for ACK".into();
                self.regs[TRANS_STATUS] = STAT_READY;
            }
            CMD_TRANS_CHAR => {
                let ch = ((self.regs[TRANS_COMMAND] >> BYTE_BITS) & BYTE_MASK) as u8;
                if self.working {
                    self.log_write(&[ch]);
                    self.signals.push(Signal::Transmitted(ch));
                    self.tx.status = format!("Transm. char 0x{ch:02X} : waiting for ACK");
                    self.regs[TRANS_STATUS] =
                        (self.regs[TRANS_COMMAND] & (BYTE_MASK << BYTE_BITS)) | STAT_TRANSMITTED;
                } else {
                    self.tx.status =
                        format!("Error transm. char 0x{ch:02X} : waiting for ACK");
                    self.regs[TRANS_STATUS] =
                        (self.regs[TRANS_COMMAND] & (BYTE_MASK << BYTE_BITS)) | STAT_TRANS_ERR;
                }
            }
            other => panic!("unknown operation {other:#x} completing on terminal transmitter"),
        }
        bus.int_req();
        self.tx.int_pending = true;
    }

    pub fn rx_status_text(&self) -> &str {
        &self.rx.status
    }

    pub fn tx_status_text(&self) -> &str {
        &self.tx.status
    }
}

impl Device for TerminalDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Terminal
    }

    fn read_register(&self, index: usize) -> u32 {
        assert!(index < DEV_REGS, "register index {index} out of range");
        self.regs[index]
    }

    fn write_register(&mut self, index: usize, value: u32, bus: &mut dyn BusHandle) {
        // Only the two COMMAND registers are writable; each is gated on its
        // own sub-device being idle.
        match index {
            RECV_COMMAND => self.write_recv_command(value, bus),
            TRANS_COMMAND => self.write_trans_command(value, bus),
            _ => {}
        }
    }

    fn complete(&mut self, bus: &mut dyn BusHandle) -> usize {
        // Exactly one sub-device completes per event. When both are busy the
        // earlier scheduled completion goes first; an equal tie is harmless
        // because another completion event follows immediately, and by then
        // the receiver has either finished or re-armed itself.
        let do_recv = if self.regs[RECV_STATUS] == STAT_BUSY && self.regs[TRANS_STATUS] == STAT_BUSY
        {
            self.rx.compl_time <= self.tx.compl_time
        } else {
            self.regs[RECV_STATUS] == STAT_BUSY
        };

        let touched = if do_recv {
            self.complete_recv(bus);
            RECV_STATUS
        } else {
            self.complete_trans(bus);
            TRANS_STATUS
        };
        self.emit_status();
        touched
    }

    fn is_busy(&self) -> bool {
        self.regs[RECV_STATUS] == STAT_BUSY || self.regs[TRANS_STATUS] == STAT_BUSY
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
        format!("{}\n{}", self.rx.status, self.tx.status)
    }

    fn completion_info(&self) -> String {
        let rx = if self.regs[RECV_STATUS] == STAT_BUSY {
            format_tod(self.rx.compl_time)
        } else {
            String::new()
        };
        let tx = if self.regs[TRANS_STATUS] == STAT_BUSY {
            format_tod(self.tx.compl_time)
        } else {
            String::new()
        };
        format!("{rx}\n{tx}")
    }

    fn input(&mut self, line: &str) {
        if self.rx_pos >= self.rx_buf.len() {
            // Previous buffer exhausted: start fresh.
            self.rx_buf.clear();
        } else {
            // Keep the unread tail in front of the new data.
            self.rx_buf.drain(..self.rx_pos);
        }
        self.rx_pos = 0;
        self.rx_buf.extend_from_slice(line.as_bytes());
        self.rx_buf.push(b'\n');

        // Input is echoed to the log.
        let mut echoed = line.as_bytes().to_vec();
        echoed.push(b'\n');
        self.log_write(&echoed);
    }

    fn take_signals(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.signals)
    }
}
