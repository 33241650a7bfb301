use std::fs::File;
use std::io::Write;
use std::path::Path;

use umps_time::format_tod;

use crate::device::{last_op_str, BusHandle, Device, DeviceKind, Signal};
use crate::{
    DeviceError, CMD_ACK, CMD_RESET, COMMAND, DATA0, DEV_REGS, STATUS, STAT_BUSY,
    STAT_ILLEGAL_OP, STAT_READY,
};

pub const CMD_PRINT_CHAR: u32 = 2;
pub const STAT_PRINT_ERR: u32 = 4;

// Operation latencies in microseconds (scaled by the CPU clock rate). The
// character figure works out to a throughput of 125 KB/s.
pub const PRINTER_RESET_US: u64 = 40;
pub const PRINTER_CHAR_US: u64 = 8;

/// Single-character line printer writing to a log file.
pub struct PrinterDevice {
    regs: [u32; DEV_REGS],
    working: bool,
    clock_rate: u32,
    compl_time: u64,
    status: String,
    signals: Vec<Signal>,
    log: File,
}

impl PrinterDevice {
    pub fn create(log_path: &Path, clock_rate: u32) -> Result<Self, DeviceError> {
        let log = File::create(log_path)?;
        let mut regs = [0; DEV_REGS];
        regs[STATUS] = STAT_READY;
        Ok(Self {
            regs,
            working: true,
            clock_rate,
            compl_time: 0,
            status: "Idle".into(),
            signals: Vec::new(),
            log,
        })
    }

    fn last_op(&self) -> &'static str {
        last_op_str(self.regs[STATUS] == STAT_READY)
    }

    fn scaled(&self, micros: u64) -> u64 {
        micros * u64::from(self.clock_rate)
    }
}

impl Device for PrinterDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Printer
    }

    fn read_register(&self, index: usize) -> u32 {
        assert!(index < DEV_REGS, "register index {index} out of range");
        self.regs[index]
    }

    fn write_register(&mut self, index: usize, value: u32, bus: &mut dyn BusHandle) {
        // Only COMMAND and DATA0 are writable, and only while not busy.
        if self.regs[STATUS] == STAT_BUSY {
            return;
        }

        match index {
            COMMAND => {
                self.regs[COMMAND] = value;
                match value {
                    CMD_RESET => {
                        bus.int_ack();
                        self.compl_time = bus.schedule(self.scaled(PRINTER_RESET_US));
                        self.status = format!("Resetting (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_BUSY;
                    }
                    CMD_ACK => {
                        bus.int_ack();
                        self.status = format!("Idle (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_READY;
                    }
                    CMD_PRINT_CHAR => {
                        bus.int_ack();
                        self.status = format!(
                            "Printing char 0x{:02X} (last op: {})",
                            self.regs[DATA0] as u8,
                            self.last_op()
                        );
                        self.compl_time = bus.schedule(self.scaled(PRINTER_CHAR_US));
                        self.regs[STATUS] = STAT_BUSY;
                    }
                    _ => {
                        self.status = format!("Unknown command (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_ILLEGAL_OP;
                        bus.int_req();
                    }
                }
                self.signals.push(Signal::StatusChanged(self.status.clone()));
            }
            DATA0 => self.regs[DATA0] = value,
            _ => {}
        }
    }

    fn complete(&mut self, bus: &mut dyn BusHandle) -> usize {
        match self.regs[COMMAND] {
            CMD_RESET => {
                // A reset completes successfully even when not working.
                self.status = "Reset completed : waiting for ACK".into();
                self.regs[STATUS] = STAT_READY;
            }
            CMD_PRINT_CHAR => {
                let ch = self.regs[DATA0] as u8;
                if self.working {
                    if let Err(err) = self.log.write_all(&[ch]).and_then(|_| self.log.flush()) {
                        panic!("error writing printer log file: {err}");
                    }
                    self.status = format!("Printed char 0x{ch:02X} : waiting for ACK");
                    self.regs[STATUS] = STAT_READY;
                } else {
                    self.status = format!("Error printing char 0x{ch:02X} : waiting for ACK");
                    self.regs[STATUS] = STAT_PRINT_ERR;
                }
            }
            other => panic!("unknown operation {other:#x} completing on printer"),
        }

        self.signals.push(Signal::StatusChanged(self.status.clone()));
        bus.int_req();
        STATUS
    }

    fn is_busy(&self) -> bool {
        self.regs[STATUS] == STAT_BUSY
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
