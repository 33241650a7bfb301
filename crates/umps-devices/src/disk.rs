use std::fs::{File, OpenOptions};
use std::path::Path;

use umps_storage::{Block, DiskParams};
use umps_time::format_tod;

use crate::device::{last_op_str, BusHandle, Device, DeviceKind, Signal};
use crate::{
    DeviceError, BYTE_BITS, BYTE_MASK, CMD_ACK, CMD_RESET, COMMAND, DATA0, DATA1, DEV_REGS,
    DMA_TICKS, HWORD_BITS, IMM_MASK, STATUS, STAT_BUSY, STAT_ILLEGAL_OP, STAT_READY,
};

pub const CMD_SEEK_CYL: u32 = 2;
pub const CMD_READ_BLK: u32 = 3;
pub const CMD_WRITE_BLK: u32 = 4;

pub const STAT_SEEK_ERR: u32 = 4;
pub const STAT_READ_ERR: u32 = 5;
pub const STAT_WRITE_ERR: u32 = 6;
pub const STAT_DMA_ERR: u32 = 7;

/// Controller reset time in microseconds; recalibration back to cylinder 0
/// adds the seek figure per cylinder on top.
pub const DISK_RESET_US: u64 = 400;

/// Moving-head disk drive backed by an image file.
///
/// Sectors are addressed as (cylinder, head, sector); reads and writes go
/// through a one-sector cache and simulate seek time, rotational latency and
/// the DMA transfer. The COMMAND layout is `cyl[31:16] | head[23:16] |
/// sect[15:8] | op[7:0]` (cylinder only for SEEKCYL).
pub struct DiskDevice {
    regs: [u32; DEV_REGS],
    working: bool,
    clock_rate: u32,
    compl_time: u64,
    status: String,
    signals: Vec<Signal>,
    file: File,
    params: DiskParams,
    data_start_words: u64,
    current_cyl: u32,
    /// Microticks per rotational sector slot.
    sect_ticks: u64,
    /// Coordinates held in the sector cache, when valid.
    cache: Option<(u32, u32, u32)>,
    buf: Block,
    /// Set when the DMA-in of a WRITEBLK failed; the completion reports the
    /// error instead of touching the image.
    pending_dma_err: bool,
}

impl DiskDevice {
    pub fn create(image_path: &Path, clock_rate: u32) -> Result<Self, DeviceError> {
        let mut file = OpenOptions::new().read(true).write(true).open(image_path)?;
        let (params, data_start_words) = DiskParams::read(&mut file)?;

        let mut regs = [0; DEV_REGS];
        regs[STATUS] = STAT_READY;
        // DATA1 advertises the drive geometry: CYL CYL HEAD SECT.
        regs[DATA1] = (params.cylinders << HWORD_BITS)
            | (params.heads << BYTE_BITS)
            | params.sectors;

        let sect_ticks =
            u64::from(params.rotation_time_us) * u64::from(clock_rate) / u64::from(params.sectors);

        Ok(Self {
            regs,
            working: true,
            clock_rate,
            compl_time: 0,
            status: "Idle".into(),
            signals: Vec::new(),
            file,
            params,
            data_start_words,
            current_cyl: 0,
            sect_ticks,
            cache: None,
            buf: Block::new(),
            pending_dma_err: false,
        })
    }

    pub fn params(&self) -> &DiskParams {
        &self.params
    }

    fn last_op(&self) -> &'static str {
        last_op_str(self.regs[STATUS] == STAT_READY)
    }

    fn scaled(&self, micros: u64) -> u64 {
        micros * u64::from(self.clock_rate)
    }

    /// Ticks until sector `sect` has rotated under the head and been read or
    /// written, starting from clock reading `tod`.
    fn rotation_ticks(&self, tod: u64, sect: u32) -> u64 {
        let sectors = u64::from(self.params.sectors);
        let sect = u64::from(sect);
        let current = (tod / self.sect_ticks) % sectors;
        let mut ticks = tod % self.sect_ticks;
        let offset = if sect > current {
            sect - current - 1
        } else {
            (sectors - 1) - (current - sect)
        };
        ticks += self.sect_ticks * offset;
        ticks += self.sect_ticks * u64::from(self.params.data_pct) / 100;
        ticks
    }

    fn sector_offset(&self, head: u32, sect: u32) -> u64 {
        self.params
            .sector_byte_offset(self.data_start_words, self.current_cyl, head, sect)
    }
}

impl Device for DiskDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Disk
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
                match value & BYTE_MASK {
                    CMD_RESET => {
                        bus.int_ack();
                        // Controller reset plus recalibration to cylinder 0.
                        let delay = self.scaled(
                            DISK_RESET_US
                                + u64::from(self.params.seek_time_us)
                                    * u64::from(self.current_cyl),
                        );
                        self.compl_time = bus.schedule(delay);
                        self.status = format!("Resetting (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_BUSY;
                    }
                    CMD_ACK => {
                        bus.int_ack();
                        self.status = format!("Idle (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_READY;
                    }
                    CMD_SEEK_CYL => {
                        bus.int_ack();
                        let cyl = (value >> BYTE_BITS) & IMM_MASK;
                        if cyl < self.params.cylinders {
                            self.status =
                                format!("Seeking Cyl 0x{cyl:04X} (last op: {})", self.last_op());
                            let distance = self.current_cyl.abs_diff(cyl);
                            let delay = self
                                .scaled(u64::from(self.params.seek_time_us) * u64::from(distance))
                                + 1;
                            self.compl_time = bus.schedule(delay);
                            self.regs[STATUS] = STAT_BUSY;
                        } else {
                            self.status =
                                format!("Cyl 0x{cyl:04X} out of range : waiting for ACK");
                            self.regs[STATUS] = STAT_SEEK_ERR;
                            bus.int_req();
                        }
                    }
                    CMD_READ_BLK => {
                        bus.int_ack();
                        let head = (value >> HWORD_BITS) & BYTE_MASK;
                        let sect = (value >> BYTE_BITS) & BYTE_MASK;
                        if head < self.params.heads && sect < self.params.sectors {
                            self.status = format!(
                                "Reading C/H/S 0x{:04X}/0x{head:02X}/0x{sect:02X} (last op: {})",
                                self.current_cyl,
                                self.last_op()
                            );
                            let delay = if self.cache == Some((self.current_cyl, head, sect)) {
                                // Sector already buffered: only the DMA out.
                                DMA_TICKS
                            } else {
                                self.cache = None;
                                self.rotation_ticks(u64::from(bus.tod_lo()), sect) + DMA_TICKS
                            };
                            self.compl_time = bus.schedule(delay);
                            self.regs[STATUS] = STAT_BUSY;
                        } else {
                            self.status = format!(
                                "Head/sect 0x{head:02X}/0x{sect:02X} out of range : waiting for ACK"
                            );
                            self.regs[STATUS] = STAT_READ_ERR;
                            bus.int_req();
                        }
                    }
                    CMD_WRITE_BLK => {
                        bus.int_ack();
                        let head = (value >> HWORD_BITS) & BYTE_MASK;
                        let sect = (value >> BYTE_BITS) & BYTE_MASK;
                        if head < self.params.heads && sect < self.params.sectors {
                            self.status = format!(
                                "Writing C/H/S 0x{:04X}/0x{head:02X}/0x{sect:02X} (last op: {})",
                                self.current_cyl,
                                self.last_op()
                            );
                            // The sector is fetched from memory up front; the
                            // platter keeps spinning during the transfer.
                            let delay = if bus.dma_from_memory(self.regs[DATA0], &mut self.buf) {
                                self.cache = None;
                                self.pending_dma_err = true;
                                DMA_TICKS
                            } else {
                                self.cache = Some((self.current_cyl, head, sect));
                                self.pending_dma_err = false;
                                let spun = u64::from(bus.tod_lo()) + DMA_TICKS;
                                DMA_TICKS + self.rotation_ticks(spun, sect)
                            };
                            self.compl_time = bus.schedule(delay);
                            self.regs[STATUS] = STAT_BUSY;
                        } else {
                            self.status = format!(
                                "Head/sect 0x{head:02X}/0x{sect:02X} out of range : waiting for ACK"
                            );
                            self.regs[STATUS] = STAT_WRITE_ERR;
                            bus.int_req();
                        }
                    }
                    _ => {
                        self.status = format!("Unknown command (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_ILLEGAL_OP;
                        bus.int_req();
                    }
                }
                self.signals.push(Signal::StatusChanged(self.status.clone()));
            }
            DATA0 => {
                // Physical address of the memory-side buffer.
                self.regs[DATA0] = value;
            }
            _ => {}
        }
    }

    fn complete(&mut self, bus: &mut dyn BusHandle) -> usize {
        match self.regs[COMMAND] & BYTE_MASK {
            CMD_RESET => {
                // A reset completes successfully even when not working, and
                // drops the sector cache.
                self.status = "Reset completed : waiting for ACK".into();
                self.regs[STATUS] = STAT_READY;
                self.cache = None;
                self.pending_dma_err = false;
            }
            CMD_SEEK_CYL => {
                let target = (self.regs[COMMAND] >> BYTE_BITS) & IMM_MASK;
                if self.working {
                    self.current_cyl = target;
                    self.status = format!("Cyl 0x{target:04X} reached : waiting for ACK");
                    self.regs[STATUS] = STAT_READY;
                } else {
                    // The head stalls somewhere between start and target.
                    self.current_cyl = (target + self.current_cyl) / 2;
                    self.status =
                        format!("Cyl 0x{:04X} seek error : waiting for ACK", self.current_cyl);
                    self.regs[STATUS] = STAT_SEEK_ERR;
                }
            }
            CMD_READ_BLK => {
                let head = (self.regs[COMMAND] >> HWORD_BITS) & BYTE_MASK;
                let sect = (self.regs[COMMAND] >> BYTE_BITS) & BYTE_MASK;
                if self.working {
                    if self.cache.is_none() {
                        let offset = self.sector_offset(head, sect);
                        if let Err(err) = self.buf.read_from(&mut self.file, offset) {
                            panic!("unable to read disk image file: {err}");
                        }
                    }
                    self.cache = Some((self.current_cyl, head, sect));
                    if bus.dma_to_memory(self.regs[DATA0], &self.buf) {
                        self.status = format!(
                            "DMA error reading C/H/S 0x{:04X}/0x{head:02X}/0x{sect:02X} : waiting for ACK",
                            self.current_cyl
                        );
                        self.regs[STATUS] = STAT_DMA_ERR;
                    } else {
                        self.status = format!(
                            "C/H/S 0x{:04X}/0x{head:02X}/0x{sect:02X} block read : waiting for ACK",
                            self.current_cyl
                        );
                        self.regs[STATUS] = STAT_READY;
                    }
                } else {
                    self.status = format!(
                        "Error reading C/H/S 0x{:04X}/0x{head:02X}/0x{sect:02X} : waiting for ACK",
                        self.current_cyl
                    );
                    self.cache = None;
                    self.regs[STATUS] = STAT_READ_ERR;
                }
            }
            CMD_WRITE_BLK => {
                let head = (self.regs[COMMAND] >> HWORD_BITS) & BYTE_MASK;
                let sect = (self.regs[COMMAND] >> BYTE_BITS) & BYTE_MASK;
                if !self.working {
                    self.status = format!(
                        "Error writing C/H/S 0x{:04X}/0x{head:02X}/0x{sect:02X} : waiting for ACK",
                        self.current_cyl
                    );
                    self.cache = None;
                    self.pending_dma_err = false;
                    self.regs[STATUS] = STAT_WRITE_ERR;
                } else if self.pending_dma_err {
                    self.pending_dma_err = false;
                    self.status = format!(
                        "DMA error writing C/H/S 0x{:04X}/0x{head:02X}/0x{sect:02X} : waiting for ACK",
                        self.current_cyl
                    );
                    self.regs[STATUS] = STAT_DMA_ERR;
                } else {
                    let offset = self.sector_offset(head, sect);
                    if let Err(err) = self.buf.write_to(&mut self.file, offset) {
                        panic!("unable to write disk image file: {err}");
                    }
                    self.status = format!(
                        "C/H/S 0x{:04X}/0x{head:02X}/0x{sect:02X} block written : waiting for ACK",
                        self.current_cyl
                    );
                    self.regs[STATUS] = STAT_READY;
                }
            }
            other => panic!("unknown operation {other:#x} completing on disk"),
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
