use std::fs::{File, OpenOptions};
use std::path::Path;

use umps_storage::{Block, FlashParams, MAX_FLASH_BLOCKS};
use umps_time::format_tod;

use crate::device::{last_op_str, BusHandle, Device, DeviceKind, Signal};
use crate::{
    DeviceError, BYTE_BITS, BYTE_MASK, CMD_ACK, CMD_RESET, COMMAND, DATA0, DATA1, DEV_REGS,
    DMA_TICKS, STATUS, STAT_BUSY, STAT_ILLEGAL_OP, STAT_READY,
};

pub const CMD_READ_BLK: u32 = 2;
pub const CMD_WRITE_BLK: u32 = 3;

pub const STAT_READ_ERR: u32 = 4;
pub const STAT_WRITE_ERR: u32 = 5;
pub const STAT_DMA_ERR: u32 = 6;

/// Controller reset time in microseconds; one write-time unit is added on
/// top to settle the media.
pub const FLASH_RESET_US: u64 = 400;

/// Block reads cost this percentage of the write-time figure.
pub const READ_RATIO_PCT: u64 = 75;

/// Block-addressed flash drive backed by an image file.
///
/// A flat array of 4096-byte blocks with a one-block cache; no geometry
/// beyond the block count, which DATA1 advertises. The COMMAND layout is
/// `block[31:8] | op[7:0]`.
pub struct FlashDevice {
    regs: [u32; DEV_REGS],
    working: bool,
    clock_rate: u32,
    compl_time: u64,
    status: String,
    signals: Vec<Signal>,
    file: File,
    params: FlashParams,
    data_start_words: u64,
    /// Block index held in the cache, when valid.
    cache: Option<u32>,
    buf: Block,
    /// Set when the DMA-in of a WRITEBLK failed; the completion reports the
    /// error instead of touching the image.
    pending_dma_err: bool,
}

impl FlashDevice {
    pub fn create(image_path: &Path, clock_rate: u32) -> Result<Self, DeviceError> {
        let mut file = OpenOptions::new().read(true).write(true).open(image_path)?;
        let (params, data_start_words) = FlashParams::read(&mut file)?;

        let mut regs = [0; DEV_REGS];
        regs[STATUS] = STAT_READY;
        // DATA1 advertises the device size in blocks.
        regs[DATA1] = params.blocks;

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
            cache: None,
            buf: Block::new(),
            pending_dma_err: false,
        })
    }

    pub fn params(&self) -> &FlashParams {
        &self.params
    }

    fn last_op(&self) -> &'static str {
        last_op_str(self.regs[STATUS] == STAT_READY)
    }

    fn scaled(&self, micros: u64) -> u64 {
        micros * u64::from(self.clock_rate)
    }

    fn block_offset(&self, block: u32) -> u64 {
        self.params.block_byte_offset(self.data_start_words, block)
    }
}

impl Device for FlashDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Flash
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
                        let delay = self
                            .scaled(FLASH_RESET_US + u64::from(self.params.write_time_us));
                        self.compl_time = bus.schedule(delay);
                        self.status = format!("Resetting (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_BUSY;
                    }
                    CMD_ACK => {
                        bus.int_ack();
                        self.status = format!("Idle (last op: {})", self.last_op());
                        self.regs[STATUS] = STAT_READY;
                    }
                    CMD_READ_BLK => {
                        bus.int_ack();
                        let block = (value >> BYTE_BITS) & MAX_FLASH_BLOCKS;
                        if block < self.params.blocks {
                            self.status = format!(
                                "Reading block 0x{block:06X} (last op: {})",
                                self.last_op()
                            );
                            let delay = if self.cache == Some(block) {
                                // Block already buffered: only the DMA out.
                                DMA_TICKS
                            } else {
                                self.cache = None;
                                self.scaled(
                                    u64::from(self.params.write_time_us) * READ_RATIO_PCT / 100,
                                ) + DMA_TICKS
                            };
                            self.compl_time = bus.schedule(delay);
                            self.regs[STATUS] = STAT_BUSY;
                        } else {
                            self.status =
                                format!("Block 0x{block:06X} out of range : waiting for ACK");
                            self.regs[STATUS] = STAT_READ_ERR;
                            bus.int_req();
                        }
                    }
                    CMD_WRITE_BLK => {
                        bus.int_ack();
                        let block = (value >> BYTE_BITS) & MAX_FLASH_BLOCKS;
                        if block < self.params.blocks {
                            self.status = format!(
                                "Writing block 0x{block:06X} (last op: {})",
                                self.last_op()
                            );
                            let delay = if bus.dma_from_memory(self.regs[DATA0], &mut self.buf) {
                                self.cache = None;
                                self.pending_dma_err = true;
                                DMA_TICKS
                            } else {
                                self.cache = Some(block);
                                self.pending_dma_err = false;
                                self.scaled(u64::from(self.params.write_time_us)) + DMA_TICKS
                            };
                            self.compl_time = bus.schedule(delay);
                            self.regs[STATUS] = STAT_BUSY;
                        } else {
                            self.status =
                                format!("Block 0x{block:06X} out of range : waiting for ACK");
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
                // drops the block cache.
                self.status = "Reset completed : waiting for ACK".into();
                self.regs[STATUS] = STAT_READY;
                self.cache = None;
                self.pending_dma_err = false;
            }
            CMD_READ_BLK => {
                let block = (self.regs[COMMAND] >> BYTE_BITS) & MAX_FLASH_BLOCKS;
                if self.working {
                    if self.cache.is_none() {
                        let offset = self.block_offset(block);
                        if let Err(err) = self.buf.read_from(&mut self.file, offset) {
                            panic!("unable to read flash image file: {err}");
                        }
                    }
                    self.cache = Some(block);
                    if bus.dma_to_memory(self.regs[DATA0], &self.buf) {
                        self.status =
                            format!("DMA error reading block 0x{block:06X} : waiting for ACK");
                        self.regs[STATUS] = STAT_DMA_ERR;
                    } else {
                        self.status =
                            format!("Block 0x{block:06X} read : waiting for ACK");
                        self.regs[STATUS] = STAT_READY;
                    }
                } else {
                    self.status = format!("Error reading block 0x{block:06X} : waiting for ACK");
                    self.cache = None;
                    self.regs[STATUS] = STAT_READ_ERR;
                }
            }
            CMD_WRITE_BLK => {
                let block = (self.regs[COMMAND] >> BYTE_BITS) & MAX_FLASH_BLOCKS;
                if !self.working {
                    self.status = format!("Error writing block 0x{block:06X} : waiting for ACK");
                    self.cache = None;
                    self.pending_dma_err = false;
                    self.regs[STATUS] = STAT_WRITE_ERR;
                } else if self.pending_dma_err {
                    self.pending_dma_err = false;
                    self.status =
                        format!("DMA error writing block 0x{block:06X} : waiting for ACK");
                    self.regs[STATUS] = STAT_DMA_ERR;
                } else {
                    let offset = self.block_offset(block);
                    if let Err(err) = self.buf.write_to(&mut self.file, offset) {
                        panic!("unable to write flash image file: {err}");
                    }
                    self.status = format!("Block 0x{block:06X} written : waiting for ACK");
                    self.regs[STATUS] = STAT_READY;
                }
            }
            other => panic!("unknown operation {other:#x} completing on flash"),
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
