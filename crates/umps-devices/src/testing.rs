//! Shared bus double for device unit tests.

use umps_storage::{Block, BLOCK_SIZE_BYTES, BLOCK_WORDS};

use crate::BusHandle;

/// Records scheduling and IRQ traffic, and backs DMA with a flat byte array
/// starting at physical address zero.
pub(crate) struct MockBus {
    pub tod: u64,
    /// Absolute fire times of every `schedule` call, in order.
    pub scheduled: Vec<u64>,
    /// Current level of the device's interrupt.
    pub irq: bool,
    /// Total number of `int_req` calls.
    pub irq_raises: usize,
    pub memory: Vec<u8>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::with_memory(4 * BLOCK_SIZE_BYTES)
    }

    pub fn with_memory(bytes: usize) -> Self {
        Self {
            tod: 0,
            scheduled: Vec::new(),
            irq: false,
            irq_raises: 0,
            memory: vec![0; bytes],
        }
    }

    /// Jump the clock to the latest scheduled completion time.
    pub fn advance_to_last(&mut self) {
        if let Some(&t) = self.scheduled.last() {
            self.tod = t;
        }
    }

    fn range_ok(&self, paddr: u32, len: usize) -> bool {
        paddr % 4 == 0 && (paddr as usize) + len <= self.memory.len()
    }
}

impl BusHandle for MockBus {
    fn tod(&self) -> u64 {
        self.tod
    }

    fn schedule(&mut self, delay: u64) -> u64 {
        let at = self.tod + delay;
        self.scheduled.push(at);
        at
    }

    fn int_req(&mut self) {
        self.irq = true;
        self.irq_raises += 1;
    }

    fn int_ack(&mut self) {
        self.irq = false;
    }

    fn dma_to_memory(&mut self, paddr: u32, block: &Block) -> bool {
        if !self.range_ok(paddr, BLOCK_SIZE_BYTES) {
            return true;
        }
        for i in 0..BLOCK_WORDS {
            let at = paddr as usize + i * 4;
            self.memory[at..at + 4].copy_from_slice(&block.word(i).to_le_bytes());
        }
        false
    }

    fn dma_from_memory(&mut self, paddr: u32, block: &mut Block) -> bool {
        if !self.range_ok(paddr, BLOCK_SIZE_BYTES) {
            return true;
        }
        for i in 0..BLOCK_WORDS {
            let at = paddr as usize + i * 4;
            block.set_word(i, u32::from_le_bytes(self.memory[at..at + 4].try_into().unwrap()));
        }
        false
    }

    fn dma_to_memory_bytes(&mut self, paddr: u32, bytes: &[u8]) -> bool {
        if !self.range_ok(paddr, bytes.len()) {
            return true;
        }
        self.memory[paddr as usize..paddr as usize + bytes.len()].copy_from_slice(bytes);
        false
    }

    fn dma_from_memory_bytes(&mut self, paddr: u32, bytes: &mut [u8]) -> bool {
        if !self.range_ok(paddr, bytes.len()) {
            return true;
        }
        bytes.copy_from_slice(&self.memory[paddr as usize..paddr as usize + bytes.len()]);
        false
    }
}
