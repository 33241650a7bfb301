//! Block-device image formats used by the simulated disk and flash drives.
//!
//! An image file is a little-endian word stream: a one-word magic tag, a short
//! parameter header describing geometry and performance figures, then the data
//! region as consecutive 4096-byte blocks. This crate provides:
//!
//! - [`Block`]: one 4096-byte sector/block with word accessors and seek-offset
//!   file I/O
//! - [`DiskParams`] / [`FlashParams`]: header parsing for the two image kinds
//! - [`create_disk_image`] / [`create_flash_image`]: writers producing images
//!   that the parsers accept (the `mkdev` file contract)

#![forbid(unsafe_code)]

mod block;
mod error;
mod image;
mod params;

pub use block::Block;
pub use error::{ImageError, Result};
pub use image::{create_disk_image, create_flash_image, DiskGeometry, FlashGeometry};
pub use params::{DiskParams, FlashParams};

/// Words per block/sector.
pub const BLOCK_WORDS: usize = 1024;
/// Bytes per word.
pub const WORD_SIZE: usize = 4;
/// Bytes per block/sector.
pub const BLOCK_SIZE_BYTES: usize = BLOCK_WORDS * WORD_SIZE;

// Image file magic tags (word 0 of the file).
pub const DISK_FILE_ID: u32 = 0x0053_504D;
pub const FLASH_FILE_ID: u32 = 0x0053_504C;
/// Kernel core files carry this tag; flash image creation strips it from the
/// payload to keep the block data word-aligned.
pub const CORE_FILE_ID: u32 = 0x0ABA_0ABA;

// Disk geometry/performance bounds (header words 1..=6).
pub const MAX_CYLINDERS: u32 = 0xFFFF;
pub const MAX_HEADS: u32 = 0xFF;
pub const MAX_SECTORS: u32 = 0xFF;
pub const MIN_RPM: u32 = 360;
pub const MAX_RPM: u32 = 10_800;
pub const MAX_SEEK_TIME_US: u32 = 10_000;
pub const MIN_DATA_PCT: u32 = 10;
pub const MAX_DATA_PCT: u32 = 90;

// Flash bounds (header words 1..=2).
pub const MAX_FLASH_BLOCKS: u32 = 0xFF_FFFF;
pub const MAX_WRITE_TIME_US: u32 = 10_000;
