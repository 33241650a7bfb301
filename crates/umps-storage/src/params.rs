use std::io::{Read, Seek, SeekFrom};

use crate::{
    ImageError, Result, BLOCK_WORDS, DISK_FILE_ID, FLASH_FILE_ID, WORD_SIZE,
};

/// Number of parameter words in a disk image header (after the magic).
const DISK_PARAM_WORDS: u64 = 6;
/// Number of parameter words in a flash image header (after the magic).
const FLASH_PARAM_WORDS: u64 = 2;

fn read_words<F: Read>(file: &mut F, count: usize) -> Result<Vec<u32>> {
    let mut bytes = vec![0u8; count * WORD_SIZE];
    file.read_exact(&mut bytes)
        .map_err(|_| ImageError::TruncatedHeader)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// Disk geometry and performance figures, as read from an image file header.
///
/// The values were validated when the image was created, so they are taken at
/// face value here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskParams {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
    /// One full platter rotation, in microseconds.
    pub rotation_time_us: u32,
    /// Average cylinder-to-cylinder seek time, in microseconds.
    pub seek_time_us: u32,
    /// Portion of a sector slot occupied by data, in percent.
    pub data_pct: u32,
}

impl DiskParams {
    /// Parse the header of an open disk image.
    ///
    /// Returns the parameters and the data-region start offset in words. The
    /// file is rewound afterwards.
    pub fn read<F: Read + Seek>(file: &mut F) -> Result<(Self, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let words = read_words(file, 1 + DISK_PARAM_WORDS as usize)?;
        if words[0] != DISK_FILE_ID {
            return Err(ImageError::BadMagic {
                expected: DISK_FILE_ID,
                found: words[0],
            });
        }
        let params = Self {
            cylinders: words[1],
            heads: words[2],
            sectors: words[3],
            rotation_time_us: words[4],
            seek_time_us: words[5],
            data_pct: words[6],
        };
        file.seek(SeekFrom::Start(0))?;
        Ok((params, 1 + DISK_PARAM_WORDS))
    }

    /// Byte offset of sector `(cyl, head, sect)` in the image file, given the
    /// data-region start offset in words.
    pub fn sector_byte_offset(&self, data_start_words: u64, cyl: u32, head: u32, sect: u32) -> u64 {
        let index =
            u64::from(cyl) * u64::from(self.heads) * u64::from(self.sectors)
                + u64::from(head) * u64::from(self.sectors)
                + u64::from(sect);
        (data_start_words + index * BLOCK_WORDS as u64) * WORD_SIZE as u64
    }
}

/// Flash device figures, as read from an image file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashParams {
    pub blocks: u32,
    /// Average block write time, in microseconds.
    pub write_time_us: u32,
}

impl FlashParams {
    /// Parse the header of an open flash image.
    ///
    /// Returns the parameters and the data-region start offset in words. The
    /// file is rewound afterwards.
    pub fn read<F: Read + Seek>(file: &mut F) -> Result<(Self, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let words = read_words(file, 1 + FLASH_PARAM_WORDS as usize)?;
        if words[0] != FLASH_FILE_ID {
            return Err(ImageError::BadMagic {
                expected: FLASH_FILE_ID,
                found: words[0],
            });
        }
        let params = Self {
            blocks: words[1],
            write_time_us: words[2],
        };
        file.seek(SeekFrom::Start(0))?;
        Ok((params, 1 + FLASH_PARAM_WORDS))
    }

    /// Byte offset of `block` in the image file, given the data-region start
    /// offset in words.
    pub fn block_byte_offset(&self, data_start_words: u64, block: u32) -> u64 {
        (data_start_words + u64::from(block) * BLOCK_WORDS as u64) * WORD_SIZE as u64
    }
}
