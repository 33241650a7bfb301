use std::io::{Read, Write};

use crate::{
    ImageError, Result, BLOCK_SIZE_BYTES, CORE_FILE_ID, DISK_FILE_ID, FLASH_FILE_ID,
    MAX_CYLINDERS, MAX_DATA_PCT, MAX_FLASH_BLOCKS, MAX_HEADS, MAX_RPM, MAX_SECTORS,
    MAX_SEEK_TIME_US, MAX_WRITE_TIME_US, MIN_DATA_PCT, MIN_RPM,
};

/// Parameter set for a new disk image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
    pub rotation_time_us: u32,
    pub seek_time_us: u32,
    pub data_pct: u32,
}

impl Default for DiskGeometry {
    fn default() -> Self {
        Self {
            cylinders: 32,
            heads: 2,
            sectors: 8,
            // 3600 RPM.
            rotation_time_us: 16_666,
            seek_time_us: 100,
            data_pct: 80,
        }
    }
}

impl DiskGeometry {
    /// Rotation time for a spindle speed given in revolutions per minute.
    pub fn rotation_time_from_rpm(rpm: u32) -> u32 {
        60_000_000 / rpm
    }

    pub fn validate(&self) -> Result<()> {
        if self.cylinders == 0 || self.cylinders > MAX_CYLINDERS {
            return Err(ImageError::InvalidGeometry("cylinder count out of range"));
        }
        if self.heads == 0 || self.heads > MAX_HEADS {
            return Err(ImageError::InvalidGeometry("head count out of range"));
        }
        if self.sectors == 0 || self.sectors > MAX_SECTORS {
            return Err(ImageError::InvalidGeometry("sector count out of range"));
        }
        let min_rot = Self::rotation_time_from_rpm(MAX_RPM);
        let max_rot = Self::rotation_time_from_rpm(MIN_RPM);
        if self.rotation_time_us < min_rot || self.rotation_time_us > max_rot {
            return Err(ImageError::InvalidGeometry("rotation time out of range"));
        }
        if self.seek_time_us == 0 || self.seek_time_us > MAX_SEEK_TIME_US {
            return Err(ImageError::InvalidGeometry("seek time out of range"));
        }
        if self.data_pct < MIN_DATA_PCT || self.data_pct > MAX_DATA_PCT {
            return Err(ImageError::InvalidGeometry("data percentage out of range"));
        }
        Ok(())
    }

    pub fn total_sectors(&self) -> u64 {
        u64::from(self.cylinders) * u64::from(self.heads) * u64::from(self.sectors)
    }
}

/// Parameter set for a new flash image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    pub blocks: u32,
    pub write_time_us: u32,
}

impl Default for FlashGeometry {
    fn default() -> Self {
        Self {
            blocks: 512,
            write_time_us: 1000,
        }
    }
}

impl FlashGeometry {
    pub fn validate(&self) -> Result<()> {
        if self.blocks == 0 || self.blocks > MAX_FLASH_BLOCKS {
            return Err(ImageError::InvalidGeometry("block count out of range"));
        }
        if self.write_time_us == 0 || self.write_time_us > MAX_WRITE_TIME_US {
            return Err(ImageError::InvalidGeometry("write time out of range"));
        }
        Ok(())
    }
}

fn write_words<W: Write>(out: &mut W, words: &[u32]) -> Result<()> {
    for word in words {
        out.write_all(&word.to_le_bytes())?;
    }
    Ok(())
}

/// Create an empty disk image: magic, geometry header, then
/// `cyl * head * sect` zeroed sectors.
pub fn create_disk_image<W: Write>(out: &mut W, geometry: &DiskGeometry) -> Result<()> {
    geometry.validate()?;
    write_words(
        out,
        &[
            DISK_FILE_ID,
            geometry.cylinders,
            geometry.heads,
            geometry.sectors,
            geometry.rotation_time_us,
            geometry.seek_time_us,
            geometry.data_pct,
        ],
    )?;

    let zero = [0u8; BLOCK_SIZE_BYTES];
    for _ in 0..geometry.total_sectors() {
        out.write_all(&zero)?;
    }
    out.flush()?;
    Ok(())
}

/// Create a flash image holding `payload`, split into blocks and zero-padded
/// to the device size.
///
/// A payload that begins with the kernel-core magic has that first word
/// stripped so the remaining data stays word-aligned within the blocks. A
/// payload larger than the device is an error; the destination contents are
/// unspecified in that case.
pub fn create_flash_image<W: Write, R: Read>(
    out: &mut W,
    geometry: &FlashGeometry,
    mut payload: R,
) -> Result<()> {
    geometry.validate()?;
    write_words(out, &[FLASH_FILE_ID, geometry.blocks, geometry.write_time_us])?;

    // Peek at the first word to detect (and strip) a core-file tag.
    let mut head = [0u8; 4];
    let mut head_len = 0;
    while head_len < 4 {
        let n = payload.read(&mut head[head_len..])?;
        if n == 0 {
            break;
        }
        head_len += n;
    }
    let mut pending: Vec<u8> = if head_len == 4 && u32::from_le_bytes(head) == CORE_FILE_ID {
        Vec::new()
    } else {
        head[..head_len].to_vec()
    };

    let mut block = vec![0u8; BLOCK_SIZE_BYTES];
    for _ in 0..geometry.blocks {
        block.fill(0);
        let mut filled = pending.len().min(BLOCK_SIZE_BYTES);
        block[..filled].copy_from_slice(&pending[..filled]);
        pending.drain(..filled);
        while filled < BLOCK_SIZE_BYTES {
            let n = payload.read(&mut block[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.write_all(&block)?;
    }

    // Anything left in the payload did not fit.
    if !pending.is_empty() || payload.read(&mut head)? != 0 {
        return Err(ImageError::PayloadTooLarge {
            blocks: geometry.blocks,
        });
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, DiskParams, FlashParams, BLOCK_WORDS, WORD_SIZE};
    use std::io::Cursor;

    #[test]
    fn new_disk_image_opens_with_matching_params() {
        let geometry = DiskGeometry::default();
        let mut image = Cursor::new(Vec::new());
        create_disk_image(&mut image, &geometry).unwrap();

        let expected_len =
            (7 * WORD_SIZE) as u64 + geometry.total_sectors() * BLOCK_SIZE_BYTES as u64;
        assert_eq!(image.get_ref().len() as u64, expected_len);

        let (params, data_start) = DiskParams::read(&mut image).unwrap();
        assert_eq!(data_start, 7);
        assert_eq!(params.cylinders, geometry.cylinders);
        assert_eq!(params.rotation_time_us, geometry.rotation_time_us);
    }

    #[test]
    fn disk_geometry_bounds_are_enforced() {
        let mut bad = DiskGeometry::default();
        bad.cylinders = 0;
        let mut out = Cursor::new(Vec::new());
        assert!(create_disk_image(&mut out, &bad).is_err());

        bad = DiskGeometry::default();
        bad.data_pct = 95;
        assert!(create_disk_image(&mut out, &bad).is_err());
    }

    #[test]
    fn flash_image_splits_payload_into_blocks() {
        let geometry = FlashGeometry {
            blocks: 3,
            write_time_us: 1000,
        };
        // One and a half blocks of patterned payload.
        let payload: Vec<u8> = (0..BLOCK_SIZE_BYTES + BLOCK_SIZE_BYTES / 2)
            .map(|i| (i % 251) as u8)
            .collect();

        let mut image = Cursor::new(Vec::new());
        create_flash_image(&mut image, &geometry, Cursor::new(payload.clone())).unwrap();

        let (params, data_start) = FlashParams::read(&mut image).unwrap();
        assert_eq!(params.blocks, 3);

        let mut blk = Block::new();
        blk.read_from(&mut image, params.block_byte_offset(data_start, 0))
            .unwrap();
        assert_eq!(
            blk.word(0),
            u32::from_le_bytes(payload[0..4].try_into().unwrap())
        );

        // Tail of block 1 and all of block 2 are zero-filled.
        blk.read_from(&mut image, params.block_byte_offset(data_start, 1))
            .unwrap();
        assert_eq!(blk.word(BLOCK_WORDS - 1), 0);
        blk.read_from(&mut image, params.block_byte_offset(data_start, 2))
            .unwrap();
        assert_eq!(blk.word(0), 0);
    }

    #[test]
    fn flash_image_strips_core_tag() {
        let geometry = FlashGeometry {
            blocks: 1,
            write_time_us: 1000,
        };
        let mut payload = CORE_FILE_ID.to_le_bytes().to_vec();
        payload.extend_from_slice(&0xCAFE_F00Du32.to_le_bytes());

        let mut image = Cursor::new(Vec::new());
        create_flash_image(&mut image, &geometry, Cursor::new(payload)).unwrap();

        let (params, data_start) = FlashParams::read(&mut image).unwrap();
        let mut blk = Block::new();
        blk.read_from(&mut image, params.block_byte_offset(data_start, 0))
            .unwrap();
        assert_eq!(blk.word(0), 0xCAFE_F00D);
    }

    #[test]
    fn flash_payload_must_fit() {
        let geometry = FlashGeometry {
            blocks: 1,
            write_time_us: 1000,
        };
        let payload = vec![0xAAu8; BLOCK_SIZE_BYTES + 1];
        let mut image = Cursor::new(Vec::new());
        assert!(matches!(
            create_flash_image(&mut image, &geometry, Cursor::new(payload)),
            Err(ImageError::PayloadTooLarge { .. })
        ));
    }
}
