//! ReiserFS 3.5/3.6 detection and used-block map via per-bitmap-block caching.
//!
//! ReiserFS 4 is recognized by its magic string but carries no free-space
//! map here: its on-disk block allocation structures differ enough from 3.5/3.6
//! that `block_is_used` is not implemented for it, matching the detect-only
//! treatment of a filesystem we don't otherwise support.

use blockdev::BlockDevice;

use crate::le::{bitset_is_set, read_u32};
use crate::types::FileSystemType;

const SUPER_BLOCK_OFFSET: u64 = 64 * 1024;
const SUPER_BLOCK_SIZE: usize = 204;

const OFF_BLOCK_COUNT: usize = 0;
const OFF_BLOCK_SIZE: usize = 44;
const OFF_MAGIC_STRING: usize = 52;

const MAGIC_V1: &[u8] = b"ReIsErFs";
const MAGIC_V2: &[u8] = b"ReIsEr2Fs";
const MAGIC_V3: &[u8] = b"ReIsEr3Fs";
const MAGIC_V4: &[u8] = b"ReIsEr4";

/// First 17 blocks (boot area + super-block) are never part of the bitmap.
const FIRST_BITMAPPED_BLOCK: u32 = 17;

pub struct ReiserFsHandle {
    pub fs_type: FileSystemType,
    block_size: u64,
    total_blocks: u32,
    cached_bitmap_index: Option<u32>,
    cached_bitmap: Vec<u8>,
}

fn starts_with(field: &[u8], magic: &[u8]) -> bool {
    field.len() >= magic.len() && &field[..magic.len()] == magic
}

impl ReiserFsHandle {
    pub fn probe(device: &mut dyn BlockDevice) -> Option<ReiserFsHandle> {
        let mut super_block = [0u8; SUPER_BLOCK_SIZE];
        device.read_at(SUPER_BLOCK_OFFSET, &mut super_block).ok()?;

        let magic_field = &super_block[OFF_MAGIC_STRING..OFF_MAGIC_STRING + 12];
        let fs_type = if starts_with(magic_field, MAGIC_V1) {
            FileSystemType::ReiserFs3_5
        } else if starts_with(magic_field, MAGIC_V2) || starts_with(magic_field, MAGIC_V3) {
            FileSystemType::ReiserFs3_6
        } else if starts_with(magic_field, MAGIC_V4) {
            FileSystemType::ReiserFs4
        } else {
            return None;
        };

        let total_blocks = read_u32(&super_block, OFF_BLOCK_COUNT);
        let block_size = read_u32(&super_block, OFF_BLOCK_SIZE) as u64;

        if block_size < 512 || block_size % 512 != 0 || total_blocks == 0 {
            return None;
        }

        Some(ReiserFsHandle {
            fs_type,
            block_size,
            total_blocks,
            cached_bitmap_index: None,
            cached_bitmap: vec![0u8; block_size as usize],
        })
    }

    /// Only meaningful for 3.5/3.6; ReiserFS 4 is detected but has no
    /// supported free-space map, so every block reports used.
    pub fn block_is_used(&mut self, device: &mut dyn BlockDevice, offset: u64) -> bool {
        if self.fs_type == FileSystemType::ReiserFs4 {
            return true;
        }

        let block = (offset / self.block_size) as u32;
        if block >= self.total_blocks {
            return true;
        }
        if block < FIRST_BITMAPPED_BLOCK {
            return true;
        }

        let bits_per_bitmap_block = (self.block_size * 8) as u32;
        let bitmap_index = block / bits_per_bitmap_block;

        if self.cached_bitmap_index != Some(bitmap_index) {
            let bitmap_block = if bitmap_index > 0 {
                bitmap_index * bits_per_bitmap_block
            } else {
                (SUPER_BLOCK_OFFSET / self.block_size) as u32 + 1
            };
            let read_offset = bitmap_block as u64 * self.block_size;
            if device.read_at(read_offset, &mut self.cached_bitmap).is_err() {
                return true;
            }
            self.cached_bitmap_index = Some(bitmap_index);
        }

        let index = (block - bitmap_index * bits_per_bitmap_block) as u64;
        bitset_is_set(&self.cached_bitmap, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockdev::MemoryBlockDevice;

    fn build_reiserfs_image(block30_bit_set: bool) -> Vec<u8> {
        let block_size = 4096u32;
        let total_blocks = 1000u32;
        let mut image = vec![0u8; block_size as usize * 40];

        let sb_off = SUPER_BLOCK_OFFSET as usize;
        image[sb_off + OFF_BLOCK_COUNT..sb_off + OFF_BLOCK_COUNT + 4]
            .copy_from_slice(&total_blocks.to_le_bytes());
        image[sb_off + OFF_BLOCK_SIZE..sb_off + OFF_BLOCK_SIZE + 4]
            .copy_from_slice(&block_size.to_le_bytes());
        image[sb_off + OFF_MAGIC_STRING..sb_off + OFF_MAGIC_STRING + MAGIC_V1.len()]
            .copy_from_slice(MAGIC_V1);

        // bitmapIndex 0 => bitmap block = SUPER_BLOCK_OFFSET/blockSize + 1 = 17.
        let bitmap_block = (SUPER_BLOCK_OFFSET / block_size as u64) as usize + 1;
        let bitmap_off = bitmap_block * block_size as usize;
        if block30_bit_set {
            // block 30 => index 30 within this bitmap (block 30 < bits_per_bitmap_block).
            image[bitmap_off + 30 / 8] |= 1 << (30 % 8);
        }
        image
    }

    #[test]
    fn detects_reiserfs_3_5() {
        let image = build_reiserfs_image(false);
        let mut dev = MemoryBlockDevice::new(image);
        let handle = ReiserFsHandle::probe(&mut dev).unwrap();
        assert_eq!(handle.fs_type, FileSystemType::ReiserFs3_5);
    }

    #[test]
    fn blocks_before_first_bitmapped_block_are_used() {
        let image = build_reiserfs_image(false);
        let mut dev = MemoryBlockDevice::new(image);
        let mut handle = ReiserFsHandle::probe(&mut dev).unwrap();
        assert!(handle.block_is_used(&mut dev, 0));
    }

    #[test]
    fn bitmap_bit_controls_block_30() {
        let offset = 30u64 * 4096;

        let image_clear = build_reiserfs_image(false);
        let mut dev = MemoryBlockDevice::new(image_clear);
        let mut handle = ReiserFsHandle::probe(&mut dev).unwrap();
        assert!(!handle.block_is_used(&mut dev, offset));

        let image_set = build_reiserfs_image(true);
        let mut dev = MemoryBlockDevice::new(image_set);
        let mut handle = ReiserFsHandle::probe(&mut dev).unwrap();
        assert!(handle.block_is_used(&mut dev, offset));
    }

    #[test]
    fn reiserfs4_has_no_free_space_map() {
        let block_size = 4096u32;
        let total_blocks = 1000u32;
        let mut image = vec![0u8; block_size as usize * 40];
        let sb_off = SUPER_BLOCK_OFFSET as usize;
        image[sb_off + OFF_BLOCK_COUNT..sb_off + OFF_BLOCK_COUNT + 4]
            .copy_from_slice(&total_blocks.to_le_bytes());
        image[sb_off + OFF_BLOCK_SIZE..sb_off + OFF_BLOCK_SIZE + 4]
            .copy_from_slice(&block_size.to_le_bytes());
        image[sb_off + OFF_MAGIC_STRING..sb_off + OFF_MAGIC_STRING + MAGIC_V4.len()]
            .copy_from_slice(MAGIC_V4);

        let mut dev = MemoryBlockDevice::new(image);
        let mut handle = ReiserFsHandle::probe(&mut dev).unwrap();
        assert_eq!(handle.fs_type, FileSystemType::ReiserFs4);
        assert!(handle.block_is_used(&mut dev, 30 * 4096));
    }
}
