//! ext2/ext3/ext4 detection and used-block map.
//!
//! Layout offsets below follow the on-disk ext2 super-block and group
//! descriptor exactly (1024-byte super-block at byte offset 1024, 32-byte
//! ext2/3 group descriptors, optional 64-byte ext4 group descriptors).

use blockdev::BlockDevice;
use log::trace;

use crate::le::{bitset_is_set, low_high_to_u64, read_u16, read_u32};
use crate::types::FileSystemType;

const SUPER_BLOCK_OFFSET: u64 = 1024;
const SUPER_BLOCK_SIZE: usize = 1024;
const EXT2_SUPER_MAGIC: u16 = 0xEF53;
const REVISION_DYNAMIC: u32 = 1;

const OFF_BLOCKS_COUNT: usize = 4;
const OFF_FIRST_DATA_BLOCK: usize = 20;
const OFF_LOG_BLOCK_SIZE: usize = 24;
const OFF_BLOCKS_PER_GROUP: usize = 32;
const OFF_MAGIC: usize = 56;
const OFF_REVISION_LEVEL: usize = 76;
const OFF_FEATURE_COMPAT: usize = 92;
const OFF_FEATURE_INCOMPAT: usize = 96;
const OFF_GROUP_DESCRIPTOR_SIZE: usize = 254;
const OFF_BLOCKS_COUNT_HIGH: usize = 336;

const EXT2_FEATURE_COMPAT_SUPP: u32 = 0x0001 | 0x0002 | 0x0008 | 0x0010 | 0x0020;
const EXT2_FEATURE_INCOMPAT_SUPP: u32 = 0x0002 | 0x0010;

const EXT3_FEATURE_COMPAT_SUPP: u32 = 0x0001 | 0x0002 | 0x0004 | 0x0008 | 0x0010 | 0x0020;
const EXT3_FEATURE_INCOMPAT_SUPP: u32 = 0x0002 | 0x0004 | 0x0010;

const EXT4_FEATURE_COMPAT_SUPP: u32 = 0x0001 | 0x0002 | 0x0004 | 0x0008 | 0x0010 | 0x0020;
const EXT4_FEATURE_INCOMPAT_SUPP: u32 =
    0x0002 | 0x0004 | 0x0010 | 0x0040 | 0x0080 | 0x0100 | 0x0200;
const EXT4_FEATURE_INCOMPAT_64BIT: u32 = 0x0080;

const GROUP_DESC_SIZE_23: usize = 32;
const EXT4_MAX_GROUP_DESCRIPTOR_SIZE: u16 = 1024;

pub struct ExtHandle {
    pub fs_type: FileSystemType,
    block_size: u64,
    first_data_block: u64,
    blocks_per_group: u64,
    bitmap_blocks: Vec<u64>,
    cached_bitmap_index: Option<u64>,
    cached_bitmap: Vec<u8>,
}

impl ExtHandle {
    /// Try to detect an ext2/3/4 filesystem. Any I/O failure or signature
    /// mismatch means "not this filesystem" — returns `None` cleanly.
    pub fn probe(device: &mut dyn BlockDevice) -> Option<ExtHandle> {
        let mut super_block = [0u8; SUPER_BLOCK_SIZE];
        device.read_at(SUPER_BLOCK_OFFSET, &mut super_block).ok()?;

        if read_u16(&super_block, OFF_MAGIC) != EXT2_SUPER_MAGIC {
            return None;
        }

        let feature_compat = read_u32(&super_block, OFF_FEATURE_COMPAT);
        let feature_incompat = read_u32(&super_block, OFF_FEATURE_INCOMPAT);
        let revision_level = read_u32(&super_block, OFF_REVISION_LEVEL);

        let fs_type = if (feature_compat & !EXT2_FEATURE_COMPAT_SUPP == 0)
            && (feature_incompat & !EXT2_FEATURE_INCOMPAT_SUPP == 0)
        {
            FileSystemType::Ext2
        } else if revision_level == REVISION_DYNAMIC
            && (feature_compat & !EXT3_FEATURE_COMPAT_SUPP == 0)
            && (feature_incompat & !EXT3_FEATURE_INCOMPAT_SUPP == 0)
        {
            FileSystemType::Ext3
        } else if revision_level == REVISION_DYNAMIC
            && (feature_compat & !EXT4_FEATURE_COMPAT_SUPP == 0)
            && (feature_incompat & !EXT4_FEATURE_INCOMPAT_SUPP == 0)
        {
            FileSystemType::Ext4
        } else {
            return None;
        };

        let log_block_size = read_u32(&super_block, OFF_LOG_BLOCK_SIZE);
        if log_block_size > 6 {
            return None;
        }
        let block_size = 1024u64 << log_block_size;

        let first_data_block = read_u32(&super_block, OFF_FIRST_DATA_BLOCK) as u64;
        let blocks_per_group = read_u32(&super_block, OFF_BLOCKS_PER_GROUP) as u64;

        let group_descriptor_size: usize = match fs_type {
            FileSystemType::Ext4 if feature_incompat & EXT4_FEATURE_INCOMPAT_64BIT != 0 => {
                let size = read_u16(&super_block, OFF_GROUP_DESCRIPTOR_SIZE);
                if size == 0 || size > EXT4_MAX_GROUP_DESCRIPTOR_SIZE {
                    return None;
                }
                size as usize
            }
            _ => GROUP_DESC_SIZE_23,
        };

        let total_blocks = low_high_to_u64(
            read_u32(&super_block, OFF_BLOCKS_COUNT),
            read_u32(&super_block, OFF_BLOCKS_COUNT_HIGH),
        );

        if blocks_per_group == 0 || total_blocks == 0 {
            return None;
        }
        if !((block_size <= 1024 && first_data_block == 1)
            || (block_size > 1024 && first_data_block == 0))
        {
            return None;
        }

        let group_count = (total_blocks + blocks_per_group - 1) / blocks_per_group;
        let mut bitmap_blocks = Vec::with_capacity(group_count as usize);
        let descriptors_base = (first_data_block + 1) * block_size;
        let mut descriptor = vec![0u8; group_descriptor_size];
        for i in 0..group_count {
            let offset = descriptors_base + i * group_descriptor_size as u64;
            device.read_at(offset, &mut descriptor).ok()?;
            let block_bitmap_low = read_u32(&descriptor, 0);
            let block_bitmap_high = if group_descriptor_size >= 36 {
                read_u32(&descriptor, 32)
            } else {
                0
            };
            bitmap_blocks.push(low_high_to_u64(block_bitmap_low, block_bitmap_high));
        }

        Some(ExtHandle {
            fs_type,
            block_size,
            first_data_block,
            blocks_per_group,
            bitmap_blocks,
            cached_bitmap_index: None,
            cached_bitmap: vec![0u8; block_size as usize],
        })
    }

    /// `true` if the block covering `offset` is allocated. I/O failure after
    /// a successful probe degrades to "used": reporting free space that is
    /// actually in use would corrupt a backup, the converse only wastes
    /// space.
    pub fn block_is_used(&mut self, device: &mut dyn BlockDevice, offset: u64) -> bool {
        let block = offset / self.block_size;
        if block < 1 {
            return true;
        }

        let block_offset = block - self.first_data_block;
        let bitmap_index = block_offset / self.blocks_per_group;
        if bitmap_index as usize >= self.bitmap_blocks.len() {
            return true;
        }

        if self.cached_bitmap_index != Some(bitmap_index) {
            let bitmap_block = self.bitmap_blocks[bitmap_index as usize];
            let read_offset = bitmap_block * self.block_size;
            if device.read_at(read_offset, &mut self.cached_bitmap).is_err() {
                trace!("ext: bitmap read failed at block {bitmap_block}, assuming used");
                return true;
            }
            self.cached_bitmap_index = Some(bitmap_index);
        }

        let index = block_offset - bitmap_index * self.blocks_per_group;
        bitset_is_set(&self.cached_bitmap, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockdev::MemoryBlockDevice;

    fn build_ext4_image(group_bitmap_bit63_set: bool) -> Vec<u8> {
        let block_size = 1024usize;
        let blocks_per_group = 8192u32;
        let total_blocks = 8192u32;
        // layout: block0 (boot), block1 (superblock), block2 (group desc), block3 (block bitmap)
        let mut image = vec![0u8; block_size * 8];

        let sb_off = 1024;
        image[sb_off + OFF_BLOCKS_COUNT..sb_off + OFF_BLOCKS_COUNT + 4]
            .copy_from_slice(&total_blocks.to_le_bytes());
        image[sb_off + OFF_FIRST_DATA_BLOCK..sb_off + OFF_FIRST_DATA_BLOCK + 4]
            .copy_from_slice(&1u32.to_le_bytes());
        image[sb_off + OFF_LOG_BLOCK_SIZE..sb_off + OFF_LOG_BLOCK_SIZE + 4]
            .copy_from_slice(&0u32.to_le_bytes());
        image[sb_off + OFF_BLOCKS_PER_GROUP..sb_off + OFF_BLOCKS_PER_GROUP + 4]
            .copy_from_slice(&blocks_per_group.to_le_bytes());
        image[sb_off + OFF_MAGIC..sb_off + OFF_MAGIC + 2]
            .copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
        image[sb_off + OFF_REVISION_LEVEL..sb_off + OFF_REVISION_LEVEL + 4]
            .copy_from_slice(&REVISION_DYNAMIC.to_le_bytes());
        image[sb_off + OFF_FEATURE_COMPAT..sb_off + OFF_FEATURE_COMPAT + 4]
            .copy_from_slice(&0u32.to_le_bytes());
        image[sb_off + OFF_FEATURE_INCOMPAT..sb_off + OFF_FEATURE_INCOMPAT + 4]
            .copy_from_slice(&0u32.to_le_bytes());

        // blockSize == 1024 => firstDataBlock == 1 (block 0 is the boot block, block 1 holds the
        // super-block), so the group descriptor table starts at block firstDataBlock+1 == 2.
        let desc_off = 2 * block_size; // block 2
        image[desc_off..desc_off + 4].copy_from_slice(&3u32.to_le_bytes()); // blockBitmap = block 3

        let bitmap_off = 3 * block_size;
        if group_bitmap_bit63_set {
            image[bitmap_off + 7] = 0x80; // bit 63
        }
        image
    }

    #[test]
    fn detects_ext_and_reads_bitmap() {
        let image = build_ext4_image(false);
        let mut dev = MemoryBlockDevice::new(image);
        let handle = ExtHandle::probe(&mut dev);
        assert!(handle.is_some());
    }

    #[test]
    fn block_zero_is_always_used() {
        let image = build_ext4_image(false);
        let mut dev = MemoryBlockDevice::new(image);
        let mut handle = ExtHandle::probe(&mut dev).unwrap();
        assert!(handle.block_is_used(&mut dev, 0));
    }

    #[test]
    fn bitmap_bit_controls_block_64() {
        // block 64 maps to blockOffset = 64 - firstDataBlock(1) = 63 = bit 63 of group 0's bitmap.
        let offset = 64 * 1024u64;

        let image_clear = build_ext4_image(false);
        let mut dev = MemoryBlockDevice::new(image_clear);
        let mut handle = ExtHandle::probe(&mut dev).unwrap();
        assert!(!handle.block_is_used(&mut dev, offset));

        let image_set = build_ext4_image(true);
        let mut dev = MemoryBlockDevice::new(image_set);
        let mut handle = ExtHandle::probe(&mut dev).unwrap();
        assert!(handle.block_is_used(&mut dev, offset));
    }
}
