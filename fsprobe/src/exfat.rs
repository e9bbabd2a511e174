//! exFAT detection and used-block map via the single allocation-bitmap entry
//! found by walking the root directory.

use blockdev::BlockDevice;
use log::trace;

use crate::le::{bitset_is_set, read_u16, read_u32, read_u64, read_u8};
use crate::types::FileSystemType;

const BOOT_SECTOR_SIZE: usize = 1024;
const EXFAT_MAGIC: u16 = 0xAA55;
const OFF_BOOT_SIGNATURE: usize = 1024 - 2;

const OFF_PARTITION_LENGTH: usize = 64;
const OFF_CLUSTER_HEAP_OFFSET: usize = 88;
const OFF_CLUSTER_COUNT: usize = 92;
const OFF_ROOT_DIRECTORY_CLUSTER: usize = 96;
const OFF_BYTES_PER_SECTOR_SHIFT: usize = 108;
const OFF_SECTORS_PER_CLUSTER_SHIFT: usize = 109;
const OFF_FAT_COUNT: usize = 110;

const CLUSTER_BASE_INDEX: u32 = 2;

const ENTRY_SIZE: usize = 32;
const ENTRY_TYPE_MASK: u8 = 0x1F;
const ENTRY_TYPE_BITMAP: u8 = 0x01;

pub struct ExFatHandle {
    pub fs_type: FileSystemType,
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    cluster_heap_offset: u64,
    cluster_count: u32,
    cluster_bitmap: Vec<u8>,
}

struct BootInfo {
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    total_sectors: u64,
    cluster_heap_offset: u32,
    cluster_count: u32,
    root_directory_cluster: u32,
    fat_count: u8,
}

fn read_boot_sector(device: &mut dyn BlockDevice) -> Option<BootInfo> {
    let mut boot = [0u8; BOOT_SECTOR_SIZE];
    device.read_at(0, &mut boot).ok()?;

    if read_u16(&boot, OFF_BOOT_SIGNATURE) != EXFAT_MAGIC {
        return None;
    }

    let bytes_per_sector = 1u32 << read_u8(&boot, OFF_BYTES_PER_SECTOR_SHIFT);
    let sectors_per_cluster = 1u32 << read_u8(&boot, OFF_SECTORS_PER_CLUSTER_SHIFT);
    let total_sectors = read_u64(&boot, OFF_PARTITION_LENGTH);
    let cluster_heap_offset = read_u32(&boot, OFF_CLUSTER_HEAP_OFFSET);
    let cluster_count = read_u32(&boot, OFF_CLUSTER_COUNT);
    let root_directory_cluster = read_u32(&boot, OFF_ROOT_DIRECTORY_CLUSTER);
    let fat_count = read_u8(&boot, OFF_FAT_COUNT);

    if bytes_per_sector < 512
        || bytes_per_sector % 512 != 0
        || sectors_per_cluster == 0
        || fat_count == 0
        || total_sectors <= (1024 * 1024) / bytes_per_sector as u64
        || cluster_count >= 0xFFFF_FFF5
    {
        return None;
    }

    Some(BootInfo {
        bytes_per_sector,
        sectors_per_cluster,
        total_sectors,
        cluster_heap_offset,
        cluster_count,
        root_directory_cluster,
        fat_count,
    })
}

impl ExFatHandle {
    pub fn probe(device: &mut dyn BlockDevice) -> Option<ExFatHandle> {
        let info = read_boot_sector(device)?;

        let cluster_to_sector =
            |cluster: u32| (cluster as u64) * info.sectors_per_cluster as u64;
        let sector_to_offset =
            |sector: u64| sector * info.bytes_per_sector as u64;

        let root_dir_offset = sector_to_offset(
            info.cluster_heap_offset as u64
                + cluster_to_sector(info.root_directory_cluster - CLUSTER_BASE_INDEX),
        );

        let mut handle = ExFatHandle {
            fs_type: FileSystemType::ExFat,
            bytes_per_sector: info.bytes_per_sector,
            sectors_per_cluster: info.sectors_per_cluster,
            cluster_heap_offset: info.cluster_heap_offset as u64,
            cluster_count: info.cluster_count,
            cluster_bitmap: vec![0u8; ((info.cluster_count + 7) / 8) as usize],
        };

        if !handle.read_cluster_bitmap(device, root_dir_offset) {
            return None;
        }

        Some(handle)
    }

    /// Walk the root directory entries looking for the allocation-bitmap
    /// entry, then read the bitmap it points to.
    fn read_cluster_bitmap(&mut self, device: &mut dyn BlockDevice, root_dir_offset: u64) -> bool {
        let mut entry = [0u8; ENTRY_SIZE];
        let mut offset = root_dir_offset;
        let mut bitmap_read = false;

        loop {
            if device.read_at(offset, &mut entry).is_err() {
                break;
            }
            let raw_type = entry[0];
            if raw_type == 0 {
                break;
            }

            if raw_type & ENTRY_TYPE_MASK == ENTRY_TYPE_BITMAP {
                let start_cluster = read_u32(&entry, 1 + 18);
                let size = read_u64(&entry, 1 + 18 + 4);
                let bitmap_offset = (self.cluster_heap_offset
                    + (start_cluster - CLUSTER_BASE_INDEX) as u64 * self.sectors_per_cluster as u64)
                    * self.bytes_per_sector as u64;

                let len = std::cmp::min(size as usize, self.cluster_bitmap.len());
                if device
                    .read_at(bitmap_offset, &mut self.cluster_bitmap[..len])
                    .is_ok()
                {
                    bitmap_read = true;
                }
            }

            offset += ENTRY_SIZE as u64;
        }

        bitmap_read
    }

    pub fn block_is_used(&mut self, device: &mut dyn BlockDevice, offset: u64) -> bool {
        let _ = device;
        let sector = offset / self.bytes_per_sector as u64;
        if sector < self.cluster_heap_offset {
            return true;
        }

        let cluster = CLUSTER_BASE_INDEX
            + ((sector - self.cluster_heap_offset) / self.sectors_per_cluster as u64) as u32;
        if cluster > self.cluster_count {
            trace!("exfat: cluster {cluster} beyond cluster count, assuming used");
            return true;
        }

        bitset_is_set(&self.cluster_bitmap, (cluster - CLUSTER_BASE_INDEX) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockdev::MemoryBlockDevice;

    fn build_exfat_image() -> Vec<u8> {
        let bytes_per_sector_shift = 9u8; // 512
        let sectors_per_cluster_shift = 0u8; // 1
        let bytes_per_sector = 1u32 << bytes_per_sector_shift;
        let cluster_heap_offset = 4u32; // sectors
        let cluster_count = 100u32;
        let root_directory_cluster = CLUSTER_BASE_INDEX; // cluster 2
        let fat_count = 1u8;
        let total_sectors = 10000u64;

        let mut image = vec![0u8; bytes_per_sector as usize * 4096];
        image[OFF_BOOT_SIGNATURE..OFF_BOOT_SIGNATURE + 2].copy_from_slice(&EXFAT_MAGIC.to_le_bytes());
        image[OFF_PARTITION_LENGTH..OFF_PARTITION_LENGTH + 8]
            .copy_from_slice(&total_sectors.to_le_bytes());
        image[OFF_CLUSTER_HEAP_OFFSET..OFF_CLUSTER_HEAP_OFFSET + 4]
            .copy_from_slice(&cluster_heap_offset.to_le_bytes());
        image[OFF_CLUSTER_COUNT..OFF_CLUSTER_COUNT + 4].copy_from_slice(&cluster_count.to_le_bytes());
        image[OFF_ROOT_DIRECTORY_CLUSTER..OFF_ROOT_DIRECTORY_CLUSTER + 4]
            .copy_from_slice(&root_directory_cluster.to_le_bytes());
        image[OFF_BYTES_PER_SECTOR_SHIFT] = bytes_per_sector_shift;
        image[OFF_SECTORS_PER_CLUSTER_SHIFT] = sectors_per_cluster_shift;
        image[OFF_FAT_COUNT] = fat_count;

        // Root directory lives at cluster_heap_offset sectors in (cluster 2 is the base index).
        let root_dir_offset = cluster_heap_offset as usize * bytes_per_sector as usize;
        let bitmap_entry_off = root_dir_offset;
        image[bitmap_entry_off] = ENTRY_TYPE_BITMAP | 0x80;
        let bitmap_start_cluster = 3u32; // one cluster past root dir
        image[bitmap_entry_off + 1 + 18..bitmap_entry_off + 1 + 18 + 4]
            .copy_from_slice(&bitmap_start_cluster.to_le_bytes());
        let bitmap_size = ((cluster_count + 7) / 8) as u64;
        image[bitmap_entry_off + 1 + 18 + 4..bitmap_entry_off + 1 + 18 + 4 + 8]
            .copy_from_slice(&bitmap_size.to_le_bytes());

        // End-of-directory marker.
        image[bitmap_entry_off + ENTRY_SIZE] = 0;

        // Bitmap storage at cluster 3 => sector cluster_heap_offset + 1.
        let bitmap_off = (cluster_heap_offset as usize + 1) * bytes_per_sector as usize;
        image[bitmap_off] = 0b0000_0001; // cluster 2 (bit 0) used

        image
    }

    #[test]
    fn detects_exfat_and_reads_bitmap() {
        let image = build_exfat_image();
        let mut dev = MemoryBlockDevice::new(image);
        let handle = ExFatHandle::probe(&mut dev);
        assert!(handle.is_some());
    }

    #[test]
    fn cluster_bitmap_bit_zero_marks_root_cluster_used() {
        let image = build_exfat_image();
        let mut dev = MemoryBlockDevice::new(image);
        let mut handle = ExFatHandle::probe(&mut dev).unwrap();
        let cluster_heap_byte_offset = 4 * 512u64;
        assert!(handle.block_is_used(&mut dev, cluster_heap_byte_offset));
    }

    #[test]
    fn sector_before_cluster_heap_is_used() {
        let image = build_exfat_image();
        let mut dev = MemoryBlockDevice::new(image);
        let mut handle = ExFatHandle::probe(&mut dev).unwrap();
        assert!(handle.block_is_used(&mut dev, 0));
    }
}
