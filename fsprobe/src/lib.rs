//! Used-block map: detect a filesystem on a raw block device and answer
//! whether the block covering a given byte offset is allocated.
//!
//! Supported filesystems: ext2/ext3/ext4, FAT12/FAT16/FAT32, exFAT, and
//! ReiserFS 3.5/3.6 (ReiserFS 4 is detected but has no free-space map).
//! Every probe degrades to "used" on I/O failure or out-of-range input —
//! reporting free space that is actually allocated would corrupt a backup,
//! the converse only wastes space.

mod exfat;
mod ext;
mod facade;
mod fat;
mod le;
mod reiserfs;
mod types;

pub use facade::FilesystemHandle;
pub use types::FileSystemType;
