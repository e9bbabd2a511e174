//! Autodetecting façade over the individual filesystem probes.

use blockdev::BlockDevice;

use crate::ext::ExtHandle;
use crate::exfat::ExFatHandle;
use crate::fat::FatHandle;
use crate::reiserfs::ReiserFsHandle;
use crate::types::FileSystemType;

enum Inner {
    Ext(ExtHandle),
    Fat(FatHandle),
    ExFat(ExFatHandle),
    ReiserFs(ReiserFsHandle),
}

/// A detected filesystem, bound to whichever probe matched.
///
/// Detection tries each probe in turn — ext, then FAT, then exFAT, then
/// ReiserFS — and keeps the first that recognizes the boot/super block.
/// None of the probes mutate the device; several probes matching the same
/// image would be a sign of a corrupt or synthetic image, not something
/// `init` tries to disambiguate further.
pub struct FilesystemHandle {
    inner: Inner,
}

impl FilesystemHandle {
    pub fn init(device: &mut dyn BlockDevice) -> Option<FilesystemHandle> {
        if let Some(handle) = ExtHandle::probe(device) {
            return Some(FilesystemHandle {
                inner: Inner::Ext(handle),
            });
        }
        if let Some(handle) = FatHandle::probe(device) {
            return Some(FilesystemHandle {
                inner: Inner::Fat(handle),
            });
        }
        if let Some(handle) = ExFatHandle::probe(device) {
            return Some(FilesystemHandle {
                inner: Inner::ExFat(handle),
            });
        }
        if let Some(handle) = ReiserFsHandle::probe(device) {
            return Some(FilesystemHandle {
                inner: Inner::ReiserFs(handle),
            });
        }
        None
    }

    pub fn fs_type(&self) -> FileSystemType {
        match &self.inner {
            Inner::Ext(h) => h.fs_type,
            Inner::Fat(h) => h.fs_type,
            Inner::ExFat(h) => h.fs_type,
            Inner::ReiserFs(h) => h.fs_type,
        }
    }

    pub fn block_is_used(&mut self, device: &mut dyn BlockDevice, offset: u64) -> bool {
        match &mut self.inner {
            Inner::Ext(h) => h.block_is_used(device, offset),
            Inner::Fat(h) => h.block_is_used(device, offset),
            Inner::ExFat(h) => h.block_is_used(device, offset),
            Inner::ReiserFs(h) => h.block_is_used(device, offset),
        }
    }

    /// No probe holds resources beyond its in-memory caches; kept for
    /// symmetry with `init` and for callers that want an explicit lifetime
    /// boundary around a scan.
    pub fn done(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockdev::MemoryBlockDevice;

    #[test]
    fn unrecognized_image_returns_none() {
        let mut dev = MemoryBlockDevice::new(vec![0u8; 4096]);
        assert!(FilesystemHandle::init(&mut dev).is_none());
    }
}
