//! Minimal seekable block device abstraction.
//!
//! The used-block-map probes in `fsprobe` only ever need three operations on
//! a raw device: seek to an absolute byte offset, read some bytes, and find
//! out how large the device is. Keeping that surface small lets the probes
//! be tested against an in-memory image as well as a real file or block
//! special file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};

/// Where a seek is relative to. Mirrors `std::io::SeekFrom` but keeps the
/// probes from depending on `std::io` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// A read-only, seekable block device.
pub trait BlockDevice {
    /// Total size of the device in bytes.
    fn size(&self) -> u64;

    /// Seek to `offset` relative to `origin`, returning the new absolute position.
    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64>;

    /// Read exactly `buf.len()` bytes starting at the current position.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Seek then read exactly `buf.len()` bytes.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(offset as i64, SeekOrigin::Start)?;
        self.read_exact(buf)
    }
}

/// A device backed by a regular file (or a block special file on Linux).
pub struct FileBlockDevice {
    file: File,
    size: u64,
}

impl FileBlockDevice {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("opening device {:?}", path.as_ref()))?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl BlockDevice for FileBlockDevice {
    fn size(&self) -> u64 {
        self.size
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        let pos = match origin {
            SeekOrigin::Start => SeekFrom::Start(offset as u64),
            SeekOrigin::Current => SeekFrom::Current(offset),
            SeekOrigin::End => SeekFrom::End(offset),
        };
        Ok(self.file.seek(pos)?)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        Read::read_exact(&mut self.file, buf)?;
        Ok(())
    }
}

/// An in-memory device, used by tests and by callers that already hold an
/// image (e.g. a loopback-mounted archive) in a buffer.
pub struct MemoryBlockDevice {
    data: Vec<u8>,
    pointer: usize,
}

impl MemoryBlockDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pointer: 0 }
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        let base = match origin {
            SeekOrigin::Start => 0i64,
            SeekOrigin::Current => self.pointer as i64,
            SeekOrigin::End => self.data.len() as i64,
        };
        let new_pos = base + offset;
        if new_pos < 0 {
            anyhow::bail!("seek before start of device");
        }
        self.pointer = new_pos as usize;
        Ok(self.pointer as u64)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self
            .pointer
            .checked_add(buf.len())
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| anyhow::anyhow!("read past end of device"))?;
        buf.copy_from_slice(&self.data[self.pointer..end]);
        self.pointer = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_device_round_trip() {
        let mut dev = MemoryBlockDevice::new((0u8..=255).collect());
        let mut buf = [0u8; 4];
        dev.read_at(10, &mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);
        assert_eq!(dev.size(), 256);
    }

    #[test]
    fn memory_device_read_past_end_fails() {
        let mut dev = MemoryBlockDevice::new(vec![0u8; 4]);
        let mut buf = [0u8; 8];
        assert!(dev.read_at(0, &mut buf).is_err());
    }
}
