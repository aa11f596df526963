/// RAM-backed block device.
///
/// Simulates a sector device entirely in memory. Used by the unit tests
/// (the ext2 tests mount hand-built disk images through it) and usable as
/// a ramdisk backing store before a real device is probed.
use alloc::vec;
use alloc::vec::Vec;

use crate::errno::{Errno, KResult};
use crate::mem::DmaBuf;

use super::block_device::{BlockDevice, SECTOR_SIZE};

pub struct RamDisk {
    data: Vec<u8>,
    sectors: u64,
    flush_count: u64,
}

impl RamDisk {
    /// Create a zeroed RAM disk with `sectors` 512-byte sectors.
    pub fn new(sectors: u64) -> Self {
        Self {
            data: vec![0u8; sectors as usize * SECTOR_SIZE],
            sectors,
            flush_count: 0,
        }
    }

    /// Wrap an existing disk image. The image is padded with zeros up to
    /// the next sector boundary.
    pub fn from_image(mut image: Vec<u8>) -> Self {
        let rem = image.len() % SECTOR_SIZE;
        if rem != 0 {
            image.resize(image.len() + SECTOR_SIZE - rem, 0);
        }
        let sectors = (image.len() / SECTOR_SIZE) as u64;
        Self {
            data: image,
            sectors,
            flush_count: 0,
        }
    }

    /// How many times flush() was called (for testing).
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// Read raw bytes at an offset (for test verification).
    pub fn read_raw(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    fn byte_range(&self, sector: u64, count: u32) -> KResult<(usize, usize)> {
        let start = sector as usize * SECTOR_SIZE;
        let len = count as usize * SECTOR_SIZE;
        if start + len > self.data.len() {
            return Err(Errno::Io);
        }
        Ok((start, len))
    }
}

impl BlockDevice for RamDisk {
    fn read_sectors(&mut self, sector: u64, count: u32, buf: &mut DmaBuf) -> KResult<u32> {
        let (start, len) = self.byte_range(sector, count)?;
        if buf.len() < len {
            return Err(Errno::Invalid);
        }
        buf.as_mut_slice()[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(count)
    }

    fn write_sectors(&mut self, sector: u64, count: u32, buf: &DmaBuf) -> KResult<u32> {
        let (start, len) = self.byte_range(sector, count)?;
        if buf.len() < len {
            return Err(Errno::Invalid);
        }
        self.data[start..start + len].copy_from_slice(&buf.as_slice()[..len]);
        Ok(count)
    }

    fn flush(&mut self) -> KResult<()> {
        self.flush_count += 1;
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        self.sectors
    }
}
