/// ext2 write operations.
///
/// Write support is not implemented: block and inode allocation, bitmap
/// updates and directory insertion are still missing. Every operation
/// fails with `Errno::NotImplemented` so callers can tell this apart
/// from a device or format error.
use log::warn;

use crate::errno::{Errno, KResult};

use super::disk::Inode;
use super::Ext2Filesystem;

impl Ext2Filesystem {
    /// Write data to a file.
    pub fn write_file(
        &self,
        _inode: &Inode,
        _offset: u64,
        _data: &[u8],
    ) -> KResult<usize> {
        warn!("ext2: write_file not yet implemented");
        Err(Errno::NotImplemented)
    }

    /// Create a new file in a directory.
    pub fn create_file(&self, _dir: &Inode, _name: &[u8], _mode: u32) -> KResult<u32> {
        warn!("ext2: create_file not yet implemented");
        Err(Errno::NotImplemented)
    }

    /// Create a new directory.
    pub fn create_dir(&self, _dir: &Inode, _name: &[u8], _mode: u32) -> KResult<u32> {
        warn!("ext2: create_dir not yet implemented");
        Err(Errno::NotImplemented)
    }

    /// Remove a file from a directory.
    pub fn remove_file(&self, _dir: &Inode, _name: &[u8]) -> KResult<()> {
        warn!("ext2: remove_file not yet implemented");
        Err(Errno::NotImplemented)
    }

    /// Remove a directory.
    pub fn remove_dir(&self, _dir: &Inode, _name: &[u8]) -> KResult<()> {
        warn!("ext2: remove_dir not yet implemented");
        Err(Errno::NotImplemented)
    }
}
