/// Directory entry iteration: lookup and listing.
///
/// Directory data blocks hold packed variable-length records. A record
/// with inode 0 or an empty name is padding left by a deletion and is
/// skipped; `rec_len` always advances to the next record and covers the
/// tail of the block.
use crate::errno::{Errno, KResult};

use super::disk::{DirEntryHeader, Inode, DIR_ENTRY_HEADER_SIZE};
use super::Ext2Filesystem;

impl Ext2Filesystem {
    /// Find `name` in the directory `dir` and return its inode number.
    pub fn lookup(&self, dir: &Inode, name: &[u8]) -> KResult<u32> {
        let mut found = None;
        self.walk_dir(dir, &mut |entry_name, ino, _ftype| {
            if found.is_none() && entry_name == name {
                found = Some(ino);
            }
        })?;
        found.ok_or(Errno::NotFound)
    }

    /// Invoke `callback(name, inode, file_type)` for every valid entry of
    /// `dir`, in block order.
    pub fn list_dir(
        &self,
        dir: &Inode,
        callback: &mut dyn FnMut(&[u8], u32, u8),
    ) -> KResult<()> {
        self.walk_dir(dir, callback)
    }

    fn walk_dir(&self, dir: &Inode, callback: &mut dyn FnMut(&[u8], u32, u8)) -> KResult<()> {
        if !dir.is_dir() {
            return Err(Errno::NotDirectory);
        }

        let bs = self.block_size() as usize;
        let size = dir.i_size as u64;
        let blocks = (size + bs as u64 - 1) / bs as u64;
        let mut buf = self.block_buf()?;

        for file_block in 0..blocks as u32 {
            let disk_block = self.map_file_block(dir, file_block)?;
            if disk_block == 0 {
                continue;
            }
            self.read_block(disk_block, &mut buf)?;
            let data = buf.as_slice();

            let mut off = 0usize;
            while off + DIR_ENTRY_HEADER_SIZE <= bs {
                let header = unsafe {
                    core::ptr::read_unaligned(data.as_ptr().add(off) as *const DirEntryHeader)
                };
                let rec_len = header.rec_len as usize;
                // A record shorter than its header or overrunning the
                // block means the directory is damaged.
                if rec_len < DIR_ENTRY_HEADER_SIZE || off + rec_len > bs {
                    return Err(Errno::FsCorrupt);
                }

                let name_len = header.name_len as usize;
                if header.inode != 0 && name_len > 0 {
                    if DIR_ENTRY_HEADER_SIZE + name_len > rec_len {
                        return Err(Errno::FsCorrupt);
                    }
                    let name_start = off + DIR_ENTRY_HEADER_SIZE;
                    let name = &data[name_start..name_start + name_len];
                    callback(name, header.inode, header.file_type);
                }

                off += rec_len;
            }
        }

        Ok(())
    }
}
