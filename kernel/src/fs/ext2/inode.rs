/// Inode fetch, block mapping and file reads.
use crate::errno::{Errno, KResult};

use super::disk::{
    Inode, EXT2_DIND_BLOCK, EXT2_IND_BLOCK, EXT2_NDIR_BLOCKS,
};
use super::Ext2Filesystem;

impl Ext2Filesystem {
    /// Fetch inode `ino` from its group's inode table.
    ///
    /// Inode numbers are 1-based; 0 is invalid and numbers beyond the
    /// superblock's total count are out of range (distinct error codes).
    pub fn read_inode(&self, ino: u32) -> KResult<Inode> {
        if ino == 0 {
            return Err(Errno::Invalid);
        }
        if ino > self.inodes_count() {
            return Err(Errno::BadInode);
        }

        let inodes_per_group = self.superblock().s_inodes_per_group;
        let group = (ino - 1) / inodes_per_group;
        let index = (ino - 1) % inodes_per_group;
        let table_block = self.group(group)?.bg_inode_table;

        // Byte offset of the record inside the inode table, then the one
        // block covering it. Inode sizes divide the block size, so a
        // record never straddles blocks.
        let byte_off = index as u64 * self.inode_record_size() as u64;
        let block = table_block + (byte_off / self.block_size() as u64) as u32;
        let within = (byte_off % self.block_size() as u64) as usize;

        let mut buf = self.block_buf()?;
        self.read_block(block, &mut buf)?;

        let inode = unsafe { core::ptr::read(buf.as_ptr().add(within) as *const Inode) };
        Ok(inode)
    }

    /// Read up to `buf.len()` bytes of file data starting at byte
    /// `offset`, clamped to the inode's recorded size. Reads at or past
    /// end of file return 0, never an error.
    pub fn read_file(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let size = inode.i_size as u64;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((size - offset) as usize);

        let bs = self.block_size() as u64;
        let mut block_buf = self.block_buf()?;
        let mut done = 0usize;

        while done < want {
            let pos = offset + done as u64;
            let file_block = (pos / bs) as u32;
            let within = (pos % bs) as usize;
            let chunk = (want - done).min(bs as usize - within);

            let disk_block = self.map_file_block(inode, file_block)?;
            if disk_block == 0 {
                // Hole: unallocated block inside the file reads as zeros.
                buf[done..done + chunk].fill(0);
            } else {
                self.read_block(disk_block, &mut block_buf)?;
                buf[done..done + chunk]
                    .copy_from_slice(&block_buf.as_slice()[within..within + chunk]);
            }
            done += chunk;
        }

        Ok(want)
    }

    /// Translate a file-relative block index into a disk block number via
    /// the inode's block pointer table. Returns 0 for holes.
    pub(super) fn map_file_block(&self, inode: &Inode, index: u32) -> KResult<u32> {
        // Block pointers per indirect block.
        let ptrs = self.block_size() / 4;

        if index < EXT2_NDIR_BLOCKS {
            return Ok(inode.i_block[index as usize]);
        }

        let index = index - EXT2_NDIR_BLOCKS;
        if index < ptrs {
            return self.indirect_entry(inode.i_block[EXT2_IND_BLOCK], index);
        }

        let index = index - ptrs;
        if (index as u64) < ptrs as u64 * ptrs as u64 {
            let first = self.indirect_entry(inode.i_block[EXT2_DIND_BLOCK], index / ptrs)?;
            return self.indirect_entry(first, index % ptrs);
        }

        // Triple-indirect files exceed what this driver serves.
        Err(Errno::NotSupported)
    }

    /// Read entry `index` of the block-pointer table stored in
    /// `table_block`. A zero table block is a hole at this level, so every
    /// block under it is a hole too.
    fn indirect_entry(&self, table_block: u32, index: u32) -> KResult<u32> {
        if table_block == 0 {
            return Ok(0);
        }
        let mut buf = self.block_buf()?;
        self.read_block(table_block, &mut buf)?;
        let entry =
            unsafe { core::ptr::read((buf.as_ptr() as *const u32).add(index as usize)) };
        Ok(entry)
    }
}
