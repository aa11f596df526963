/// ext2 filesystem driver, read side.
///
/// Interprets the on-disk format — superblock, block group descriptors,
/// inodes, directory entries — through the sector interface of a
/// [`BlockDevice`]. Nothing is cached beyond the mounted geometry: every
/// inode and data block is re-fetched from the device on use.
///
/// Write support is stubbed (see `write.rs`); the driver is read-only by
/// design for now.
pub mod disk;
pub mod vfs;

mod dir;
mod inode;
mod write;


use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{info, warn};
use spin::Mutex;

use crate::errno::{Errno, KResult};
use crate::mem::DmaBuf;
use crate::storage::{BlockDevice, SECTOR_SIZE};

use disk::{GroupDesc, Superblock, EXT2_MAX_BLOCK_SIZE, EXT2_MIN_BLOCK_SIZE, EXT2_SUPER_MAGIC};

pub use disk::{Inode, EXT2_FT_DIR, EXT2_FT_REG_FILE, EXT2_ROOT_INO};

/// Shared handle to the block device backing a mount.
pub type SharedBlockDevice = Arc<Mutex<dyn BlockDevice>>;

/// A mounted ext2 filesystem.
pub struct Ext2Filesystem {
    device: SharedBlockDevice,
    superblock: Box<Superblock>,
    group_desc: Vec<GroupDesc>,
    block_size: u32,
    num_groups: u32,
    inode_size: u32,
}

impl Ext2Filesystem {
    /// Mount the filesystem on `device`.
    ///
    /// Reads and validates the superblock, derives the geometry and loads
    /// the whole group descriptor table. Any validation or I/O failure
    /// fails the mount; partially read buffers are released on the way
    /// out by ownership.
    pub fn mount(device: SharedBlockDevice) -> KResult<Self> {
        // The superblock occupies bytes 1024..2048: sectors 2 and 3.
        let mut sb_buf = DmaBuf::alloc(disk::EXT2_SUPERBLOCK_SIZE).map_err(|_| Errno::NoMemory)?;
        let sb_sector = (disk::EXT2_SUPERBLOCK_OFFSET / SECTOR_SIZE) as u64;
        let sb_sectors = (disk::EXT2_SUPERBLOCK_SIZE / SECTOR_SIZE) as u32;
        let done = device
            .lock()
            .read_sectors(sb_sector, sb_sectors, &mut sb_buf)?;
        if done != sb_sectors {
            warn!("ext2: short read of superblock sectors");
            return Err(Errno::Io);
        }

        // DmaBuf memory is page-aligned, so the cast is sound.
        let superblock: Box<Superblock> =
            Box::new(unsafe { core::ptr::read(sb_buf.as_ptr() as *const Superblock) });

        if superblock.s_magic != EXT2_SUPER_MAGIC {
            warn!(
                "ext2: invalid magic {:#06x} (expected {:#06x})",
                superblock.s_magic, EXT2_SUPER_MAGIC
            );
            return Err(Errno::BadSuperblock);
        }

        let block_size = superblock.block_size();
        if !(EXT2_MIN_BLOCK_SIZE..=EXT2_MAX_BLOCK_SIZE).contains(&block_size) {
            warn!("ext2: invalid block size {}", block_size);
            return Err(Errno::BadSuperblock);
        }

        if superblock.s_blocks_per_group == 0 || superblock.s_inodes_per_group == 0 {
            warn!("ext2: zero blocks or inodes per group");
            return Err(Errno::BadSuperblock);
        }

        let num_groups = (superblock.s_blocks_count + superblock.s_blocks_per_group - 1)
            / superblock.s_blocks_per_group;
        let inode_size = superblock.inode_size();

        // The group descriptor table starts in the block after the
        // superblock's block and is loaded as whole blocks.
        let desc_per_block = block_size / core::mem::size_of::<GroupDesc>() as u32;
        let gdt_blocks = (num_groups + desc_per_block - 1) / desc_per_block;
        let gdt_first = superblock.s_first_data_block + 1;

        let mut gdt_buf = DmaBuf::alloc(block_size as usize).map_err(|_| Errno::NoMemory)?;
        let mut group_desc: Vec<GroupDesc> = Vec::with_capacity(num_groups as usize);
        for i in 0..gdt_blocks {
            read_device_block(&device, gdt_first + i, block_size, &mut gdt_buf)?;
            let in_block = (num_groups - group_desc.len() as u32).min(desc_per_block);
            for j in 0..in_block {
                let desc = unsafe {
                    core::ptr::read(
                        (gdt_buf.as_ptr() as *const GroupDesc).add(j as usize),
                    )
                };
                group_desc.push(desc);
            }
        }

        info!(
            "ext2: mounted, {} byte blocks, {} block groups, {} inodes",
            block_size, num_groups, superblock.s_inodes_count
        );

        Ok(Self {
            device,
            superblock,
            group_desc,
            block_size,
            num_groups,
            inode_size,
        })
    }

    /// Unmount the filesystem, releasing the superblock and group
    /// descriptor buffers.
    pub fn unmount(self) {
        info!("ext2: unmounted");
        // Buffers are dropped with self.
    }

    /// Filesystem block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of block groups.
    pub fn num_groups(&self) -> u32 {
        self.num_groups
    }

    /// Total number of inodes.
    pub fn inodes_count(&self) -> u32 {
        self.superblock.s_inodes_count
    }

    pub(super) fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub(super) fn group(&self, index: u32) -> KResult<&GroupDesc> {
        self.group_desc.get(index as usize).ok_or(Errno::FsCorrupt)
    }

    pub(super) fn inode_record_size(&self) -> u32 {
        self.inode_size
    }

    /// Read one filesystem block into `buf` (which must hold a full
    /// block).
    pub(super) fn read_block(&self, block: u32, buf: &mut DmaBuf) -> KResult<()> {
        read_device_block(&self.device, block, self.block_size, buf)
    }

    /// Allocate a bounce buffer sized for one filesystem block.
    pub(super) fn block_buf(&self) -> KResult<DmaBuf> {
        DmaBuf::alloc(self.block_size as usize).map_err(|_| Errno::NoMemory)
    }
}

/// Read filesystem block `block` of `block_size` bytes through the sector
/// interface.
fn read_device_block(
    device: &SharedBlockDevice,
    block: u32,
    block_size: u32,
    buf: &mut DmaBuf,
) -> KResult<()> {
    let sectors_per_block = block_size / SECTOR_SIZE as u32;
    let sector = block as u64 * sectors_per_block as u64;
    let done = device.lock().read_sectors(sector, sectors_per_block, buf)?;
    if done != sectors_per_block {
        warn!("ext2: short read of block {}", block);
        return Err(Errno::Io);
    }
    Ok(())
}
