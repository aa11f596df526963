/// ext2 on-disk records.
///
/// Field layouts follow the ext2 revision 1 format; all integers are
/// little-endian, which matches every target we run on. Sizes are pinned
/// with compile-time asserts because these structs are read straight off
/// the device.

/// Magic value in `Superblock::s_magic`.
pub const EXT2_SUPER_MAGIC: u16 = 0xef53;

/// The superblock always starts at this byte offset, regardless of the
/// filesystem block size.
pub const EXT2_SUPERBLOCK_OFFSET: usize = 1024;

/// On-disk size of the superblock record.
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;

/// Inode number of the root directory. Inode 0 is invalid.
pub const EXT2_ROOT_INO: u32 = 2;

/// Legal block size bounds: 1024 << s_log_block_size must land here.
pub const EXT2_MIN_BLOCK_SIZE: u32 = 1024;
pub const EXT2_MAX_BLOCK_SIZE: u32 = 4096;

/// Inode size when the superblock predates the s_inode_size field (rev 0).
pub const EXT2_DEFAULT_INODE_SIZE: u32 = 128;

/// Block pointer slots in an inode: 12 direct, then single, double and
/// triple indirect.
pub const EXT2_NDIR_BLOCKS: u32 = 12;
pub const EXT2_IND_BLOCK: usize = 12;
pub const EXT2_DIND_BLOCK: usize = 13;
pub const EXT2_TIND_BLOCK: usize = 14;

/// i_mode file type mask and the types we care about.
pub const EXT2_S_IFMT: u16 = 0xf000;
pub const EXT2_S_IFREG: u16 = 0x8000;
pub const EXT2_S_IFDIR: u16 = 0x4000;

/// Directory entry file type tags.
pub const EXT2_FT_UNKNOWN: u8 = 0;
pub const EXT2_FT_REG_FILE: u8 = 1;
pub const EXT2_FT_DIR: u8 = 2;

/// The superblock — filesystem geometry and identity, at byte 1024.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Superblock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u32,
    pub s_r_blocks_count: u32,
    pub s_free_blocks_count: u32,
    pub s_free_inodes_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_log_frag_size: u32,
    pub s_blocks_per_group: u32,
    pub s_frags_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_mtime: u32,
    pub s_wtime: u32,
    pub s_mnt_count: u16,
    pub s_max_mnt_count: u16,
    pub s_magic: u16,
    pub s_state: u16,
    pub s_errors: u16,
    pub s_minor_rev_level: u16,
    pub s_lastcheck: u32,
    pub s_checkinterval: u32,
    pub s_creator_os: u32,
    pub s_rev_level: u32,
    pub s_def_resuid: u16,
    pub s_def_resgid: u16,
    pub s_first_ino: u32,
    pub s_inode_size: u16,
    pub s_block_group_nr: u16,
    pub s_feature_compat: u32,
    pub s_feature_incompat: u32,
    pub s_feature_ro_compat: u32,
    pub s_uuid: [u8; 16],
    pub s_volume_name: [u8; 16],
    pub s_last_mounted: [u8; 64],
    pub s_algo_bitmap: u32,
    _reserved: [u8; 820],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Superblock>(), EXT2_SUPERBLOCK_SIZE);

impl Superblock {
    /// Block size derived from the stored exponent. Must be validated
    /// against the EXT2_{MIN,MAX}_BLOCK_SIZE bounds before use.
    pub fn block_size(&self) -> u32 {
        EXT2_MIN_BLOCK_SIZE << self.s_log_block_size
    }

    /// Inode record size, honoring rev-0 filesystems that leave the field
    /// at zero.
    pub fn inode_size(&self) -> u32 {
        if self.s_inode_size > 0 {
            self.s_inode_size as u32
        } else {
            EXT2_DEFAULT_INODE_SIZE
        }
    }
}

/// One block group descriptor — where the group's bitmaps and inode
/// table live.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GroupDesc {
    pub bg_block_bitmap: u32,
    pub bg_inode_bitmap: u32,
    pub bg_inode_table: u32,
    pub bg_free_blocks_count: u16,
    pub bg_free_inodes_count: u16,
    pub bg_used_dirs_count: u16,
    pub bg_pad: u16,
    pub bg_reserved: [u8; 12],
}

static_assertions::const_assert_eq!(core::mem::size_of::<GroupDesc>(), 32);

/// On-disk inode record (base 128-byte layout).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Inode {
    pub i_mode: u16,
    pub i_uid: u16,
    pub i_size: u32,
    pub i_atime: u32,
    pub i_ctime: u32,
    pub i_mtime: u32,
    pub i_dtime: u32,
    pub i_gid: u16,
    pub i_links_count: u16,
    pub i_blocks: u32,
    pub i_flags: u32,
    pub i_osd1: u32,
    pub i_block: [u32; 15],
    pub i_generation: u32,
    pub i_file_acl: u32,
    pub i_dir_acl: u32,
    pub i_faddr: u32,
    pub i_osd2: [u8; 12],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Inode>(), 128);

impl Inode {
    pub fn is_dir(&self) -> bool {
        self.i_mode & EXT2_S_IFMT == EXT2_S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        self.i_mode & EXT2_S_IFMT == EXT2_S_IFREG
    }
}

/// Fixed header of a variable-length directory entry. The name bytes
/// follow immediately; `rec_len` skips to the next entry and absorbs
/// padding and deleted records.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirEntryHeader {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
}

pub const DIR_ENTRY_HEADER_SIZE: usize = core::mem::size_of::<DirEntryHeader>();

static_assertions::const_assert_eq!(DIR_ENTRY_HEADER_SIZE, 8);
