/// VFS backend for ext2.
///
/// The node handle is the inode number. Nothing is cached: every
/// operation re-fetches the inode through the block device, so the VFS
/// always sees what is on disk.
use alloc::sync::Arc;

use crate::errno::{Errno, KResult};
use crate::vfs::{NodeInfo, NodeKind, NodeOps, VfsFilesystem, VfsNode};

use super::disk::EXT2_ROOT_INO;
use super::Ext2Filesystem;

/// ext2 node operations, shared by every node of one mount.
pub struct Ext2NodeOps {
    fs: Arc<Ext2Filesystem>,
}

/// Wrap a mounted ext2 filesystem for the VFS; the root node is bound to
/// inode 2.
pub fn mount(fs: Arc<Ext2Filesystem>) -> KResult<VfsFilesystem> {
    let root_inode = fs.read_inode(EXT2_ROOT_INO)?;
    if !root_inode.is_dir() {
        return Err(Errno::FsCorrupt);
    }

    let ops: Arc<dyn NodeOps> = Arc::new(Ext2NodeOps { fs });
    let root = Arc::new(VfsNode::new(
        ops,
        NodeInfo {
            handle: EXT2_ROOT_INO as u64,
            kind: NodeKind::Directory,
            size: root_inode.i_size as u64,
        },
    ));

    Ok(VfsFilesystem { name: "ext2", root })
}

impl Ext2NodeOps {
    fn inode_of(&self, node: &VfsNode) -> KResult<super::Inode> {
        self.fs.read_inode(node.handle() as u32)
    }
}

impl NodeOps for Ext2NodeOps {
    fn lookup(&self, dir: &VfsNode, name: &str) -> KResult<NodeInfo> {
        let dir_inode = self.inode_of(dir)?;
        let ino = self.fs.lookup(&dir_inode, name.as_bytes())?;
        let inode = self.fs.read_inode(ino)?;
        Ok(NodeInfo {
            handle: ino as u64,
            kind: if inode.is_dir() {
                NodeKind::Directory
            } else {
                NodeKind::File
            },
            size: inode.i_size as u64,
        })
    }

    fn read(&self, node: &VfsNode, pos: u64, buf: &mut [u8]) -> KResult<usize> {
        let inode = self.inode_of(node)?;
        if inode.is_dir() {
            return Err(Errno::IsDirectory);
        }
        self.fs.read_file(&inode, pos, buf)
    }

    fn write(&self, node: &VfsNode, pos: u64, buf: &[u8]) -> KResult<usize> {
        let inode = self.inode_of(node)?;
        self.fs.write_file(&inode, pos, buf)
    }

    fn create(&self, dir: &VfsNode, name: &str, mode: u32) -> KResult<()> {
        let dir_inode = self.inode_of(dir)?;
        self.fs.create_file(&dir_inode, name.as_bytes(), mode)?;
        Ok(())
    }

    fn mkdir(&self, dir: &VfsNode, name: &str, mode: u32) -> KResult<()> {
        let dir_inode = self.inode_of(dir)?;
        self.fs.create_dir(&dir_inode, name.as_bytes(), mode)?;
        Ok(())
    }

    fn rmdir(&self, dir: &VfsNode, name: &str) -> KResult<()> {
        let dir_inode = self.inode_of(dir)?;
        self.fs.remove_dir(&dir_inode, name.as_bytes())
    }

    fn unlink(&self, dir: &VfsNode, name: &str) -> KResult<()> {
        let dir_inode = self.inode_of(dir)?;
        self.fs.remove_file(&dir_inode, name.as_bytes())
    }
}
