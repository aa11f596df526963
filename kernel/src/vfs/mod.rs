/// Virtual filesystem layer.
///
/// Presents one path-addressed API over a single root mount, owns the
/// open-file-descriptor table and enforces open-mode discipline. Concrete
/// filesystems plug in through the [`NodeOps`] trait; a [`VfsNode`] is a
/// tagged handle — the backend plus an opaque per-backend id — so the VFS
/// never touches filesystem internals.
///
/// All state lives in the [`Vfs`] value handed to the caller; there are
/// no globals, so independent stacks (and tests) can coexist. Nothing
/// here is reentrant: in a preemptive environment the whole `Vfs` must
/// sit behind a single lock.
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::errno::{Errno, KResult};


/// Size of the descriptor table.
pub const MAX_OPEN_FILES: usize = 32;

/// Descriptors 0..3 belong to the console streams (stdin, stdout,
/// stderr), which the tty layer serves; the VFS never allocates or
/// accepts them.
pub const FD_STDIN: usize = 0;
pub const FD_STDOUT: usize = 1;
pub const FD_STDERR: usize = 2;
const FIRST_USER_FD: usize = 3;

bitflags::bitflags! {
    /// Open flags. The access mode is one of RDONLY / WRONLY / RDWR;
    /// write-only blocks reads and read-only blocks writes unless RDWR
    /// is also set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0x001;
        const WRONLY = 0x002;
        const RDWR = 0x004;
        const CREATE = 0x040;
        const TRUNC = 0x200;
        const APPEND = 0x400;
    }
}

/// What a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute position.
    Set,
    /// Relative to the current position.
    Current,
    /// Relative to the node's recorded size.
    End,
}

impl Whence {
    /// Decode the numeric whence of the syscall ABI (0 = set, 1 = cur,
    /// 2 = end); anything else is invalid.
    pub fn from_raw(raw: u32) -> KResult<Self> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            _ => Err(Errno::Invalid),
        }
    }
}

/// Identity of a node as reported by its backend.
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo {
    /// Backend-opaque identifier (the ext2 backend stores the inode
    /// number here).
    pub handle: u64,
    pub kind: NodeKind,
    pub size: u64,
}

/// In-memory handle to one filesystem object.
pub struct VfsNode {
    ops: Arc<dyn NodeOps>,
    handle: u64,
    kind: NodeKind,
    /// Cached size; updated on truncate and on writes past the end.
    size: AtomicU64,
}

impl VfsNode {
    pub fn new(ops: Arc<dyn NodeOps>, info: NodeInfo) -> Self {
        Self {
            ops,
            handle: info.handle,
            kind: info.kind,
            size: AtomicU64::new(info.size),
        }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Relaxed);
    }

    pub fn ops(&self) -> &Arc<dyn NodeOps> {
        &self.ops
    }
}

/// Operations a filesystem backend offers on its nodes.
///
/// Every operation is optional: the defaults report the operation as
/// unsupported (open and close default to doing nothing), which is the
/// trait-shaped form of a null entry in an operations table.
pub trait NodeOps: Send + Sync {
    /// Resolve `name` inside the directory `dir`.
    fn lookup(&self, _dir: &VfsNode, _name: &str) -> KResult<NodeInfo> {
        Err(Errno::NotSupported)
    }

    /// Hook invoked when a descriptor opens `node`.
    fn open(&self, _node: &VfsNode, _flags: OpenFlags) -> KResult<()> {
        Ok(())
    }

    /// Hook invoked when the last descriptor duty on `node` ends.
    fn close(&self, _node: &VfsNode) {}

    /// Read from `node` at absolute byte position `pos`.
    fn read(&self, _node: &VfsNode, _pos: u64, _buf: &mut [u8]) -> KResult<usize> {
        Err(Errno::NotSupported)
    }

    /// Write to `node` at absolute byte position `pos`.
    fn write(&self, _node: &VfsNode, _pos: u64, _buf: &[u8]) -> KResult<usize> {
        Err(Errno::NotSupported)
    }

    /// Create a regular file `name` inside the directory `dir`.
    fn create(&self, _dir: &VfsNode, _name: &str, _mode: u32) -> KResult<()> {
        Err(Errno::NotSupported)
    }

    /// Create a directory `name` inside `dir`.
    fn mkdir(&self, _dir: &VfsNode, _name: &str, _mode: u32) -> KResult<()> {
        Err(Errno::NotSupported)
    }

    /// Remove the directory `name` from `dir`.
    fn rmdir(&self, _dir: &VfsNode, _name: &str) -> KResult<()> {
        Err(Errno::NotSupported)
    }

    /// Remove the file `name` from `dir`.
    fn unlink(&self, _dir: &VfsNode, _name: &str) -> KResult<()> {
        Err(Errno::NotSupported)
    }
}

/// A mountable filesystem: a name and its root node.
pub struct VfsFilesystem {
    pub name: &'static str,
    pub root: Arc<VfsNode>,
}

/// Result of `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    pub kind: NodeKind,
}

/// One open-file table slot.
struct OpenFile {
    node: Arc<VfsNode>,
    flags: OpenFlags,
    /// Byte position, private to this descriptor. Two descriptors on the
    /// same node never share a cursor.
    pos: u64,
}

/// The virtual filesystem: descriptor table plus the root mount.
pub struct Vfs {
    files: [Option<OpenFile>; MAX_OPEN_FILES],
    root: Option<VfsFilesystem>,
}

impl Vfs {
    /// Fresh VFS with an empty descriptor table and no root mount.
    pub fn new() -> Self {
        Self {
            files: core::array::from_fn(|_| None),
            root: None,
        }
    }

    /// Install `fs` as the sole root mount. Remounting replaces the
    /// previous root; open descriptors keep their nodes.
    pub fn mount_root(&mut self, fs: VfsFilesystem) -> KResult<()> {
        info!("vfs: mounted root filesystem ({})", fs.name);
        self.root = Some(fs);
        Ok(())
    }

    /// Resolve an absolute path to a node.
    ///
    /// `/` resolves to the root node itself; empty components from
    /// repeated slashes are skipped. There is no `.`/`..` handling.
    pub fn resolve_path(&self, path: &str) -> KResult<Arc<VfsNode>> {
        let root = self.root.as_ref().ok_or(Errno::NoDevice)?;
        let rest = path.strip_prefix('/').ok_or(Errno::Invalid)?;

        let mut current = root.root.clone();
        for component in rest.split('/') {
            if component.is_empty() {
                continue;
            }
            let info = current.ops().lookup(&current, component)?;
            current = Arc::new(VfsNode::new(current.ops().clone(), info));
        }
        Ok(current)
    }

    /// Open `path` and return a descriptor.
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> KResult<usize> {
        let node = match self.resolve_path(path) {
            Ok(node) => node,
            Err(Errno::NotFound) if flags.contains(OpenFlags::CREATE) => {
                self.create_root_child(path)?;
                // Re-resolve rather than adopt the fresh node; a racing
                // removal could make this observe a different node.
                self.resolve_path(path)?
            }
            Err(err) => return Err(err),
        };

        let fd = self.alloc_fd()?;
        self.files[fd] = Some(OpenFile {
            node: node.clone(),
            flags,
            pos: 0,
        });

        if let Err(err) = node.ops().open(&node, flags) {
            self.files[fd] = None;
            return Err(err);
        }

        if flags.contains(OpenFlags::TRUNC) {
            node.set_size(0);
        }
        if flags.contains(OpenFlags::APPEND) {
            // Checked above: the slot was just filled.
            if let Some(file) = self.files[fd].as_mut() {
                file.pos = node.size();
            }
        }

        Ok(fd)
    }

    /// Close a descriptor.
    pub fn close(&mut self, fd: usize) -> KResult<()> {
        let file = self
            .files
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(Errno::BadFd)?;
        file.node.ops().close(&file.node);
        Ok(())
    }

    /// Read from the descriptor's current position and advance it.
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> KResult<usize> {
        let file = self.file_mut(fd)?;
        if file.flags.contains(OpenFlags::WRONLY) && !file.flags.contains(OpenFlags::RDWR) {
            return Err(Errno::Access);
        }
        let n = file.node.ops().read(&file.node, file.pos, buf)?;
        file.pos += n as u64;
        Ok(n)
    }

    /// Write at the descriptor's current position and advance it; a write
    /// extending past the node's recorded size updates that size.
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> KResult<usize> {
        let file = self.file_mut(fd)?;
        if file.flags.contains(OpenFlags::RDONLY) && !file.flags.contains(OpenFlags::RDWR) {
            return Err(Errno::Access);
        }
        let n = file.node.ops().write(&file.node, file.pos, buf)?;
        file.pos += n as u64;
        if file.pos > file.node.size() {
            file.node.set_size(file.pos);
        }
        Ok(n)
    }

    /// Move the descriptor's position. A resulting position before byte 0
    /// is invalid; positions past end of file are allowed (reads there
    /// return 0).
    pub fn seek(&mut self, fd: usize, offset: i64, whence: Whence) -> KResult<u64> {
        let file = self.file_mut(fd)?;
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => file.pos as i64,
            Whence::End => file.node.size() as i64,
        };
        let target = base.checked_add(offset).ok_or(Errno::Invalid)?;
        if target < 0 {
            return Err(Errno::Invalid);
        }
        file.pos = target as u64;
        Ok(file.pos)
    }

    /// Size and kind of the node at `path`, without opening a descriptor.
    pub fn stat(&self, path: &str) -> KResult<Stat> {
        let node = self.resolve_path(path)?;
        Ok(Stat {
            size: node.size(),
            kind: node.kind(),
        })
    }

    /// Whether `path` resolves at all.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve_path(path).is_ok()
    }

    /// Create a directory. Restricted to direct children of the root.
    pub fn mkdir(&self, path: &str, mode: u32) -> KResult<()> {
        let (root, name) = self.root_child(path)?;
        root.ops().mkdir(&root, name, mode)
    }

    /// Remove a directory. Restricted to direct children of the root.
    pub fn rmdir(&self, path: &str) -> KResult<()> {
        let (root, name) = self.root_child(path)?;
        root.ops().rmdir(&root, name)
    }

    /// Remove a file. Restricted to direct children of the root.
    pub fn unlink(&self, path: &str) -> KResult<()> {
        let (root, name) = self.root_child(path)?;
        root.ops().unlink(&root, name)
    }

    // ---- Internals ----

    fn alloc_fd(&mut self) -> KResult<usize> {
        for fd in FIRST_USER_FD..MAX_OPEN_FILES {
            if self.files[fd].is_none() {
                return Ok(fd);
            }
        }
        Err(Errno::TooManyOpenFiles)
    }

    fn file_mut(&mut self, fd: usize) -> KResult<&mut OpenFile> {
        self.files
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or(Errno::BadFd)
    }

    /// Split `path` into the root node and a direct-child name.
    /// Creation and removal below the first level are not supported.
    fn root_child<'p>(&self, path: &'p str) -> KResult<(Arc<VfsNode>, &'p str)> {
        let root = self.root.as_ref().ok_or(Errno::NoDevice)?;
        let name = path.strip_prefix('/').ok_or(Errno::Invalid)?;
        if name.is_empty() {
            return Err(Errno::Invalid);
        }
        if name.contains('/') {
            return Err(Errno::NotSupported);
        }
        Ok((root.root.clone(), name))
    }

    fn create_root_child(&self, path: &str) -> KResult<()> {
        let (root, name) = self.root_child(path)?;
        root.ops().create(&root, name, 0o644)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}
