/// Kernel error codes.
///
/// The numeric space is flat and partitioned into contiguous bands, one per
/// subsystem, so a caller holding an unrecognized code can still classify it
/// by range alone:
///
///   1..=29    generic POSIX-like errors
///   30..=49   filesystem format errors
///   50..=69   executable loader errors
///   70..=89   block transport (virtio) errors
///   90..=109  process errors
///   110..=129 memory errors
///
/// Failures are reported as `Err(Errno)` from every fallible call and
/// propagated with `?`; there is no process-wide error variable to set or
/// clear. `describe` stays total over the whole `i32` space so diagnostics
/// can always print something.
use core::fmt;

/// Result alias used across the storage stack.
pub type KResult<T> = Result<T, Errno>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    // Generic errors (1-29)
    NotPermitted = 1,
    NotFound = 2,
    Io = 5,
    BadFd = 9,
    NoMemory = 12,
    Access = 13,
    Busy = 16,
    Exists = 17,
    NoDevice = 19,
    NotDirectory = 20,
    IsDirectory = 21,
    Invalid = 22,
    TooManyOpenFiles = 24,
    NotSupported = 25,
    NotImplemented = 26,
    NoSpace = 28,

    // Filesystem format errors (30-49)
    BadSuperblock = 30,
    BadInode = 31,
    FsCorrupt = 32,

    // Executable loader errors (50-69)
    ElfMagic = 50,
    ElfClass = 51,
    ElfArch = 52,
    ElfFormat = 53,

    // Block transport errors (70-89)
    VirtioTimeout = 70,
    VirtioUnsupported = 71,
    VirtioNoQueue = 72,

    // Process errors (90-109)
    ProcInit = 90,
    ProcNoSlot = 91,

    // Memory errors (110-129)
    MemNoMemory = 110,
    MemBadAlign = 111,
}

/// Subsystem band of an error code, derived from the numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrnoBand {
    Generic,
    Filesystem,
    Loader,
    Virtio,
    Process,
    Memory,
    Unknown,
}

impl Errno {
    /// Numeric value of the code.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Recover a known code from its numeric value.
    pub fn from_code(code: i32) -> Option<Errno> {
        use Errno::*;
        Some(match code {
            1 => NotPermitted,
            2 => NotFound,
            5 => Io,
            9 => BadFd,
            12 => NoMemory,
            13 => Access,
            16 => Busy,
            17 => Exists,
            19 => NoDevice,
            20 => NotDirectory,
            21 => IsDirectory,
            22 => Invalid,
            24 => TooManyOpenFiles,
            25 => NotSupported,
            26 => NotImplemented,
            28 => NoSpace,
            30 => BadSuperblock,
            31 => BadInode,
            32 => FsCorrupt,
            50 => ElfMagic,
            51 => ElfClass,
            52 => ElfArch,
            53 => ElfFormat,
            70 => VirtioTimeout,
            71 => VirtioUnsupported,
            72 => VirtioNoQueue,
            90 => ProcInit,
            91 => ProcNoSlot,
            110 => MemNoMemory,
            111 => MemBadAlign,
            _ => return None,
        })
    }

    /// Human-readable message for the code.
    pub const fn description(self) -> &'static str {
        use Errno::*;
        match self {
            NotPermitted => "operation not permitted",
            NotFound => "no such file or directory",
            Io => "input/output error",
            BadFd => "bad file descriptor",
            NoMemory => "out of memory",
            Access => "permission denied",
            Busy => "device or resource busy",
            Exists => "file exists",
            NoDevice => "no such device",
            NotDirectory => "not a directory",
            IsDirectory => "is a directory",
            Invalid => "invalid argument",
            TooManyOpenFiles => "too many open files",
            NotSupported => "operation not supported",
            NotImplemented => "function not implemented",
            NoSpace => "no space left on device",
            BadSuperblock => "bad filesystem superblock",
            BadInode => "bad inode number",
            FsCorrupt => "filesystem corrupted",
            ElfMagic => "bad ELF magic",
            ElfClass => "unsupported ELF class",
            ElfArch => "unsupported ELF architecture",
            ElfFormat => "malformed ELF image",
            VirtioTimeout => "virtio request timed out",
            VirtioUnsupported => "virtio feature not supported",
            VirtioNoQueue => "virtio queue unavailable",
            ProcInit => "process initialization failed",
            ProcNoSlot => "no free process slot",
            MemNoMemory => "physical memory exhausted",
            MemBadAlign => "bad memory alignment",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Classify an arbitrary code by its numeric band.
pub const fn band_of(code: i32) -> ErrnoBand {
    match code {
        1..=29 => ErrnoBand::Generic,
        30..=49 => ErrnoBand::Filesystem,
        50..=69 => ErrnoBand::Loader,
        70..=89 => ErrnoBand::Virtio,
        90..=109 => ErrnoBand::Process,
        110..=129 => ErrnoBand::Memory,
        _ => ErrnoBand::Unknown,
    }
}

/// Message for an arbitrary code, known or not. Never fails.
pub fn describe(code: i32) -> &'static str {
    match Errno::from_code(code) {
        Some(err) => err.description(),
        None => "unknown error",
    }
}
