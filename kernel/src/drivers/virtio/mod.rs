/// Virtio device drivers for QEMU/KVM.
///
/// Virtio is the standard paravirtualized I/O framework. On the RISC-V
/// virt machine QEMU exposes virtio devices through memory-mapped I/O
/// slots at 0x1000_1000..0x1000_8000; we drive the block device (device
/// id 2) over the modern (version 2) MMIO transport.
pub mod blk;
pub mod mmio;
pub mod virtqueue;

#[cfg(test)]
mod tests;

/// Virtio MMIO register offsets from the device base address.
pub mod regs {
    pub const MAGIC_VALUE: usize = 0x000; // RO, 'virt'
    pub const VERSION: usize = 0x004; // RO, 2 = modern
    pub const DEVICE_ID: usize = 0x008; // RO, 2 = block
    pub const VENDOR_ID: usize = 0x00c; // RO
    pub const DEVICE_FEATURES: usize = 0x010; // RO, selected word
    pub const DEVICE_FEATURES_SEL: usize = 0x014; // WO
    pub const DRIVER_FEATURES: usize = 0x020; // WO, selected word
    pub const DRIVER_FEATURES_SEL: usize = 0x024; // WO
    pub const QUEUE_SEL: usize = 0x030; // WO
    pub const QUEUE_NUM_MAX: usize = 0x034; // RO
    pub const QUEUE_NUM: usize = 0x038; // WO
    pub const QUEUE_READY: usize = 0x044; // RW
    pub const QUEUE_NOTIFY: usize = 0x050; // WO
    pub const INTERRUPT_STATUS: usize = 0x060; // RO
    pub const INTERRUPT_ACK: usize = 0x064; // WO
    pub const STATUS: usize = 0x070; // RW
    pub const QUEUE_DESC_LOW: usize = 0x080; // WO
    pub const QUEUE_DESC_HIGH: usize = 0x084; // WO
    pub const QUEUE_AVAIL_LOW: usize = 0x090; // WO
    pub const QUEUE_AVAIL_HIGH: usize = 0x094; // WO
    pub const QUEUE_USED_LOW: usize = 0x0a0; // WO
    pub const QUEUE_USED_HIGH: usize = 0x0a4; // WO
    pub const CONFIG_GENERATION: usize = 0x0fc; // RO
    pub const CONFIG: usize = 0x100; // device-specific configuration
}

/// 'virt' in little-endian, expected in the MAGIC_VALUE register.
pub const VIRTIO_MAGIC: u32 = 0x7472_6976;

/// Modern MMIO transport version.
pub const VIRTIO_VERSION: u32 = 2;

/// Device id of a block device.
pub const DEVICE_ID_BLOCK: u32 = 2;

/// Device status bits, accumulated in the STATUS register during init.
pub mod status {
    pub const ACKNOWLEDGE: u32 = 1 << 0; // guest noticed the device
    pub const DRIVER: u32 = 1 << 1; // guest knows how to drive it
    pub const DRIVER_OK: u32 = 1 << 2; // driver is live
    pub const FEATURES_OK: u32 = 1 << 3; // feature negotiation accepted
    pub const DEVICE_NEEDS_RESET: u32 = 1 << 6;
    pub const FAILED: u32 = 1 << 7;
}

bitflags::bitflags! {
    /// Virtio-blk feature bits (plus the transport-level VERSION_1 bit).
    /// Anything outside this set is left unacknowledged during negotiation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u64 {
        const SIZE_MAX = 1 << 1; // maximum segment size
        const SEG_MAX = 1 << 2; // maximum segment count
        const GEOMETRY = 1 << 4; // legacy C/H/S geometry
        const RO = 1 << 5; // device is read-only
        const BLK_SIZE = 1 << 6; // block size in config space
        const FLUSH = 1 << 9; // cache flush command
        const TOPOLOGY = 1 << 10; // topology information
        const CONFIG_WCE = 1 << 11; // writeback cache toggle
        const VERSION_1 = 1 << 32; // modern virtio
    }
}
