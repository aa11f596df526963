/// Virtio block device driver.
///
/// Synchronous sector I/O over one split virtqueue. Every request is a
/// three-descriptor chain — a 16-byte header (type, reserved, first
/// sector), the data buffer, and a device-written status byte — published
/// in the available ring and completed by busy-polling the used ring.
///
/// There is no interrupt path here: completion is polled, optionally
/// bounded by a spin budget so a wedged device surfaces as a timeout
/// instead of a hang. Without a budget the wait is unbounded.
use log::{info, warn};

use crate::errno::{Errno, KResult};
use crate::mem::DmaBuf;
use crate::storage::{BlockDevice, SECTOR_SIZE};

use super::mmio::{Mmio, VirtioTransport};
use super::virtqueue::{ChainBuf, Virtqueue};
use super::{regs, status, Features, DEVICE_ID_BLOCK, VIRTIO_MAGIC, VIRTIO_VERSION};

/// Upper bound on the negotiated queue size.
const QUEUE_SIZE_CAP: u16 = 128;

/// Request types (header `req_type` field).
const VIRTIO_BLK_T_IN: u32 = 0; // read
const VIRTIO_BLK_T_OUT: u32 = 1; // write
const VIRTIO_BLK_T_FLUSH: u32 = 4; // cache flush

/// Status byte written by the device.
const VIRTIO_BLK_S_OK: u8 = 0;
const VIRTIO_BLK_S_UNSUPP: u8 = 2;

/// Poison value the driver pre-fills the status byte with, so a completion
/// that never touched the byte is not mistaken for success.
const STATUS_POISON: u8 = 0xff;

/// Byte offsets within device-specific configuration space.
const CONFIG_CAPACITY: usize = 0; // u64, 512-byte sectors
const CONFIG_BLK_SIZE: usize = 20; // u32, valid with Features::BLK_SIZE

/// Request header, first descriptor of every chain.
#[repr(C)]
struct RequestHeader {
    req_type: u32,
    reserved: u32,
    sector: u64,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RequestHeader>(), 16);

/// Cumulative per-device I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlkStats {
    pub reads: u64,
    pub writes: u64,
    pub errors: u64,
}

/// Virtio block device driver state.
#[derive(Debug)]
pub struct VirtioBlk<T: VirtioTransport> {
    transport: T,
    irq: u32,
    /// Negotiated feature set.
    features: Features,
    /// Capacity in 512-byte sectors.
    capacity: u64,
    /// Preferred block size in bytes.
    block_size: u32,
    read_only: bool,
    queue: Virtqueue,
    /// Maximum used-ring polls per request; None = wait forever.
    poll_budget: Option<u64>,
    stats: BlkStats,
}

impl VirtioBlk<Mmio> {
    /// Probe the MMIO slot at `base_addr` for a virtio block device.
    ///
    /// A missing or foreign device fails with `Errno::NoDevice`; callers
    /// scan the platform's candidate slots and try the next one.
    ///
    /// # Safety
    /// `base_addr` must be a valid virtio MMIO slot base, mapped
    /// uncacheable, and not driven by anyone else.
    pub unsafe fn probe(base_addr: usize, irq: u32) -> KResult<Self> {
        Self::init(Mmio::new(base_addr), irq)
    }
}

impl<T: VirtioTransport> VirtioBlk<T> {
    /// Initialize a block device behind `transport`.
    ///
    /// Runs the virtio status handshake, negotiates features, sets up the
    /// virtqueue and reads the device geometry. `irq` is recorded for the
    /// future interrupt path; completion is currently polled.
    pub fn init(mut transport: T, irq: u32) -> KResult<Self> {
        // A slot with no device reads as magic 0 — not an error worth
        // reporting, the caller is scanning.
        let magic = transport.read_reg(regs::MAGIC_VALUE);
        if magic != VIRTIO_MAGIC {
            return Err(Errno::NoDevice);
        }

        let version = transport.read_reg(regs::VERSION);
        if version != VIRTIO_VERSION {
            warn!("virtio-blk: unsupported mmio version {}", version);
            return Err(Errno::NoDevice);
        }

        let device_id = transport.read_reg(regs::DEVICE_ID);
        if device_id != DEVICE_ID_BLOCK {
            return Err(Errno::NoDevice);
        }

        // Status handshake: reset, then announce ourselves.
        transport.write_reg(regs::STATUS, 0);
        let mut dev_status = status::ACKNOWLEDGE;
        transport.write_reg(regs::STATUS, dev_status);
        dev_status |= status::DRIVER;
        transport.write_reg(regs::STATUS, dev_status);

        // Feature negotiation: accept only the bits we understand.
        // Unknown device features stay unacknowledged.
        transport.write_reg(regs::DEVICE_FEATURES_SEL, 0);
        let feat_lo = transport.read_reg(regs::DEVICE_FEATURES) as u64;
        transport.write_reg(regs::DEVICE_FEATURES_SEL, 1);
        let feat_hi = transport.read_reg(regs::DEVICE_FEATURES) as u64;
        let device_features = (feat_hi << 32) | feat_lo;

        let features = Features::from_bits_truncate(device_features);
        if !features.contains(Features::VERSION_1) {
            warn!("virtio-blk: device does not offer VERSION_1");
            transport.write_reg(regs::STATUS, dev_status | status::FAILED);
            return Err(Errno::VirtioUnsupported);
        }

        let accepted = features.bits();
        transport.write_reg(regs::DRIVER_FEATURES_SEL, 0);
        transport.write_reg(regs::DRIVER_FEATURES, accepted as u32);
        transport.write_reg(regs::DRIVER_FEATURES_SEL, 1);
        transport.write_reg(regs::DRIVER_FEATURES, (accepted >> 32) as u32);

        dev_status |= status::FEATURES_OK;
        transport.write_reg(regs::STATUS, dev_status);
        if transport.read_reg(regs::STATUS) & status::FEATURES_OK == 0 {
            warn!("virtio-blk: device rejected feature selection");
            transport.write_reg(regs::STATUS, dev_status | status::FAILED);
            return Err(Errno::VirtioUnsupported);
        }

        // Queue 0 is the lone request queue.
        transport.write_reg(regs::QUEUE_SEL, 0);
        let queue_max = transport.read_reg(regs::QUEUE_NUM_MAX);
        if queue_max == 0 {
            transport.write_reg(regs::STATUS, dev_status | status::FAILED);
            return Err(Errno::VirtioNoQueue);
        }

        // Both are powers of two, so the minimum is too.
        let queue_size = queue_max.min(QUEUE_SIZE_CAP as u32) as u16;
        let queue = Virtqueue::new(queue_size).map_err(|_| Errno::NoMemory)?;

        transport.write_reg(regs::QUEUE_NUM, queue_size as u32);
        let desc = queue.desc_addr().as_u64();
        let avail = queue.avail_addr().as_u64();
        let used = queue.used_addr().as_u64();
        transport.write_reg(regs::QUEUE_DESC_LOW, desc as u32);
        transport.write_reg(regs::QUEUE_DESC_HIGH, (desc >> 32) as u32);
        transport.write_reg(regs::QUEUE_AVAIL_LOW, avail as u32);
        transport.write_reg(regs::QUEUE_AVAIL_HIGH, (avail >> 32) as u32);
        transport.write_reg(regs::QUEUE_USED_LOW, used as u32);
        transport.write_reg(regs::QUEUE_USED_HIGH, (used >> 32) as u32);
        transport.write_reg(regs::QUEUE_READY, 1);

        dev_status |= status::DRIVER_OK;
        transport.write_reg(regs::STATUS, dev_status);

        // Device geometry from configuration space.
        let capacity = transport.read_config_u64(CONFIG_CAPACITY);
        let block_size = if features.contains(Features::BLK_SIZE) {
            transport.read_config(CONFIG_BLK_SIZE)
        } else {
            SECTOR_SIZE as u32
        };
        let read_only = features.contains(Features::RO);

        info!(
            "virtio-blk: {} sectors, {} byte blocks{}",
            capacity,
            block_size,
            if read_only { ", read-only" } else { "" }
        );

        Ok(Self {
            transport,
            irq,
            features,
            capacity,
            block_size,
            read_only,
            queue,
            poll_budget: None,
            stats: BlkStats::default(),
        })
    }

    /// Bound the used-ring busy-wait to `spins` polls per request.
    /// `None` restores the default unbounded wait.
    pub fn set_poll_budget(&mut self, spins: Option<u64>) {
        self.poll_budget = spins;
    }

    /// Capacity in 512-byte sectors. Valid once `init` has succeeded.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Preferred block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Whether the device refuses writes.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Negotiated feature set.
    pub fn features(&self) -> Features {
        self.features
    }

    /// Interrupt line recorded at probe time.
    pub fn irq(&self) -> u32 {
        self.irq
    }

    /// Cumulative read/write/error counters.
    pub fn stats(&self) -> BlkStats {
        self.stats
    }

    /// Read `count` sectors starting at `sector` into `buf`.
    /// Returns the number of sectors read.
    pub fn read(&mut self, sector: u64, buf: &mut DmaBuf, count: u32) -> KResult<u32> {
        if count == 0 {
            return Ok(0);
        }
        let bytes = count as usize * SECTOR_SIZE;
        let end = sector.checked_add(count as u64).ok_or(Errno::Invalid)?;
        if buf.len() < bytes || end > self.capacity {
            return Err(Errno::Invalid);
        }

        self.request(
            VIRTIO_BLK_T_IN,
            sector,
            Some(ChainBuf {
                addr: buf.phys_addr(),
                len: bytes as u32,
                device_writes: true,
            }),
        )?;
        self.stats.reads += count as u64;
        Ok(count)
    }

    /// Write `count` sectors starting at `sector` from `buf`.
    /// Returns the number of sectors written.
    pub fn write(&mut self, sector: u64, buf: &DmaBuf, count: u32) -> KResult<u32> {
        if self.read_only {
            return Err(Errno::Access);
        }
        if count == 0 {
            return Ok(0);
        }
        let bytes = count as usize * SECTOR_SIZE;
        let end = sector.checked_add(count as u64).ok_or(Errno::Invalid)?;
        if buf.len() < bytes || end > self.capacity {
            return Err(Errno::Invalid);
        }

        self.request(
            VIRTIO_BLK_T_OUT,
            sector,
            Some(ChainBuf {
                addr: buf.phys_addr(),
                len: bytes as u32,
                device_writes: false,
            }),
        )?;
        self.stats.writes += count as u64;
        Ok(count)
    }

    /// Flush the device write cache.
    /// Fails with `Errno::VirtioUnsupported` unless FLUSH was negotiated.
    pub fn flush(&mut self) -> KResult<()> {
        if !self.features.contains(Features::FLUSH) {
            return Err(Errno::VirtioUnsupported);
        }
        self.request(VIRTIO_BLK_T_FLUSH, 0, None)
    }

    /// Issue one request chain and busy-poll its completion.
    fn request(&mut self, req_type: u32, sector: u64, data: Option<ChainBuf>) -> KResult<()> {
        // Header and status byte share one DMA allocation:
        // bytes 0..16 header, byte 16 status.
        let mut req = DmaBuf::alloc(core::mem::size_of::<RequestHeader>() + 1)
            .map_err(|_| Errno::NoMemory)?;
        unsafe {
            let header = req.as_mut_ptr() as *mut RequestHeader;
            (*header).req_type = req_type;
            (*header).reserved = 0;
            (*header).sector = sector;
        }
        req.as_mut_slice()[16] = STATUS_POISON;

        let header_buf = ChainBuf {
            addr: req.phys_addr(),
            len: core::mem::size_of::<RequestHeader>() as u32,
            device_writes: false,
        };
        let status_buf = ChainBuf {
            addr: req.phys_addr().add(16),
            len: 1,
            device_writes: true,
        };

        let head = match data {
            Some(data_buf) => self.queue.add_chain(&[header_buf, data_buf, status_buf]),
            None => self.queue.add_chain(&[header_buf, status_buf]),
        }
        .ok_or(Errno::Busy)?;

        self.transport.write_reg(regs::QUEUE_NOTIFY, 0);

        // Busy-poll the used ring. Requests are issued one at a time, so
        // the next completion must reference our chain head.
        let mut spins: u64 = 0;
        let completed = loop {
            if let Some((id, _len)) = self.queue.poll_used() {
                break id;
            }
            spins += 1;
            if let Some(budget) = self.poll_budget {
                if spins >= budget {
                    self.stats.errors += 1;
                    warn!("virtio-blk: request timed out after {} polls", spins);
                    return Err(Errno::VirtioTimeout);
                }
            }
            core::hint::spin_loop();
        };

        if completed != head {
            // The device answered a chain we never issued.
            self.stats.errors += 1;
            warn!("virtio-blk: completion for unexpected chain {}", completed);
            return Err(Errno::Io);
        }

        match req.as_slice()[16] {
            VIRTIO_BLK_S_OK => Ok(()),
            VIRTIO_BLK_S_UNSUPP => {
                self.stats.errors += 1;
                Err(Errno::VirtioUnsupported)
            }
            _ => {
                self.stats.errors += 1;
                Err(Errno::Io)
            }
        }
    }
}

impl<T: VirtioTransport + Send> BlockDevice for VirtioBlk<T> {
    fn read_sectors(&mut self, sector: u64, count: u32, buf: &mut DmaBuf) -> KResult<u32> {
        self.read(sector, buf, count)
    }

    fn write_sectors(&mut self, sector: u64, count: u32, buf: &DmaBuf) -> KResult<u32> {
        self.write(sector, buf, count)
    }

    fn flush(&mut self) -> KResult<()> {
        VirtioBlk::flush(self)
    }

    fn sector_count(&self) -> u64 {
        self.capacity
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
