/// Unit tests for the virtio block driver.
///
/// `ModelBlk` is a software virtio-blk device implementing the transport
/// trait: it keeps a register file, and a write to QUEUE_NOTIFY makes it
/// walk the shared rings exactly as a hardware device would — read the
/// available ring, follow descriptor chains, move sector data, write the
/// status byte and publish a used-ring entry. The driver's ring code runs
/// unmodified against it.
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use super::blk::VirtioBlk;
use super::mmio::VirtioTransport;
use super::virtqueue::{
    ChainBuf, VirtqAvailHdr, VirtqDesc, VirtqUsedElem, VirtqUsedHdr, Virtqueue, VIRTQ_DESC_F_NEXT,
    VIRTQ_DESC_F_WRITE,
};
use super::{regs, status, Features, VIRTIO_MAGIC};
use crate::errno::Errno;
use crate::mem::DmaBuf;
use crate::storage::SECTOR_SIZE;

const MODEL_QUEUE_MAX: u32 = 8;

/// Software model of a virtio-blk MMIO device.
#[derive(Debug)]
struct ModelBlk {
    device_id: u32,
    device_features: u64,
    disk: Vec<u8>,
    /// Swallow notifications instead of serving them (timeout tests).
    never_complete: bool,

    // Register file / transport state.
    dev_status: u32,
    device_features_sel: u32,
    driver_features_sel: u32,
    driver_features: u64,
    queue_num: u32,
    queue_ready: u32,
    desc_addr: u64,
    avail_addr: u64,
    used_addr: u64,
    last_avail_idx: u16,
}

impl ModelBlk {
    fn new(sectors: u64) -> Self {
        Self {
            device_id: super::DEVICE_ID_BLOCK,
            device_features: (Features::VERSION_1 | Features::BLK_SIZE | Features::FLUSH).bits(),
            disk: vec![0u8; sectors as usize * SECTOR_SIZE],
            never_complete: false,
            dev_status: 0,
            device_features_sel: 0,
            driver_features_sel: 0,
            driver_features: 0,
            queue_num: 0,
            queue_ready: 0,
            desc_addr: 0,
            avail_addr: 0,
            used_addr: 0,
            last_avail_idx: 0,
        }
    }

    fn with_features(sectors: u64, features: Features) -> Self {
        let mut model = Self::new(sectors);
        model.device_features = features.bits();
        model
    }

    fn capacity(&self) -> u64 {
        (self.disk.len() / SECTOR_SIZE) as u64
    }

    /// Serve every chain the driver has made available.
    fn process_queue(&mut self) {
        let qs = self.queue_num as usize;
        assert!(qs > 0, "notify before queue setup");

        let avail_hdr = self.avail_addr as usize as *const VirtqAvailHdr;
        let avail_idx = unsafe { core::ptr::read_volatile(&(*avail_hdr).idx) };
        fence(Ordering::Acquire);

        while self.last_avail_idx != avail_idx {
            let slot = (self.last_avail_idx as usize) % qs;
            let head = unsafe {
                core::ptr::read_volatile((self.avail_addr as usize as *const u8).add(4 + 2 * slot) as *const u16)
            };

            let chain = self.collect_chain(head);
            let written = self.execute(&chain);

            let used_hdr = self.used_addr as usize as *mut VirtqUsedHdr;
            let used_idx = unsafe { core::ptr::read_volatile(&(*used_hdr).idx) };
            let elem = VirtqUsedElem {
                id: head as u32,
                len: written,
            };
            unsafe {
                let ring = (self.used_addr as usize as *mut u8).add(4) as *mut VirtqUsedElem;
                core::ptr::write_volatile(ring.add(used_idx as usize % qs), elem);
                fence(Ordering::Release);
                core::ptr::write_volatile(&mut (*used_hdr).idx, used_idx.wrapping_add(1));
            }

            self.last_avail_idx = self.last_avail_idx.wrapping_add(1);
        }
    }

    fn collect_chain(&self, head: u16) -> Vec<VirtqDesc> {
        let descs = self.desc_addr as usize as *const VirtqDesc;
        let mut chain = Vec::new();
        let mut idx = head;
        loop {
            let desc = unsafe { core::ptr::read_volatile(descs.add(idx as usize)) };
            let more = desc.flags & VIRTQ_DESC_F_NEXT != 0;
            let next = desc.next;
            chain.push(desc);
            if !more {
                break;
            }
            idx = next;
        }
        chain
    }

    /// Execute one request chain; returns the used-ring byte count.
    fn execute(&mut self, chain: &[VirtqDesc]) -> u32 {
        assert!(chain.len() >= 2, "request chain needs header and status");
        let header = &chain[0];
        let status_desc = chain.last().unwrap();
        assert_eq!(header.len, 16);
        assert_eq!(header.flags & VIRTQ_DESC_F_WRITE, 0);
        assert_eq!(status_desc.len, 1);
        assert_ne!(status_desc.flags & VIRTQ_DESC_F_WRITE, 0);

        let req_type = unsafe { core::ptr::read_volatile(header.addr as usize as *const u32) };
        let sector = unsafe { core::ptr::read_volatile((header.addr as usize + 8) as *const u64) };

        let (status, written) = match req_type {
            // T_IN: read
            0 => {
                let data = &chain[1];
                let start = sector as usize * SECTOR_SIZE;
                let len = data.len as usize;
                if start + len > self.disk.len() {
                    (1u8, 0u32) // IOERR
                } else {
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            self.disk.as_ptr().add(start),
                            data.addr as usize as *mut u8,
                            len,
                        );
                    }
                    (0, data.len + 1)
                }
            }
            // T_OUT: write
            1 => {
                let data = &chain[1];
                let start = sector as usize * SECTOR_SIZE;
                let len = data.len as usize;
                if start + len > self.disk.len() {
                    (1, 0)
                } else {
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            data.addr as usize as *const u8,
                            self.disk.as_mut_ptr().add(start),
                            len,
                        );
                    }
                    (0, 1)
                }
            }
            // T_FLUSH
            4 => (0, 1),
            _ => (2, 1), // UNSUPP
        };

        unsafe { core::ptr::write_volatile(status_desc.addr as usize as *mut u8, status) };
        written
    }
}

impl VirtioTransport for ModelBlk {
    fn read_reg(&self, offset: usize) -> u32 {
        match offset {
            regs::MAGIC_VALUE => VIRTIO_MAGIC,
            regs::VERSION => super::VIRTIO_VERSION,
            regs::DEVICE_ID => self.device_id,
            regs::VENDOR_ID => 0x554d_4551,
            regs::DEVICE_FEATURES => {
                (self.device_features >> (32 * self.device_features_sel)) as u32
            }
            regs::QUEUE_NUM_MAX => MODEL_QUEUE_MAX,
            regs::QUEUE_READY => self.queue_ready,
            regs::INTERRUPT_STATUS => 0,
            regs::STATUS => self.dev_status,
            regs::CONFIG_GENERATION => 0,
            // virtio_blk_config: capacity u64 at 0, blk_size u32 at 20
            x if x == regs::CONFIG => self.capacity() as u32,
            x if x == regs::CONFIG + 4 => (self.capacity() >> 32) as u32,
            x if x == regs::CONFIG + 20 => SECTOR_SIZE as u32,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: usize, value: u32) {
        match offset {
            regs::DEVICE_FEATURES_SEL => self.device_features_sel = value & 1,
            regs::DRIVER_FEATURES_SEL => self.driver_features_sel = value & 1,
            regs::DRIVER_FEATURES => {
                let shift = 32 * self.driver_features_sel;
                self.driver_features =
                    (self.driver_features & !(0xffff_ffffu64 << shift)) | ((value as u64) << shift);
            }
            regs::STATUS => {
                if value == 0 {
                    // Device reset.
                    self.dev_status = 0;
                    self.driver_features = 0;
                    self.queue_ready = 0;
                    self.last_avail_idx = 0;
                    return;
                }
                let mut accepted = value;
                if value & status::FEATURES_OK != 0 {
                    // Reject feature sets outside our advertised ones or
                    // missing VERSION_1.
                    let subset = (self.driver_features & !self.device_features) == 0;
                    let modern = self.driver_features & Features::VERSION_1.bits() != 0;
                    if !(subset && modern) {
                        accepted &= !status::FEATURES_OK;
                    }
                }
                self.dev_status = accepted;
            }
            regs::QUEUE_SEL => assert_eq!(value, 0, "single-queue device"),
            regs::QUEUE_NUM => self.queue_num = value,
            regs::QUEUE_READY => self.queue_ready = value,
            regs::QUEUE_DESC_LOW => self.desc_addr = (self.desc_addr & !0xffff_ffff) | value as u64,
            regs::QUEUE_DESC_HIGH => {
                self.desc_addr = (self.desc_addr & 0xffff_ffff) | ((value as u64) << 32)
            }
            regs::QUEUE_AVAIL_LOW => {
                self.avail_addr = (self.avail_addr & !0xffff_ffff) | value as u64
            }
            regs::QUEUE_AVAIL_HIGH => {
                self.avail_addr = (self.avail_addr & 0xffff_ffff) | ((value as u64) << 32)
            }
            regs::QUEUE_USED_LOW => self.used_addr = (self.used_addr & !0xffff_ffff) | value as u64,
            regs::QUEUE_USED_HIGH => {
                self.used_addr = (self.used_addr & 0xffff_ffff) | ((value as u64) << 32)
            }
            regs::QUEUE_NOTIFY => {
                if !self.never_complete {
                    self.process_queue();
                }
            }
            regs::INTERRUPT_ACK => {}
            _ => {}
        }
    }
}

// ---- Virtqueue: descriptor free-list bookkeeping ----

#[test]
fn virtqueue_chain_consumes_and_recycles_descriptors() {
    let mut vq = Virtqueue::new(8).unwrap();
    assert_eq!(vq.num_free(), 8);

    let buf = DmaBuf::alloc(64).unwrap();
    let seg = ChainBuf {
        addr: buf.phys_addr(),
        len: 64,
        device_writes: false,
    };
    let head = vq.add_chain(&[seg, seg, seg]).unwrap();
    assert_eq!(vq.num_free(), 5);

    // Nothing used yet.
    assert!(vq.poll_used().is_none());

    // Play the device: publish a used entry for the chain head.
    unsafe {
        let used = vq.used_addr().as_u64() as usize as *mut u8;
        let ring = used.add(4) as *mut VirtqUsedElem;
        core::ptr::write_volatile(
            ring,
            VirtqUsedElem {
                id: head as u32,
                len: 0,
            },
        );
        let hdr = used as *mut VirtqUsedHdr;
        core::ptr::write_volatile(&mut (*hdr).idx, 1);
    }

    let (id, _len) = vq.poll_used().unwrap();
    assert_eq!(id, head);
    // The whole chain returned to the free list.
    assert_eq!(vq.num_free(), 8);
}

#[test]
fn virtqueue_refuses_oversized_chain() {
    let mut vq = Virtqueue::new(4).unwrap();
    let buf = DmaBuf::alloc(16).unwrap();
    let seg = ChainBuf {
        addr: buf.phys_addr(),
        len: 16,
        device_writes: false,
    };
    assert!(vq.add_chain(&[seg; 5]).is_none());
    assert!(vq.add_chain(&[]).is_none());
    assert!(vq.add_chain(&[seg; 4]).is_some());
    assert!(vq.add_chain(&[seg]).is_none());
}

// ---- Driver against the device model ----

#[test]
fn init_negotiates_features_and_geometry() {
    let dev = VirtioBlk::init(ModelBlk::new(64), 1).unwrap();
    assert_eq!(dev.capacity(), 64);
    assert_eq!(dev.block_size(), 512);
    assert!(!dev.is_read_only());
    assert!(dev.features().contains(Features::FLUSH));
    assert!(dev.features().contains(Features::VERSION_1));
}

#[test]
fn probe_rejects_foreign_device() {
    let mut model = ModelBlk::new(4);
    model.device_id = 1; // network device
    assert_eq!(VirtioBlk::init(model, 1).unwrap_err(), Errno::NoDevice);
}

#[test]
fn write_then_read_back_leaves_other_sectors_alone() {
    let mut dev = VirtioBlk::init(ModelBlk::new(16), 1).unwrap();

    let mut wbuf = DmaBuf::alloc(SECTOR_SIZE).unwrap();
    for (i, byte) in wbuf.as_mut_slice().iter_mut().enumerate() {
        *byte = (i & 0xff) as u8;
    }
    assert_eq!(dev.write(1, &wbuf, 1).unwrap(), 1);

    let mut rbuf = DmaBuf::alloc(SECTOR_SIZE).unwrap();
    assert_eq!(dev.read(1, &mut rbuf, 1).unwrap(), 1);
    assert_eq!(rbuf.as_slice(), wbuf.as_slice());

    // Sector 0 is unaffected.
    assert_eq!(dev.read(0, &mut rbuf, 1).unwrap(), 1);
    assert!(rbuf.as_slice().iter().all(|&b| b == 0));

    let stats = dev.stats();
    assert_eq!(stats.reads, 2);
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.errors, 0);
}

#[test]
fn multi_sector_requests_use_one_chain() {
    let mut dev = VirtioBlk::init(ModelBlk::new(16), 1).unwrap();

    let mut wbuf = DmaBuf::alloc(4 * SECTOR_SIZE).unwrap();
    for (i, byte) in wbuf.as_mut_slice().iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    assert_eq!(dev.write(2, &wbuf, 4).unwrap(), 4);

    let mut rbuf = DmaBuf::alloc(4 * SECTOR_SIZE).unwrap();
    assert_eq!(dev.read(2, &mut rbuf, 4).unwrap(), 4);
    assert_eq!(rbuf.as_slice(), wbuf.as_slice());
}

#[test]
fn reads_beyond_capacity_are_rejected() {
    let mut dev = VirtioBlk::init(ModelBlk::new(4), 1).unwrap();
    let mut buf = DmaBuf::alloc(SECTOR_SIZE).unwrap();
    assert_eq!(dev.read(4, &mut buf, 1).unwrap_err(), Errno::Invalid);
    assert_eq!(dev.read(3, &mut buf, 2).unwrap_err(), Errno::Invalid);
    // A short buffer is also invalid.
    assert_eq!(dev.read(0, &mut buf, 2).unwrap_err(), Errno::Invalid);
}

#[test]
fn flush_requires_negotiated_feature() {
    let mut dev = VirtioBlk::init(ModelBlk::new(4), 1).unwrap();
    dev.flush().unwrap();

    let model = ModelBlk::with_features(4, Features::VERSION_1);
    let mut dev = VirtioBlk::init(model, 1).unwrap();
    assert_eq!(dev.flush().unwrap_err(), Errno::VirtioUnsupported);
}

#[test]
fn read_only_device_rejects_writes() {
    let model = ModelBlk::with_features(4, Features::VERSION_1 | Features::RO);
    let mut dev = VirtioBlk::init(model, 1).unwrap();
    assert!(dev.is_read_only());

    let buf = DmaBuf::alloc(SECTOR_SIZE).unwrap();
    assert_eq!(dev.write(0, &buf, 1).unwrap_err(), Errno::Access);
}

#[test]
fn poll_budget_turns_a_dead_device_into_a_timeout() {
    let mut model = ModelBlk::new(4);
    model.never_complete = true;
    let mut dev = VirtioBlk::init(model, 1).unwrap();
    dev.set_poll_budget(Some(10_000));

    let mut buf = DmaBuf::alloc(SECTOR_SIZE).unwrap();
    assert_eq!(dev.read(0, &mut buf, 1).unwrap_err(), Errno::VirtioTimeout);
    assert_eq!(dev.stats().errors, 1);
}
