/// Virtio split virtqueue implementation (modern layout).
///
/// A virtqueue is three parallel structures shared with the device: a
/// descriptor table (buffer address + length + chaining flags per entry),
/// an available ring (driver-produced chain head indices) and a used ring
/// (device-produced completion records). With the modern MMIO transport
/// the three addresses are programmed independently, so the layout is the
/// driver's choice; we keep everything in one page-aligned allocation:
///
///   [descriptors: 16 * queue_size]
///   [available ring: 6 + 2 * queue_size]
///   [padding to 4-byte boundary]
///   [used ring: 6 + 8 * queue_size]
///
/// Descriptors not referenced by an outstanding available-ring entry are
/// threaded into a free list through their `next` fields; completions
/// recycle the whole chain.
use core::sync::atomic::{fence, Ordering};

use crate::mem::{AllocError, DmaBuf, PhysAddr};

/// Descriptor flags.
pub const VIRTQ_DESC_F_NEXT: u16 = 1; // chain continues in `next`
pub const VIRTQ_DESC_F_WRITE: u16 = 2; // buffer is device-writable

/// A single descriptor in the descriptor table (16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct VirtqDesc {
    pub addr: u64,  // physical address of buffer
    pub len: u32,   // length of buffer
    pub flags: u16, // VIRTQ_DESC_F_*
    pub next: u16,  // next descriptor index (if NEXT flag set)
}

static_assertions::const_assert_eq!(core::mem::size_of::<VirtqDesc>(), 16);

/// Available ring header — driver writes here to offer chains to the device.
#[repr(C)]
pub struct VirtqAvailHdr {
    pub flags: u16,
    pub idx: u16,
    // ring: [u16; queue_size] follows
    // used_event: u16 follows (after ring)
}

/// Used ring element.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct VirtqUsedElem {
    pub id: u32,  // descriptor chain head index
    pub len: u32, // total bytes written by the device
}

/// Used ring header — device writes here when it has consumed a chain.
#[repr(C)]
pub struct VirtqUsedHdr {
    pub flags: u16,
    pub idx: u16,
    // ring: [VirtqUsedElem; queue_size] follows
    // avail_event: u16 follows (after ring)
}

/// One buffer of a descriptor chain.
#[derive(Clone, Copy)]
pub struct ChainBuf {
    pub addr: PhysAddr,
    pub len: u32,
    /// Device-writable (read responses, status bytes) vs. driver-owned data.
    pub device_writes: bool,
}

/// A complete virtqueue backed by a single contiguous DMA allocation.
#[derive(Debug)]
pub struct Virtqueue {
    /// Single DMA buffer holding descriptors, available and used rings.
    buf: DmaBuf,
    /// Queue size (number of descriptors), a power of two.
    size: u16,
    /// Byte offset of the available ring within the buffer.
    avail_offset: usize,
    /// Byte offset of the used ring within the buffer.
    used_offset: usize,
    /// Head of the descriptor free list.
    free_head: u16,
    /// Number of free descriptors.
    num_free: u16,
    /// Last used index we've consumed.
    last_used_idx: u16,
}

impl Virtqueue {
    /// Compute the total size and ring offsets for a queue of `queue_size`.
    /// Returns (total_bytes, avail_offset, used_offset).
    fn layout(queue_size: u16) -> (usize, usize, usize) {
        let qs = queue_size as usize;
        let desc_size = 16 * qs;
        // avail ring: flags(2) + idx(2) + ring(2*N) + used_event(2)
        let avail_size = 6 + 2 * qs;
        let avail_offset = desc_size;
        // The used ring requires 4-byte alignment.
        let used_offset = align_up(desc_size + avail_size, 4);
        // used ring: flags(2) + idx(2) + ring(8*N) + avail_event(2)
        let used_size = 6 + 8 * qs;
        let total = used_offset + used_size;
        (total, avail_offset, used_offset)
    }

    /// Allocate and initialize a virtqueue.
    ///
    /// `queue_size` must be the negotiated queue size — a power of two no
    /// larger than the device's QUEUE_NUM_MAX.
    pub fn new(queue_size: u16) -> Result<Self, AllocError> {
        debug_assert!(queue_size.is_power_of_two());

        let (total_size, avail_offset, used_offset) = Self::layout(queue_size);

        // DmaBuf::alloc returns page-aligned, zeroed memory.
        let buf = DmaBuf::alloc(total_size)?;

        // Thread every descriptor onto the free list: each `next` points to
        // the following descriptor.
        let descs = buf.as_mut_ptr() as *mut VirtqDesc;
        for i in 0..queue_size {
            unsafe {
                let desc = &mut *descs.add(i as usize);
                desc.next = if i + 1 < queue_size { i + 1 } else { 0 };
                desc.flags = 0;
            }
        }

        Ok(Self {
            buf,
            size: queue_size,
            avail_offset,
            used_offset,
            free_head: 0,
            num_free: queue_size,
            last_used_idx: 0,
        })
    }

    /// Physical address of the descriptor table.
    pub fn desc_addr(&self) -> PhysAddr {
        self.buf.phys_addr()
    }

    /// Physical address of the available ring.
    pub fn avail_addr(&self) -> PhysAddr {
        self.buf.phys_addr().add(self.avail_offset as u64)
    }

    /// Physical address of the used ring.
    pub fn used_addr(&self) -> PhysAddr {
        self.buf.phys_addr().add(self.used_offset as u64)
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn num_free(&self) -> u16 {
        self.num_free
    }

    // ---- Internal pointer helpers ----

    fn desc_ptr(&self) -> *mut VirtqDesc {
        self.buf.as_mut_ptr() as *mut VirtqDesc
    }

    fn avail_hdr_ptr(&self) -> *mut VirtqAvailHdr {
        unsafe { self.buf.as_mut_ptr().add(self.avail_offset) as *mut VirtqAvailHdr }
    }

    fn avail_ring_ptr(&self) -> *mut u16 {
        // Ring array starts right after the 4-byte VirtqAvailHdr.
        unsafe { self.buf.as_mut_ptr().add(self.avail_offset + 4) as *mut u16 }
    }

    fn used_hdr_ptr(&self) -> *const VirtqUsedHdr {
        unsafe { self.buf.as_ptr().add(self.used_offset) as *const VirtqUsedHdr }
    }

    fn used_ring_ptr(&self) -> *const VirtqUsedElem {
        // Ring array starts right after the 4-byte VirtqUsedHdr.
        unsafe { self.buf.as_ptr().add(self.used_offset + 4) as *const VirtqUsedElem }
    }

    /// Link `bufs` into one descriptor chain and publish it in the
    /// available ring.
    ///
    /// Returns the chain head index, or None if the chain is empty or not
    /// enough descriptors are free.
    pub fn add_chain(&mut self, bufs: &[ChainBuf]) -> Option<u16> {
        if bufs.is_empty() || (self.num_free as usize) < bufs.len() {
            return None;
        }

        let head = self.free_head;
        let descs = self.desc_ptr();

        let mut idx = self.free_head;
        for (i, seg) in bufs.iter().enumerate() {
            unsafe {
                let desc = &mut *descs.add(idx as usize);
                let next_free = desc.next;
                desc.addr = seg.addr.as_u64();
                desc.len = seg.len;
                desc.flags = if seg.device_writes { VIRTQ_DESC_F_WRITE } else { 0 };
                if i + 1 < bufs.len() {
                    desc.flags |= VIRTQ_DESC_F_NEXT;
                    desc.next = next_free;
                } else {
                    desc.next = 0;
                    self.free_head = next_free;
                }
                idx = next_free;
            }
        }
        self.num_free -= bufs.len() as u16;

        // Publish the chain head in the available ring.
        unsafe {
            let avail = &mut *self.avail_hdr_ptr();
            let avail_idx = avail.idx;
            let ring = self.avail_ring_ptr();
            core::ptr::write_volatile(ring.add((avail_idx % self.size) as usize), head);
            // Descriptors and the ring entry must be visible before the
            // index update the device watches.
            fence(Ordering::Release);
            core::ptr::write_volatile(&mut avail.idx as *mut u16, avail_idx.wrapping_add(1));
        }

        Some(head)
    }

    /// Check whether the device has returned a used chain.
    ///
    /// Returns (chain head index, bytes written) and recycles every
    /// descriptor of the chain onto the free list.
    pub fn poll_used(&mut self) -> Option<(u16, u32)> {
        let used_idx = unsafe { core::ptr::read_volatile(&(*self.used_hdr_ptr()).idx) };

        if self.last_used_idx == used_idx {
            return None;
        }

        // The ring entry must be read after the index that announces it.
        fence(Ordering::Acquire);

        let ring_idx = (self.last_used_idx % self.size) as usize;
        let entry = unsafe { core::ptr::read_volatile(self.used_ring_ptr().add(ring_idx)) };

        self.last_used_idx = self.last_used_idx.wrapping_add(1);

        // Walk the chain and return every descriptor to the free list.
        let descs = self.desc_ptr();
        let mut idx = entry.id as u16;
        loop {
            let (flags, next) = unsafe {
                let desc = &mut *descs.add(idx as usize);
                let saved = (desc.flags, desc.next);
                desc.next = self.free_head;
                saved
            };
            self.free_head = idx;
            self.num_free += 1;
            if flags & VIRTQ_DESC_F_NEXT == 0 {
                break;
            }
            idx = next;
        }

        Some((entry.id as u16, entry.len))
    }
}

fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}
