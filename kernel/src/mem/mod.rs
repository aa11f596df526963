mod dma;

pub use dma::{AllocError, DmaBuf, PhysAddr, PAGE_SIZE};
