pub mod pagetable;

use crate::bus::{MemAccess, MemoryInterface};

/// Simulated main memory, mapped at physical address 0.
///
/// Content is stored big-endian, the way SPARC sees it, so page tables
/// written with `write_u32` come back byte-identical through `mem_read`.
pub struct Ram {
    data: Vec<u8>,
    /// Cycles charged per access.
    pub latency: u64,
    /// Successful reads / writes, including page-table fetches.
    pub reads: u64,
    pub writes: u64,
}

pub const DEFAULT_RAM_SIZE: usize = 16 * 1024 * 1024;

impl Ram {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
            latency: 1,
            reads: 0,
            writes: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn range(&self, addr: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = addr as usize;
        let end = start.checked_add(len)?;
        (end <= self.data.len()).then_some(start..end)
    }

    /// Backdoor word read. Out-of-range reads return 0.
    pub fn read_u32(&self, addr: u32) -> u32 {
        match self.range(addr, 4) {
            Some(r) => {
                let b = &self.data[r];
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
            None => 0,
        }
    }

    /// Backdoor word write. Out-of-range writes are dropped.
    pub fn write_u32(&mut self, addr: u32, val: u32) {
        if let Some(r) = self.range(addr, 4) {
            self.data[r].copy_from_slice(&val.to_be_bytes());
        } else {
            log::warn!("RAM backdoor write out of range: {:#010X}", addr);
        }
    }
}

impl Default for Ram {
    fn default() -> Self {
        Self::new(DEFAULT_RAM_SIZE)
    }
}

impl MemoryInterface for Ram {
    fn mem_read(&mut self, addr: u32, _asi: u8, data: &mut [u8], access: &mut MemAccess) -> bool {
        let Some(r) = self.range(addr, data.len()) else {
            log::warn!("RAM read out of range: {:#010X} (+{})", addr, data.len());
            return false;
        };
        data.copy_from_slice(&self.data[r]);
        if !access.is_dbg {
            access.delay += self.latency;
            self.reads += 1;
        }
        true
    }

    fn mem_write(&mut self, addr: u32, _asi: u8, data: &[u8], access: &mut MemAccess) -> bool {
        let Some(r) = self.range(addr, data.len()) else {
            log::warn!("RAM write out of range: {:#010X} (+{})", addr, data.len());
            return false;
        };
        self.data[r].copy_from_slice(data);
        if !access.is_dbg {
            access.delay += self.latency;
            self.writes += 1;
        }
        true
    }
}
