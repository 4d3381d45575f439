//! Per-path front end of the MMU.
//!
//! An adaptor is a stateless router bound to one access path and the TLB
//! store serving it. Cache controllers call `mem_read` / `mem_write` with
//! virtual addresses; the adaptor translates them and forwards the physical
//! access to the MMU's memory collaborator.
//!
//! ASI dispatch:
//!   0x05, 0x06  diagnostic TLB read (read-only)
//!   0x18        TLB flush, VA[11:8] = 0 flushes one page, anything else all
//!   0x19        MMU register window
//!   others      translated access

use crate::bus::{asi, ExceptionSink, MemAccess, MemoryInterface};
use crate::mmu::{AccessPath, Mmu, TlbId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbAdaptor {
    path: AccessPath,
    tlb: TlbId,
}

impl TlbAdaptor {
    pub(crate) fn new(path: AccessPath, tlb: TlbId) -> Self {
        Self { path, tlb }
    }

    pub fn path(&self) -> AccessPath {
        self.path
    }

    pub fn tlb(&self) -> TlbId {
        self.tlb
    }

    pub fn mem_read<M: MemoryInterface, E: ExceptionSink>(
        &self,
        mmu: &mut Mmu<M, E>,
        addr: u32,
        asi_value: u8,
        data: &mut [u8],
        access: &mut MemAccess,
    ) -> bool {
        match asi_value {
            asi::MMU_REGISTERS => {
                let Some(bytes) = word_access(data.len()).and_then(|_| mmu.read_register_bytes(addr)) else {
                    return false;
                };
                data.copy_from_slice(&bytes);
                true
            }
            asi::DIAG_ITLB | asi::DIAG_DTLB => {
                let Some(bytes) = word_access(data.len()).and_then(|_| mmu.diag_read_bytes(asi_value, addr)) else {
                    return false;
                };
                data.copy_from_slice(&bytes);
                true
            }
            asi::MMU_FLUSH => false,
            _ => {
                let Some(paddr) = self.route(mmu, addr, asi_value, false, access) else {
                    return false;
                };
                mmu.memory_mut().mem_read(paddr, asi_value, data, access)
            }
        }
    }

    pub fn mem_write<M: MemoryInterface, E: ExceptionSink>(
        &self,
        mmu: &mut Mmu<M, E>,
        addr: u32,
        asi_value: u8,
        data: &[u8],
        access: &mut MemAccess,
    ) -> bool {
        match asi_value {
            asi::MMU_REGISTERS => match <[u8; 4]>::try_from(data) {
                Ok(bytes) => mmu.write_register_bytes(addr, bytes),
                Err(_) => false,
            },
            asi::MMU_FLUSH => {
                if (addr >> 8) & 0xF == 0 {
                    mmu.flush_page(addr);
                } else {
                    mmu.flush();
                }
                true
            }
            asi::DIAG_ITLB | asi::DIAG_DTLB => {
                log::warn!("Diagnostic TLB space is read-only ({:#010X})", addr);
                false
            }
            _ => {
                let Some(paddr) = self.route(mmu, addr, asi_value, true, access) else {
                    return false;
                };
                mmu.memory_mut().mem_write(paddr, asi_value, data, access)
            }
        }
    }

    /// Physical address for a forwarded access, None when translation faulted.
    fn route<M: MemoryInterface, E: ExceptionSink>(
        &self,
        mmu: &mut Mmu<M, E>,
        addr: u32,
        asi_value: u8,
        is_write: bool,
        access: &mut MemAccess,
    ) -> Option<u32> {
        if !mmu.registers().enabled() {
            access.cacheable = true;
            return Some(addr);
        }
        match mmu.lookup(self.tlb, addr, asi_value, is_write, access) {
            Ok(t) => Some(t.paddr as u32),
            Err(fault) => {
                log::debug!("{} access dropped: {}", self.path, fault);
                None
            }
        }
    }
}

fn word_access(len: usize) -> Option<()> {
    (len == 4).then_some(())
}
