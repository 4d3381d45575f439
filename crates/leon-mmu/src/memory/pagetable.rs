//! Page-table builder: lays out SPARC Reference MMU tables in `Ram`.
//!
//! Used by the trace runner and by tests to describe address spaces without
//! hand-assembling descriptor words.
//!
//! Table layout (all words big-endian):
//!   context table: one word per context at `context_table + ctx * 4`
//!   level 1:       256 words (1024 bytes, 1024-byte aligned)
//!   level 2/3:     64 words  (256 bytes, 256-byte aligned)
//!
//! PTD word: `(table_phys >> 4) | 1`. PTE word: `(ppn_bits >> 4) | C << 7 |
//! ACC << 2 | 2`, with the physical page address on bits 35..12.

use crate::config::Geometry;
use crate::memory::Ram;
use crate::mmu::walker::{ENTRY_INVALID, ENTRY_PTD, ENTRY_PTE};

const L1_TABLE_BYTES: u32 = 256 * 4;
const L23_TABLE_BYTES: u32 = 64 * 4;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PageTableError {
    #[error("page-table pool exhausted allocating {needed} bytes at {at:#010X}")]
    OutOfMemory { needed: u32, at: u32 },
    #[error("a level-{level} page table entry already maps {vaddr:#010X}")]
    LevelConflict { level: u8, vaddr: u32 },
    #[error("page-table level must be 1..=3, got {0}")]
    InvalidLevel(u8),
    #[error("context table {0:#010X} is not 64-byte aligned")]
    Misaligned(u32),
}

/// Build a PTE word for `paddr` (36-bit) with the given ACC field.
pub fn pte(paddr: u64, acc: u8, cacheable: bool) -> u32 {
    let ppn = ((paddr >> 4) as u32) & !0xFF;
    ppn | (u32::from(cacheable) << 7) | (u32::from(acc & 0x7) << 2) | ENTRY_PTE
}

/// Build a PTD word pointing at the table at `table_phys`.
pub fn ptd(table_phys: u64) -> u32 {
    (((table_phys >> 4) as u32) & !0x3) | ENTRY_PTD
}

pub struct PageTableBuilder {
    geometry: Geometry,
    context_table: u32,
    next_free: u32,
}

impl PageTableBuilder {
    /// `context_table` is the physical base of the context table; tables
    /// are carved from `pool` upwards.
    pub fn new(geometry: Geometry, context_table: u32, pool: u32) -> Result<Self, PageTableError> {
        if context_table & 0x3F != 0 {
            return Err(PageTableError::Misaligned(context_table));
        }
        Ok(Self {
            geometry,
            context_table,
            next_free: pool,
        })
    }

    /// Value to program into the context table pointer register.
    pub fn context_table_pointer(&self) -> u32 {
        self.context_table >> 4
    }

    pub fn context_entry_addr(&self, context: u32) -> u32 {
        self.context_table.wrapping_add(context << 2)
    }

    fn alloc(&mut self, ram: &mut Ram, bytes: u32) -> Result<u32, PageTableError> {
        let out_of_memory = PageTableError::OutOfMemory { needed: bytes, at: self.next_free };
        let at = self.next_free.checked_add(bytes - 1).ok_or(out_of_memory.clone())? & !(bytes - 1);
        let end = at.checked_add(bytes).ok_or(out_of_memory)?;
        if end as u64 > ram.size() as u64 {
            return Err(PageTableError::OutOfMemory { needed: bytes, at });
        }
        for offset in (0..bytes).step_by(4) {
            ram.write_u32(at + offset, ENTRY_INVALID);
        }
        self.next_free = end;
        Ok(at)
    }

    /// Follow (or create) the descriptor stored at `entry_addr`.
    fn descend(
        &mut self,
        ram: &mut Ram,
        entry_addr: u32,
        table_bytes: u32,
        level: u8,
        vaddr: u32,
    ) -> Result<u32, PageTableError> {
        let word = ram.read_u32(entry_addr);
        match word & 0x3 {
            ENTRY_PTD => Ok((word & !0x3) << 4),
            ENTRY_PTE => Err(PageTableError::LevelConflict { level, vaddr }),
            _ => {
                let table = self.alloc(ram, table_bytes)?;
                ram.write_u32(entry_addr, ptd(table as u64));
                Ok(table)
            }
        }
    }

    /// Address of the table word that holds the level-`level` entry for
    /// `vaddr`, creating intermediate tables as needed.
    pub fn entry_addr(
        &mut self,
        ram: &mut Ram,
        context: u32,
        vaddr: u32,
        level: u8,
    ) -> Result<u32, PageTableError> {
        if !(1..=3).contains(&level) {
            return Err(PageTableError::InvalidLevel(level));
        }
        let [idx1, idx2, idx3] = self.geometry.indices(self.geometry.vpn(vaddr));

        let ctx_entry = self.context_entry_addr(context);
        let l1 = self.descend(ram, ctx_entry, L1_TABLE_BYTES, 0, vaddr)?;
        let l1_entry = l1.wrapping_add(idx1 << 2);
        if level == 1 {
            return Ok(l1_entry);
        }
        let l2 = self.descend(ram, l1_entry, L23_TABLE_BYTES, 1, vaddr)?;
        let l2_entry = l2.wrapping_add(idx2 << 2);
        if level == 2 {
            return Ok(l2_entry);
        }
        let l3 = self.descend(ram, l2_entry, L23_TABLE_BYTES, 2, vaddr)?;
        Ok(l3.wrapping_add(idx3 << 2))
    }

    /// Map `vaddr` to `paddr` at `level` (1: 16 MB, 2: 256 KB, 3: 4 KB).
    /// The physical address is aligned down to the page. Returns the
    /// address of the PTE.
    #[allow(clippy::too_many_arguments)]
    pub fn map(
        &mut self,
        ram: &mut Ram,
        context: u32,
        vaddr: u32,
        paddr: u64,
        acc: u8,
        cacheable: bool,
        level: u8,
    ) -> Result<u32, PageTableError> {
        let addr = self.entry_addr(ram, context, vaddr, level)?;
        let page_mask: u64 = match level {
            1 => 0x00FF_FFFF,
            2 => 0x0003_FFFF,
            _ => 0x0000_0FFF,
        };
        let word = pte(paddr & !page_mask, acc, cacheable);
        ram.write_u32(addr, word);
        log::debug!(
            "map ctx {} {:#010X} -> {:#011X} L{} (pte {:#010X} @ {:#010X})",
            context, vaddr, paddr, level, word, addr
        );
        Ok(addr)
    }

    /// Map a 4 KB page.
    pub fn map_page(
        &mut self,
        ram: &mut Ram,
        context: u32,
        vaddr: u32,
        paddr: u64,
        acc: u8,
        cacheable: bool,
    ) -> Result<u32, PageTableError> {
        self.map(ram, context, vaddr, paddr, acc, cacheable, 3)
    }
}
