//! Page-table walker for the SPARC Reference MMU.
//!
//! Three-level walk, rooted in the context table:
//!
//!   context table[ctx] ──PTD──▶ L1[idx1] ──PTD──▶ L2[idx2] ──PTD──▶ L3[idx3]
//!                                  │                 │                 │
//!                                 PTE 16 MB         PTE 256 KB        PTE 4 KB
//!
//! Every table word is fetched as 4 big-endian bytes through the memory
//! collaborator. The walker has no state of its own; fault reporting and
//! TLB updates belong to the caller.

use crate::bus::{asi, MemAccess, MemoryInterface};
use crate::config::Geometry;

pub const ENTRY_INVALID: u32 = 0;
pub const ENTRY_PTD: u32 = 1;
pub const ENTRY_PTE: u32 = 2;
pub const ENTRY_RESERVED: u32 = 3;

pub const PTE_CACHEABLE: u32 = 1 << 7;
pub const PTE_MODIFIED: u32 = 1 << 6;
pub const PTE_REFERENCED: u32 = 1 << 5;

/// Physical addresses are 36 bits wide.
pub const PADDR_MASK: u64 = (1 << 36) - 1;

/// Fault type, as found in FSR.FT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultType {
    None = 0,
    InvalidAddress = 1,
    Protection = 2,
    Privilege = 3,
    Translation = 4,
    AccessBus = 5,
    Internal = 6,
}

impl FaultType {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x7 {
            0 => Self::None,
            1 => Self::InvalidAddress,
            2 => Self::Protection,
            3 => Self::Privilege,
            4 => Self::Translation,
            5 => Self::AccessBus,
            _ => Self::Internal,
        }
    }
}

/// Packed fault code: `level << 8 | fault_type << 2`. Lines up with the
/// L and FT fields of the fault status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultCode(u32);

impl FaultCode {
    pub fn new(level: u8, fault_type: FaultType) -> Self {
        Self((u32::from(level & 0x3) << 8) | ((fault_type as u32) << 2))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn level(self) -> u8 {
        ((self.0 >> 8) & 0x3) as u8
    }

    pub fn fault_type(self) -> FaultType {
        FaultType::from_bits(self.0 >> 2)
    }
}

/// Fault type for `[access index][PTE.ACC]`. 0 = allowed, 2 = protection
/// error, 3 = privilege violation.
pub const ACCESS_TABLE: [[u8; 8]; 8] = [
    [0, 0, 0, 0, 2, 0, 3, 3],
    [0, 0, 0, 0, 2, 0, 0, 0],
    [2, 2, 0, 0, 0, 2, 3, 3],
    [2, 2, 0, 0, 0, 2, 0, 0],
    [2, 0, 2, 0, 2, 2, 3, 3],
    [2, 0, 2, 0, 2, 0, 2, 0],
    [2, 2, 2, 0, 2, 2, 3, 3],
    [2, 2, 2, 0, 2, 2, 2, 0],
];

/// Access type index (FSR.AT):
///
///   bit 2: store
///   bit 1: instruction space
///   bit 0: supervisor
pub fn access_index(asi_value: u8, is_write: bool) -> u8 {
    let supervisor = !asi::is_user(asi_value);
    let instruction = asi::is_instruction(asi_value);
    (u8::from(is_write) << 2) | (u8::from(instruction) << 1) | u8::from(supervisor)
}

/// Page size and offset mask of a PTE found at `level`.
pub fn page_size_for_level(level: u8) -> u32 {
    match level {
        1 => 0x0100_0000,
        2 => 0x0004_0000,
        _ => 0x0000_1000,
    }
}

/// Build the physical address from a PTE and the in-page offset.
pub fn physical_address(pte: u32, vaddr: u32, offset_mask: u32) -> u64 {
    ((u64::from(pte & !0xFF) << 4) | u64::from(vaddr & offset_mask)) & PADDR_MASK
}

/// Where the walk starts, sampled from the MMU registers.
#[derive(Debug, Clone, Copy)]
pub struct TableRoot {
    pub enabled: bool,
    pub context_table_pointer: u32,
    pub context: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct WalkRequest {
    pub vaddr: u32,
    pub asi: u8,
    pub is_write: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOutcome {
    /// 36-bit physical address. Also filled in for permission faults.
    pub paddr: u64,
    /// Bytes covered by the resolved PTE; 0 if no PTE was reached.
    pub page_size: u32,
    pub access_index: u8,
    /// Level of the last table word read (0 = context table).
    pub level: u8,
    /// The resolved PTE, with R (and M for stores) set on success.
    pub pte: Option<u32>,
    pub fault: Option<FaultCode>,
}

impl WalkOutcome {
    pub fn offset_mask(&self) -> u32 {
        self.page_size.wrapping_sub(1)
    }

    fn fault(access_index: u8, level: u8, fault_type: FaultType) -> Self {
        Self {
            paddr: 0,
            page_size: 0,
            access_index,
            level,
            pte: None,
            fault: Some(FaultCode::new(level, fault_type)),
        }
    }
}

fn read_table_word<M: MemoryInterface>(mem: &mut M, addr: u32, access: &mut MemAccess) -> Option<u32> {
    let mut word = [0u8; 4];
    // Table fetches go out with the user-instruction ASI.
    if mem.mem_read(addr, asi::USER_INSTRUCTION, &mut word, access) {
        Some(u32::from_be_bytes(word))
    } else {
        None
    }
}

/// Translate `req.vaddr` by walking the page tables.
pub fn walk<M: MemoryInterface>(
    mem: &mut M,
    geometry: &Geometry,
    root: TableRoot,
    req: WalkRequest,
    access: &mut MemAccess,
) -> WalkOutcome {
    let access_index = access_index(req.asi, req.is_write);

    if !root.enabled {
        return WalkOutcome {
            paddr: u64::from(req.vaddr),
            page_size: 0,
            access_index,
            level: 0,
            pte: None,
            fault: None,
        };
    }

    let vpn = geometry.vpn(req.vaddr);
    let indices = geometry.indices(vpn);
    log::debug!(
        "walk {:#010X} vpn {:#X} idx {:?} ctx {}",
        req.vaddr, vpn, indices, root.context
    );

    let ctx_addr = (root.context_table_pointer << 4).wrapping_add(root.context << 2);
    let Some(mut descriptor) = read_table_word(mem, ctx_addr, access) else {
        return WalkOutcome::fault(access_index, 0, FaultType::AccessBus);
    };
    match descriptor & 0x3 {
        ENTRY_PTD => {}
        ENTRY_INVALID => return WalkOutcome::fault(access_index, 0, FaultType::InvalidAddress),
        _ => return WalkOutcome::fault(access_index, 0, FaultType::Translation),
    }

    for (level, index) in (1u8..=3).zip(indices) {
        let addr = ((descriptor & !0x3) << 4).wrapping_add(index << 2);
        let Some(word) = read_table_word(mem, addr, access) else {
            return WalkOutcome::fault(access_index, level, FaultType::AccessBus);
        };
        log::debug!("  L{} [{:#010X}] = {:#010X}", level, addr, word);
        match word & 0x3 {
            ENTRY_PTE => return resolve(req, access_index, level, word),
            ENTRY_PTD if level < 3 => descriptor = word,
            ENTRY_INVALID => {
                return WalkOutcome::fault(access_index, level, FaultType::InvalidAddress)
            }
            // Reserved, or a PTD where only a PTE may live.
            _ => return WalkOutcome::fault(access_index, level, FaultType::Translation),
        }
    }

    WalkOutcome::fault(access_index, 3, FaultType::Translation)
}

fn resolve(req: WalkRequest, access_index: u8, level: u8, mut pte: u32) -> WalkOutcome {
    let page_size = page_size_for_level(level);
    let paddr = physical_address(pte, req.vaddr, page_size - 1);

    let acc = ((pte >> 2) & 0x7) as usize;
    let denied = ACCESS_TABLE[access_index as usize][acc];
    if denied != 0 {
        return WalkOutcome {
            paddr,
            page_size,
            access_index,
            level,
            pte: Some(pte),
            fault: Some(FaultCode::new(level, FaultType::from_bits(u32::from(denied)))),
        };
    }

    pte |= PTE_REFERENCED;
    if req.is_write {
        pte |= PTE_MODIFIED;
    }

    WalkOutcome {
        paddr,
        page_size,
        access_index,
        level,
        pte: Some(pte),
        fault: None,
    }
}
