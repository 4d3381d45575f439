/// Memory-side collaborators of the MMU.
///
/// The MMU never owns physical memory. Page-table words are fetched, and
/// translated accesses are forwarded, through `MemoryInterface`. Traps go
/// back to the owning core through `ExceptionSink`.
///
/// Physical addresses on this interface are 32-bit: the upper four bits of
/// the 36-bit SPARC physical address are dropped when an access leaves the
/// MMU, the same way the AHB side of the LEON cache controller does it.
pub trait MemoryInterface {
    /// Read `data.len()` bytes at `addr`. Returns false if nothing answered
    /// at that address. Implementations add their latency to `access.delay`.
    /// `access.cacheable` arrives already decided by the MMU.
    fn mem_read(&mut self, addr: u32, asi: u8, data: &mut [u8], access: &mut MemAccess) -> bool;

    /// Write `data` at `addr`. Same conventions as `mem_read`.
    fn mem_write(&mut self, addr: u32, asi: u8, data: &[u8], access: &mut MemAccess) -> bool;
}

/// Receives traps raised by the MMU on behalf of the owning core.
pub trait ExceptionSink {
    fn trigger_exception(&mut self, vector: u32);
}

/// Exception sink that only remembers what it was sent.
#[derive(Debug, Default, Clone)]
pub struct TrapLog {
    pub traps: Vec<u32>,
}

impl TrapLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExceptionSink for TrapLog {
    fn trigger_exception(&mut self, vector: u32) {
        self.traps.push(vector);
    }
}

/// Side-band state travelling with one memory access.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemAccess {
    /// Simulated time consumed so far, in clock cycles.
    pub delay: u64,
    /// Debug word, see `debug` for the bit layout.
    pub debug: u32,
    /// Debugger access: must not disturb simulated state.
    pub is_dbg: bool,
    /// Decided by the MMU: PTE bit 7 when translated, set in bypass.
    pub cacheable: bool,
    /// Part of a locked (atomic) bus sequence.
    pub is_lock: bool,
}

impl MemAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debugger() -> Self {
        Self {
            is_dbg: true,
            ..Self::default()
        }
    }
}

/// Debug word bits.
///
///   [21]    MMU state: 0 TLB hit, 1 TLB miss
///   [13]    cache bypass
///   [3:2]   cache state (owned by the caches, untouched here)
pub mod debug {
    pub const TLB_MISS: u32 = 1 << 21;
    pub const CACHE_BYPASS: u32 = 1 << 13;

    pub fn set_tlb_hit(debug: &mut u32) {
        *debug &= !TLB_MISS;
    }

    pub fn set_tlb_miss(debug: &mut u32) {
        *debug |= TLB_MISS;
    }

    pub fn is_tlb_miss(debug: u32) -> bool {
        debug & TLB_MISS != 0
    }
}

/// ASI values the MMU distinguishes.
pub mod asi {
    pub const DIAG_ITLB: u8 = 0x05;
    pub const DIAG_DTLB: u8 = 0x06;
    pub const USER_INSTRUCTION: u8 = 0x08;
    pub const SUPERVISOR_INSTRUCTION: u8 = 0x09;
    pub const USER_DATA: u8 = 0x0A;
    pub const SUPERVISOR_DATA: u8 = 0x0B;
    pub const MMU_FLUSH: u8 = 0x18;
    pub const MMU_REGISTERS: u8 = 0x19;

    pub fn is_user(asi: u8) -> bool {
        asi & 0x1 == 0
    }

    pub fn is_instruction(asi: u8) -> bool {
        asi & 0x2 == 0
    }
}
