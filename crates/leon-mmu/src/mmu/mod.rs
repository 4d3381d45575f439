pub mod adaptor;
pub mod registers;
pub mod stats;
pub mod tlb;
pub mod traps;
pub mod walker;

use std::fmt;

use crate::bus::{asi, debug, ExceptionSink, MemAccess, MemoryInterface};
use crate::config::{ConfigError, Geometry, MmuConfig, TlbType};

pub use adaptor::TlbAdaptor;
pub use registers::{MmuRegister, MmuRegisters, RegisterObserver};
pub use stats::PowerModel;
pub use tlb::{CachedTranslation, TlbCache, TlbProbe, TlbStats};
pub use traps::TrapVector;
pub use walker::{FaultCode, FaultType};

use registers::*;
use walker::{TableRoot, WalkRequest, PTE_CACHEABLE, PTE_MODIFIED};

/// Which side of the core an access comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessPath {
    Instruction,
    Data,
}

impl AccessPath {
    pub fn from_asi(asi_value: u8) -> Self {
        if asi::is_instruction(asi_value) {
            Self::Instruction
        } else {
            Self::Data
        }
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instruction => f.write_str("instruction"),
            Self::Data => f.write_str("data"),
        }
    }
}

/// Handle to one TLB store owned by the MMU. In combined mode both paths
/// hold the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlbId(usize);

/// How a successful translation was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbOutcome {
    /// MMU disabled, address passed through.
    Bypass,
    Hit,
    /// Walked and cached.
    Miss,
    /// Walked and cached, replacing an entry of another context.
    ContextMiss,
    /// Walked with the TLB disabled (control TD); nothing cached.
    Uncached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    /// 36-bit physical address.
    pub paddr: u64,
    pub cacheable: bool,
    pub outcome: TlbOutcome,
    /// TLB slot that now holds (or delivered) the translation.
    pub slot: Option<u32>,
}

/// A translation that ended in a fault. The fault registers have already
/// been updated; `trap` is the vector sent to the exception sink, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("MMU fault at {vaddr:#010X}: {:?} at level {}", .code.fault_type(), .code.level())]
pub struct MmuFault {
    pub vaddr: u32,
    pub code: FaultCode,
    pub access_index: u8,
    pub trap: Option<TrapVector>,
}

/// Default clock period for the power model: 10 ns.
const DEFAULT_CLOCK_PERIOD_S: f64 = 10e-9;

/// SPARC Reference MMU.
///
/// Owns the MMU registers and the TLB store(s), and borrows nothing: the
/// memory used for table walks and the core's exception sink are handed
/// over at construction.
pub struct Mmu<M, E> {
    config: MmuConfig,
    geometry: Geometry,
    regs: MmuRegisters,
    tlbs: Vec<TlbCache>,
    itlb: TlbId,
    dtlb: TlbId,
    mem: M,
    sink: E,
    power: Option<PowerModel>,
}

impl<M: MemoryInterface, E: ExceptionSink> Mmu<M, E> {
    pub fn new(config: MmuConfig, mem: M, sink: E) -> Result<Self, ConfigError> {
        let geometry = config.validate()?;

        let mut control = (1 << CTRL_VER_SHIFT)
            | (config.itlb_entries.ilog2() << CTRL_ITLB_SHIFT)
            | (config.dtlb_entries.ilog2() << CTRL_DTLB_SHIFT)
            | (config.page_size.code() << CTRL_PSZ_SHIFT);

        let mut tlbs = vec![TlbCache::new(config.itlb_entries, config.replacement)];
        let itlb = TlbId(0);
        let dtlb = match config.tlb_type {
            TlbType::Split => {
                tlbs.push(TlbCache::new(config.dtlb_entries, config.replacement));
                control |= CTRL_ST;
                log::debug!("Created split instruction and data TLBs");
                TlbId(1)
            }
            TlbType::Combined => {
                log::debug!("Created combined instruction and data TLB");
                itlb
            }
        };

        log::info!(
            "MMU: itlb={} dtlb={} type={:?} replacement={:?} page={:?} power={}",
            config.itlb_entries,
            config.dtlb_entries,
            config.tlb_type,
            config.replacement,
            config.page_size,
            config.power_monitoring
        );

        let power = config
            .power_monitoring
            .then(|| PowerModel::new(&config, DEFAULT_CLOCK_PERIOD_S));

        Ok(Self {
            config,
            geometry,
            regs: MmuRegisters::new(control),
            tlbs,
            itlb,
            dtlb,
            mem,
            sink,
            power,
        })
    }

    pub fn config(&self) -> &MmuConfig {
        &self.config
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    // ─── Collaborators ───────────────────────────────────────────

    pub fn memory(&self) -> &M {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    pub fn exception_sink(&self) -> &E {
        &self.sink
    }

    pub fn exception_sink_mut(&mut self) -> &mut E {
        &mut self.sink
    }

    // ─── TLB stores ──────────────────────────────────────────────

    pub fn tlb_id(&self, path: AccessPath) -> TlbId {
        match path {
            AccessPath::Instruction => self.itlb,
            AccessPath::Data => self.dtlb,
        }
    }

    pub fn tlb(&self, id: TlbId) -> &TlbCache {
        &self.tlbs[id.0]
    }

    /// Number of distinct stores: 2 when split, 1 when combined.
    pub fn tlb_count(&self) -> usize {
        self.tlbs.len()
    }

    pub fn itlb_adaptor(&self) -> TlbAdaptor {
        TlbAdaptor::new(AccessPath::Instruction, self.itlb)
    }

    pub fn dtlb_adaptor(&self) -> TlbAdaptor {
        TlbAdaptor::new(AccessPath::Data, self.dtlb)
    }

    /// Empty every store.
    pub fn flush(&mut self) {
        for tlb in &mut self.tlbs {
            tlb.flush();
        }
        log::debug!("TLB flush");
    }

    /// Drop any cached translation of the page holding `vaddr`.
    pub fn flush_page(&mut self, vaddr: u32) {
        let vpn = self.geometry.vpn(vaddr);
        for tlb in &mut self.tlbs {
            tlb.flush_vpn(vpn);
        }
        log::debug!("TLB flush vpn {:#X}", vpn);
    }

    // ─── Translation ─────────────────────────────────────────────

    /// Translate through the store that serves the ASI's path.
    pub fn translate(&mut self, vaddr: u32, asi: u8, is_write: bool) -> Result<Translation, MmuFault> {
        let mut access = MemAccess::new();
        let tlb = self.tlb_id(AccessPath::from_asi(asi));
        self.lookup(tlb, vaddr, asi, is_write, &mut access)
    }

    /// Translate `vaddr` using the store `tlb`: TLB lookup, table walk on
    /// a miss, fault registers and trap on failure.
    pub fn lookup(
        &mut self,
        tlb: TlbId,
        vaddr: u32,
        asi: u8,
        is_write: bool,
        access: &mut MemAccess,
    ) -> Result<Translation, MmuFault> {
        if !self.regs.enabled() {
            access.cacheable = true;
            return Ok(Translation {
                paddr: u64::from(vaddr),
                cacheable: true,
                outcome: TlbOutcome::Bypass,
                slot: None,
            });
        }

        let vpn = self.geometry.vpn(vaddr);
        let context = self.regs.context();
        let access_index = walker::access_index(asi, is_write);

        let outcome = if self.regs.tlb_disabled() {
            TlbOutcome::Uncached
        } else {
            match self.tlbs[tlb.0].lookup(vpn, context) {
                TlbProbe::Hit(entry) => {
                    debug::set_tlb_hit(&mut access.debug);
                    access.delay += self.config.hit_cycles;
                    let acc = ((entry.pte >> 2) & 0x7) as usize;
                    let denied = walker::ACCESS_TABLE[access_index as usize][acc];
                    if denied != 0 {
                        let level = level_for_mask(entry.offset_mask);
                        let code = FaultCode::new(level, FaultType::from_bits(u32::from(denied)));
                        return Err(self.fault(vaddr, asi, access_index, code, access));
                    }
                    if is_write && entry.pte & PTE_MODIFIED == 0 {
                        self.tlbs[tlb.0].update_pte(vpn, entry.pte | PTE_MODIFIED);
                    }
                    log::debug!("TLB hit slot {} for {:#010X}", entry.tlb_slot, vaddr);
                    return Ok(self.finish(entry.pte, vaddr, entry.offset_mask, TlbOutcome::Hit, Some(entry.tlb_slot), access));
                }
                TlbProbe::ContextMiss => TlbOutcome::ContextMiss,
                TlbProbe::Miss => TlbOutcome::Miss,
            }
        };
        debug::set_tlb_miss(&mut access.debug);

        let root = TableRoot {
            enabled: true,
            context_table_pointer: self.regs.context_table_pointer(),
            context,
        };
        let req = WalkRequest { vaddr, asi, is_write };
        let walked = walker::walk(&mut self.mem, &self.geometry, root, req, access);

        if let Some(code) = walked.fault {
            return Err(self.fault(vaddr, asi, walked.access_index, code, access));
        }
        let Some(pte) = walked.pte else {
            // A walk without a fault always ends on a PTE.
            let code = FaultCode::new(walked.level, FaultType::Translation);
            return Err(self.fault(vaddr, asi, walked.access_index, code, access));
        };

        let offset_mask = walked.offset_mask();
        let slot = match outcome {
            TlbOutcome::Uncached => None,
            _ => Some(self.tlbs[tlb.0].insert(vpn, context, pte, offset_mask)),
        };
        log::debug!(
            "Mapping complete: {:#010X} -> {:#011X} (L{} pte {:#010X})",
            vaddr, walked.paddr, walked.level, pte
        );
        Ok(self.finish(pte, vaddr, offset_mask, outcome, slot, access))
    }

    fn finish(
        &self,
        pte: u32,
        vaddr: u32,
        offset_mask: u32,
        outcome: TlbOutcome,
        slot: Option<u32>,
        access: &mut MemAccess,
    ) -> Translation {
        let cacheable = pte & PTE_CACHEABLE != 0;
        access.cacheable = cacheable;
        Translation {
            paddr: walker::physical_address(pte, vaddr, offset_mask),
            cacheable,
            outcome,
            slot,
        }
    }

    /// Latch fault status and raise the trap unless NF suppresses it.
    /// Debugger accesses leave both alone.
    fn fault(&mut self, vaddr: u32, asi: u8, access_index: u8, code: FaultCode, access: &MemAccess) -> MmuFault {
        let is_instruction = asi::is_instruction(asi);
        if access.is_dbg {
            return MmuFault {
                vaddr,
                code,
                access_index,
                trap: None,
            };
        }

        log::warn!(
            "MMU fault: {:?} at level {} for {} {} {:#010X} (asi {:#X})",
            code.fault_type(),
            code.level(),
            AccessPath::from_asi(asi),
            if access_index & 0x4 != 0 { "store" } else { "load" },
            vaddr,
            asi
        );
        self.regs.record_fault(access_index, code.raw(), vaddr, !is_instruction);

        let trap = traps::fault_traps(self.regs.no_fault(), asi).then(|| TrapVector::for_access(is_instruction));
        if let Some(vector) = trap {
            log::debug!("Trap {:?} (tt {})", vector, vector.number());
            self.sink.trigger_exception(vector.number());
        }
        MmuFault {
            vaddr,
            code,
            access_index,
            trap,
        }
    }

    // ─── Registers ───────────────────────────────────────────────

    pub fn registers(&self) -> &MmuRegisters {
        &self.regs
    }

    pub fn set_register_observer(&mut self, observer: Option<RegisterObserver>) {
        self.regs.set_observer(observer);
    }

    pub fn read_control(&self) -> u32 {
        self.regs.control()
    }

    pub fn write_control(&mut self, val: u32) {
        self.regs.write_control(val);
    }

    pub fn read_context_table_ptr(&self) -> u32 {
        self.regs.context_table_pointer()
    }

    pub fn write_context_table_ptr(&mut self, val: u32) {
        self.regs.write_context_table_pointer(val);
    }

    pub fn read_context(&self) -> u32 {
        self.regs.context()
    }

    pub fn write_context(&mut self, val: u32) {
        self.regs.write_context(val);
    }

    /// Clears the fault status register.
    pub fn read_fault_status(&mut self) -> u32 {
        self.regs.read_fault_status()
    }

    pub fn read_fault_address(&self) -> u32 {
        self.regs.fault_address()
    }

    /// ASI 0x19 read: big-endian register word, None for unmapped offsets.
    pub fn read_register_bytes(&mut self, addr: u32) -> Option<[u8; 4]> {
        let reg = MmuRegister::from_offset(addr)?;
        Some(registers::to_bus(self.regs.read(reg)))
    }

    /// ASI 0x19 write of a big-endian register word. Returns false for
    /// unmapped offsets.
    pub fn write_register_bytes(&mut self, addr: u32, bytes: [u8; 4]) -> bool {
        match MmuRegister::from_offset(addr) {
            Some(reg) => {
                self.regs.write(reg, registers::from_bus(bytes));
                true
            }
            None => {
                log::warn!("ASI 0x19 write to unmapped offset {:#X}", addr);
                false
            }
        }
    }

    // ─── Diagnostics ─────────────────────────────────────────────

    /// Diagnostic PDC read (ASI 0x5 instruction, ASI 0x6 data/shared).
    ///
    ///   VA[3:2] = 3: compare VA's VPN with every entry, PTE on hit, 0 on miss
    ///   VA[3:2] = 0: slot VA[11:4]: context << 20 | virtual tag
    ///   VA[3:2] = 1: slot VA[11:4]: PTE
    ///   VA[3:2] = 2: slot VA[11:4]: recency marker (low word)
    pub fn diag_read(&self, path: AccessPath, addr: u32) -> u32 {
        let tlb = self.tlb(self.tlb_id(path));
        let selector = (addr >> 2) & 0x3;
        let val = if selector == 3 {
            tlb.get(self.geometry.vpn(addr)).map_or(0, |e| e.pte)
        } else {
            let slot = (addr >> 4) & 0xFF;
            match (selector, tlb.slot(slot)) {
                (_, None) => 0,
                (0, Some((vpn, e))) => (e.context << 20) | (vpn & 0xF_FFFF),
                (1, Some((_, e))) => e.pte,
                (_, Some((_, e))) => e.lru as u32,
            }
        };
        log::debug!("Diagnostic {} PDC read {:#010X}: {:#010X}", path, addr, val);
        val
    }

    pub fn diag_read_bytes(&self, asi_value: u8, addr: u32) -> Option<[u8; 4]> {
        let path = match asi_value {
            asi::DIAG_ITLB => AccessPath::Instruction,
            asi::DIAG_DTLB => AccessPath::Data,
            _ => return None,
        };
        Some(registers::to_bus(self.diag_read(path, addr)))
    }

    // ─── Statistics ──────────────────────────────────────────────

    pub fn report(&self) -> String {
        match self.config.tlb_type {
            TlbType::Split => stats::render_report(&[
                ("ITLB", &self.tlb(self.itlb).stats),
                ("DTLB", &self.tlb(self.dtlb).stats),
            ]),
            TlbType::Combined => {
                stats::render_report(&[("shared I/D TLB", &self.tlb(self.itlb).stats)])
            }
        }
    }

    pub fn power(&self) -> Option<&PowerModel> {
        self.power.as_ref()
    }

    /// Re-derive the power model for a new clock period.
    pub fn set_clock_period(&mut self, clock_period_s: f64) {
        if self.power.is_some() {
            self.power = Some(PowerModel::new(&self.config, clock_period_s));
        }
    }

    /// Switching power over `elapsed_s` of simulated time, when monitored.
    pub fn switching_power(&self, elapsed_s: f64) -> Option<f64> {
        let model = self.power.as_ref()?;
        let itlb = &self.tlb(self.itlb).stats;
        let dtlb = (self.dtlb != self.itlb).then(|| &self.tlb(self.dtlb).stats);
        Some(model.switching_power(itlb, dtlb, elapsed_s))
    }
}

fn level_for_mask(offset_mask: u32) -> u8 {
    match offset_mask {
        0x00FF_FFFF => 1,
        0x0003_FFFF => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TrapLog;
    use crate::config::{PageSize, Replacement, MAX_TLB_ENTRIES, MIN_TLB_ENTRIES};
    use crate::memory::pagetable::PageTableBuilder;
    use crate::memory::Ram;
    use std::cell::RefCell;
    use std::rc::Rc;

    const CTX_TABLE: u32 = 0x1000;
    const POOL: u32 = 0x4000;

    type TestMmu = Mmu<Ram, TrapLog>;

    fn setup(config: MmuConfig) -> (TestMmu, PageTableBuilder) {
        let builder = PageTableBuilder::new(config.page_size.geometry(), CTX_TABLE, POOL).unwrap();
        let mut mmu = Mmu::new(config, Ram::new(0x20_0000), TrapLog::new()).unwrap();
        mmu.write_context_table_ptr(builder.context_table_pointer());
        mmu.write_control(CTRL_E);
        (mmu, builder)
    }

    fn map(mmu: &mut TestMmu, b: &mut PageTableBuilder, ctx: u32, vaddr: u32, paddr: u64, acc: u8) {
        b.map_page(mmu.memory_mut(), ctx, vaddr, paddr, acc, true).unwrap();
    }

    #[test]
    fn combined_mode_shares_one_store() {
        for itlb in MIN_TLB_ENTRIES..=MAX_TLB_ENTRIES {
            for dtlb in MIN_TLB_ENTRIES..=MAX_TLB_ENTRIES {
                let base = MmuConfig {
                    itlb_entries: itlb,
                    dtlb_entries: dtlb,
                    ..MmuConfig::default()
                };
                let split = Mmu::new(base.clone(), Ram::new(0), TrapLog::new()).unwrap();
                assert_ne!(split.tlb_id(AccessPath::Instruction), split.tlb_id(AccessPath::Data));
                assert_eq!(split.tlb_count(), 2);
                assert_eq!(split.tlb(split.tlb_id(AccessPath::Data)).capacity(), dtlb);
                assert_eq!(split.tlb(split.tlb_id(AccessPath::Data)).replacement(), Replacement::Lru);

                let combined = MmuConfig {
                    tlb_type: TlbType::Combined,
                    ..base
                };
                let combined = Mmu::new(combined, Ram::new(0), TrapLog::new()).unwrap();
                assert_eq!(
                    combined.tlb_id(AccessPath::Instruction),
                    combined.tlb_id(AccessPath::Data)
                );
                assert_eq!(combined.itlb_adaptor().tlb(), combined.dtlb_adaptor().tlb());
                assert_eq!(combined.tlb_count(), 1);
                assert_eq!(combined.tlb(combined.tlb_id(AccessPath::Data)).capacity(), itlb);
            }
        }
    }

    #[test]
    fn bad_configuration_is_rejected() {
        let config = MmuConfig {
            dtlb_entries: 64,
            ..MmuConfig::default()
        };
        assert!(matches!(
            Mmu::new(config, Ram::new(0), TrapLog::new()),
            Err(ConfigError::InvalidTlbEntries { path: AccessPath::Data, entries: 64 })
        ));
    }

    #[test]
    fn control_reset_value() {
        let mmu = Mmu::new(MmuConfig::default(), Ram::new(0), TrapLog::new()).unwrap();
        assert_eq!(mmu.read_control(), (1 << 24) | (3 << 21) | (3 << 18) | CTRL_ST);

        let config = MmuConfig {
            itlb_entries: 16,
            dtlb_entries: 4,
            tlb_type: TlbType::Combined,
            page_size: PageSize::K8,
            ..MmuConfig::default()
        };
        let mmu = Mmu::new(config, Ram::new(0), TrapLog::new()).unwrap();
        assert_eq!(mmu.read_control(), (1 << 24) | (4 << 21) | (2 << 18) | (1 << 16));
    }

    #[test]
    fn disabled_mmu_is_identity() {
        let mut mmu = Mmu::new(MmuConfig::default(), Ram::new(0x100), TrapLog::new()).unwrap();
        for vaddr in [0, 0x0001_0000, 0xDEAD_BEEF, u32::MAX] {
            for asi_value in [asi::USER_DATA, asi::SUPERVISOR_INSTRUCTION] {
                let t = mmu.translate(vaddr, asi_value, true).unwrap();
                assert_eq!(t.paddr, u64::from(vaddr));
                assert!(t.cacheable);
                assert_eq!(t.outcome, TlbOutcome::Bypass);
            }
        }
        assert_eq!(mmu.memory().reads, 0);
        assert!(mmu.tlb(mmu.tlb_id(AccessPath::Data)).is_empty());
    }

    #[test]
    fn miss_then_hit_returns_same_address() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        map(&mut mmu, &mut b, 0, 0x0001_0000, 0x0008_0000, 1);
        let vpn = mmu.geometry().vpn(0x0001_0000);
        assert_eq!(vpn, 0x10);
        assert_eq!(mmu.geometry().indices(vpn), [0, 0, 0x10]);

        let dtlb = mmu.tlb_id(AccessPath::Data);
        let mut access = MemAccess::new();
        let first = mmu.lookup(dtlb, 0x0001_0ABC, asi::USER_DATA, false, &mut access).unwrap();
        assert_eq!(first.outcome, TlbOutcome::Miss);
        assert_eq!(first.paddr, 0x0008_0ABC);
        assert_eq!(first.slot, Some(0));
        assert!(first.cacheable);
        assert!(debug::is_tlb_miss(access.debug));
        assert_eq!(access.delay, 4);

        let mut access = MemAccess::new();
        let second = mmu.lookup(dtlb, 0x0001_0ABC, asi::USER_DATA, false, &mut access).unwrap();
        assert_eq!(second.outcome, TlbOutcome::Hit);
        assert_eq!(second.paddr, first.paddr);
        assert_eq!(second.slot, Some(0));
        assert!(!debug::is_tlb_miss(access.debug));
        assert_eq!(access.delay, 1);

        let stats = &mmu.tlb(dtlb).stats;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits[0], 1);
        assert_eq!(mmu.memory().reads, 4);
    }

    #[test]
    fn cacheable_follows_pte() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        b.map_page(mmu.memory_mut(), 0, 0x0002_0000, 0x0003_0000, 1, false).unwrap();
        let mut access = MemAccess::new();
        access.cacheable = true;
        let dtlb = mmu.tlb_id(AccessPath::Data);
        let miss = mmu.lookup(dtlb, 0x0002_0000, asi::USER_DATA, false, &mut access).unwrap();
        assert!(!miss.cacheable);
        assert!(!access.cacheable);
        let hit = mmu.translate(0x0002_0004, asi::USER_DATA, false).unwrap();
        assert_eq!(hit.outcome, TlbOutcome::Hit);
        assert!(!hit.cacheable);
    }

    #[test]
    fn level3_keeps_low_12_bits_for_every_page_size() {
        for page_size in [PageSize::K4, PageSize::K8, PageSize::K16, PageSize::K32] {
            let (mut mmu, mut b) = setup(MmuConfig {
                page_size,
                ..MmuConfig::default()
            });
            map(&mut mmu, &mut b, 0, 0x0040_0000, 0x0012_3000, 1);
            let t = mmu.translate(0x0040_0567, asi::USER_DATA, false).unwrap();
            assert_eq!(t.paddr & 0xFFF, 0x567, "{page_size:?}");
            let entry = mmu.tlb(mmu.tlb_id(AccessPath::Data)).iter().next().map(|(_, e)| *e);
            assert_eq!(entry.map(|e| e.offset_mask), Some(0xFFF));
        }
    }

    #[test]
    fn invalid_context_entry_faults_without_touching_tlb() {
        let (mut mmu, _b) = setup(MmuConfig::default());
        let fault = mmu.translate(0x0001_0000, asi::SUPERVISOR_DATA, false).unwrap_err();
        assert_eq!(fault.code.level(), 0);
        assert_eq!(fault.code.fault_type(), FaultType::InvalidAddress);
        assert_eq!(fault.code.raw(), 1 << 2);
        assert_eq!(fault.trap, Some(TrapVector::DataAccessException));
        assert_eq!(mmu.exception_sink().traps, vec![19]);

        let dtlb = mmu.tlb(mmu.tlb_id(AccessPath::Data));
        assert!(dtlb.is_empty());
        assert_eq!(dtlb.stats.writes, 0);

        let fsr = mmu.read_fault_status();
        assert_eq!(fsr, (1 << FSR_AT_SHIFT) | (1 << FSR_FT_SHIFT) | FSR_FAV);
        assert_eq!(mmu.read_fault_address(), 0x0001_0000);
        assert_eq!(mmu.read_fault_status(), 0);
    }

    #[test]
    fn instruction_fault_traps_without_fault_address() {
        let (mut mmu, _b) = setup(MmuConfig::default());
        let fault = mmu.translate(0x0000_2000, asi::USER_INSTRUCTION, false).unwrap_err();
        assert_eq!(fault.trap, Some(TrapVector::InstructionAccessException));
        assert_eq!(mmu.exception_sink().traps, vec![5]);
        assert_eq!(mmu.read_fault_status(), (2 << FSR_AT_SHIFT) | (1 << FSR_FT_SHIFT));
        assert_eq!(mmu.read_fault_address(), 0);
    }

    #[test]
    fn no_fault_bit_suppresses_traps() {
        let (mut mmu, _b) = setup(MmuConfig::default());
        mmu.write_control(CTRL_E | CTRL_NF);

        let fault = mmu.translate(0x0001_0000, asi::USER_DATA, false).unwrap_err();
        assert_eq!(fault.trap, None);
        assert!(mmu.exception_sink().traps.is_empty());
        assert_ne!(mmu.read_fault_status(), 0);

        let fault = mmu.translate(0x0001_0000, asi::SUPERVISOR_INSTRUCTION, false).unwrap_err();
        assert_eq!(fault.trap, Some(TrapVector::InstructionAccessException));
        assert_eq!(mmu.exception_sink().traps, vec![5]);
    }

    #[test]
    fn first_fault_wins() {
        let (mut mmu, _b) = setup(MmuConfig::default());
        assert!(mmu.translate(0x0001_0000, asi::SUPERVISOR_DATA, false).is_err());
        assert!(mmu.translate(0x0002_0000, asi::USER_DATA, true).is_err());
        let fsr = mmu.read_fault_status();
        assert_eq!((fsr >> FSR_AT_SHIFT) & 0x7, 1);
        assert_eq!(fsr & FSR_OW, FSR_OW);
        assert_eq!(mmu.read_fault_address(), 0x0001_0000);
        assert_eq!(mmu.exception_sink().traps, vec![19, 19]);
    }

    #[test]
    fn permissions_are_checked_on_hits() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        // ACC 0: read-only
        map(&mut mmu, &mut b, 0, 0x0001_0000, 0x0008_0000, 0);
        assert_eq!(
            mmu.translate(0x0001_0000, asi::USER_DATA, false).unwrap().outcome,
            TlbOutcome::Miss
        );
        let fault = mmu.translate(0x0001_0000, asi::USER_DATA, true).unwrap_err();
        assert_eq!(fault.code, FaultCode::new(3, FaultType::Protection));
        assert_eq!(fault.access_index, 4);
        assert_eq!(mmu.tlb(mmu.tlb_id(AccessPath::Data)).stats.hits[0], 1);
        assert_eq!((mmu.read_fault_status() >> FSR_AT_SHIFT) & 0x7, 4);
    }

    #[test]
    fn store_hit_marks_cached_pte_modified() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        let pte_addr = b.map_page(mmu.memory_mut(), 0, 0x0001_0000, 0x0008_0000, 1, true).unwrap();
        mmu.translate(0x0001_0000, asi::USER_DATA, false).unwrap();
        let dtlb = mmu.tlb_id(AccessPath::Data);
        assert_eq!(mmu.tlb(dtlb).get(0x10).unwrap().pte & PTE_MODIFIED, 0);

        mmu.translate(0x0001_0000, asi::USER_DATA, true).unwrap();
        assert_ne!(mmu.tlb(dtlb).get(0x10).unwrap().pte & PTE_MODIFIED, 0);
        // no write-back
        assert_eq!(mmu.memory().read_u32(pte_addr) & PTE_MODIFIED, 0);
    }

    #[test]
    fn permission_fault_on_walk_is_not_cached() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        // ACC 6: supervisor only
        map(&mut mmu, &mut b, 0, 0x0001_0000, 0x0008_0000, 6);
        let fault = mmu.translate(0x0001_0000, asi::USER_DATA, false).unwrap_err();
        assert_eq!(fault.code, FaultCode::new(3, FaultType::Privilege));
        assert!(mmu.tlb(mmu.tlb_id(AccessPath::Data)).is_empty());
        assert!(mmu.translate(0x0001_0000, asi::SUPERVISOR_DATA, false).is_ok());
    }

    #[test]
    fn full_store_evicts_exactly_one() {
        for replacement in [Replacement::Lru, Replacement::Random] {
            let (mut mmu, mut b) = setup(MmuConfig {
                dtlb_entries: 4,
                replacement,
                ..MmuConfig::default()
            });
            let pages: Vec<u32> = (0..5).map(|p| 0x0010_0000 + p * 0x1000).collect();
            for &vaddr in &pages {
                map(&mut mmu, &mut b, 0, vaddr, u64::from(vaddr), 1);
            }
            for &vaddr in &pages[..4] {
                mmu.translate(vaddr, asi::USER_DATA, false).unwrap();
            }
            let dtlb = mmu.tlb_id(AccessPath::Data);
            assert!(mmu.tlb(dtlb).is_full());

            mmu.translate(pages[4], asi::USER_DATA, false).unwrap();
            let geometry = *mmu.geometry();
            let tlb = mmu.tlb(dtlb);
            assert_eq!(tlb.len(), 4);
            assert_eq!(tlb.stats.misses, 5);
            let gone = pages[..4].iter().filter(|v| tlb.get(geometry.vpn(**v)).is_none()).count();
            assert_eq!(gone, 1, "{replacement:?}");
        }
    }

    #[test]
    fn lru_keeps_recently_used_pages() {
        let (mut mmu, mut b) = setup(MmuConfig {
            dtlb_entries: 4,
            ..MmuConfig::default()
        });
        let pages: Vec<u32> = (0..5).map(|p| 0x0010_0000 + p * 0x1000).collect();
        for &vaddr in &pages {
            map(&mut mmu, &mut b, 0, vaddr, u64::from(vaddr), 1);
        }
        for &vaddr in &pages[..4] {
            mmu.translate(vaddr, asi::USER_DATA, false).unwrap();
        }
        assert_eq!(mmu.translate(pages[0], asi::USER_DATA, false).unwrap().outcome, TlbOutcome::Hit);
        let t = mmu.translate(pages[4], asi::USER_DATA, false).unwrap();
        assert_eq!(t.slot, Some(1));
        assert_eq!(mmu.translate(pages[1], asi::USER_DATA, false).unwrap().outcome, TlbOutcome::Miss);
    }

    #[test]
    fn combined_store_serves_both_paths() {
        let (mut mmu, mut b) = setup(MmuConfig {
            tlb_type: TlbType::Combined,
            ..MmuConfig::default()
        });
        // ACC 3: user read/write/execute
        map(&mut mmu, &mut b, 0, 0x0003_0000, 0x0005_0000, 3);

        let fetch = mmu.translate(0x0003_0010, asi::USER_INSTRUCTION, false).unwrap();
        assert_eq!(fetch.outcome, TlbOutcome::Miss);
        let load = mmu.translate(0x0003_0020, asi::USER_DATA, false).unwrap();
        assert_eq!(load.outcome, TlbOutcome::Hit);
        assert_eq!(load.paddr, 0x0005_0020);

        let stats = &mmu.tlb(mmu.tlb_id(AccessPath::Instruction)).stats;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_hits(), 1);

        let report = mmu.report();
        assert!(report.contains("* Misses in shared I/D TLB: 1"));
        assert!(!report.contains("DTLB"));
    }

    #[test]
    fn split_stores_are_independent() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        map(&mut mmu, &mut b, 0, 0x0003_0000, 0x0005_0000, 3);
        mmu.translate(0x0003_0010, asi::USER_INSTRUCTION, false).unwrap();
        let load = mmu.translate(0x0003_0020, asi::USER_DATA, false).unwrap();
        assert_eq!(load.outcome, TlbOutcome::Miss);

        let report = mmu.report();
        assert!(report.contains("* Misses in ITLB: 1"));
        assert!(report.contains("* Misses in DTLB: 1"));
    }

    #[test]
    fn data_misses_evict_instruction_entries_in_combined_mode() {
        let (mut mmu, mut b) = setup(MmuConfig {
            itlb_entries: 2,
            tlb_type: TlbType::Combined,
            ..MmuConfig::default()
        });
        for vaddr in [0x0001_0000, 0x0002_0000, 0x0003_0000] {
            map(&mut mmu, &mut b, 0, vaddr, u64::from(vaddr), 3);
        }
        mmu.translate(0x0001_0000, asi::USER_INSTRUCTION, false).unwrap();
        mmu.translate(0x0002_0000, asi::USER_DATA, false).unwrap();
        mmu.translate(0x0003_0000, asi::USER_DATA, false).unwrap();
        let again = mmu.translate(0x0001_0000, asi::USER_INSTRUCTION, false).unwrap();
        assert_eq!(again.outcome, TlbOutcome::Miss);
    }

    #[test]
    fn context_miss_reuses_the_slot() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        map(&mut mmu, &mut b, 0, 0x0006_0000, 0x0007_0000, 1);
        map(&mut mmu, &mut b, 1, 0x0006_0000, 0x0009_0000, 1);

        let t = mmu.translate(0x0006_0000, asi::USER_DATA, false).unwrap();
        assert_eq!((t.outcome, t.paddr), (TlbOutcome::Miss, 0x0007_0000));

        mmu.write_context(1);
        let t = mmu.translate(0x0006_0000, asi::USER_DATA, false).unwrap();
        assert_eq!(t.outcome, TlbOutcome::ContextMiss);
        assert_eq!(t.paddr, 0x0009_0000);
        assert_eq!(t.slot, Some(0));

        let dtlb = mmu.tlb(mmu.tlb_id(AccessPath::Data));
        assert_eq!(dtlb.len(), 1);
        assert_eq!(dtlb.stats.context_misses, 1);
    }

    #[test]
    fn faulting_context_miss_keeps_the_stale_entry() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        map(&mut mmu, &mut b, 0, 0x0006_0000, 0x0007_0000, 1);
        mmu.translate(0x0006_0000, asi::USER_DATA, false).unwrap();
        let writes = mmu.tlb(mmu.tlb_id(AccessPath::Data)).stats.writes;

        // context 1 has no context-table entry
        mmu.write_context(1);
        let fault = mmu.translate(0x0006_0000, asi::USER_DATA, false).unwrap_err();
        assert_eq!(fault.code.fault_type(), FaultType::InvalidAddress);
        assert_eq!(fault.code.level(), 0);

        let dtlb = mmu.tlb(mmu.tlb_id(AccessPath::Data));
        assert_eq!(dtlb.len(), 1);
        assert_eq!(dtlb.stats.writes, writes);
        assert_eq!(dtlb.stats.context_misses, 1);

        mmu.write_context(0);
        let t = mmu.translate(0x0006_0000, asi::USER_DATA, false).unwrap();
        assert_eq!((t.outcome, t.paddr), (TlbOutcome::Hit, 0x0007_0000));
    }

    #[test]
    fn tlb_disable_walks_every_time() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        mmu.write_control(CTRL_E | CTRL_TD);
        map(&mut mmu, &mut b, 0, 0x0001_0000, 0x0008_0000, 1);
        for _ in 0..2 {
            let t = mmu.translate(0x0001_0000, asi::USER_DATA, false).unwrap();
            assert_eq!(t.outcome, TlbOutcome::Uncached);
            assert_eq!(t.slot, None);
        }
        assert!(mmu.tlb(mmu.tlb_id(AccessPath::Data)).is_empty());
        assert_eq!(mmu.memory().reads, 8);
    }

    #[test]
    fn flushes_drop_translations() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        map(&mut mmu, &mut b, 0, 0x0001_0000, 0x0008_0000, 1);
        map(&mut mmu, &mut b, 0, 0x0002_0000, 0x0009_0000, 1);
        mmu.translate(0x0001_0000, asi::USER_DATA, false).unwrap();
        mmu.translate(0x0002_0000, asi::USER_DATA, false).unwrap();

        mmu.flush_page(0x0001_0123);
        let t = mmu.translate(0x0001_0000, asi::USER_DATA, false).unwrap();
        assert_eq!(t.outcome, TlbOutcome::Miss);
        let t = mmu.translate(0x0002_0000, asi::USER_DATA, false).unwrap();
        assert_eq!(t.outcome, TlbOutcome::Hit);

        mmu.flush();
        assert!(mmu.tlb(mmu.tlb_id(AccessPath::Data)).is_empty());
    }

    #[test]
    fn register_window() {
        let mut mmu = Mmu::new(MmuConfig::default(), Ram::new(0x100), TrapLog::new()).unwrap();
        assert!(mmu.write_register_bytes(0x200, [0, 0, 0, 5]));
        assert_eq!(mmu.read_context(), 5);
        assert!(mmu.write_register_bytes(0x100, [0, 0, 0x12, 0x37]));
        assert_eq!(mmu.read_context_table_ptr(), 0x1234);

        let control = mmu.read_control();
        assert_eq!(mmu.read_register_bytes(0x000), Some(control.to_be_bytes()));
        assert!(!mmu.write_register_bytes(0x500, [0; 4]));
        assert_eq!(mmu.read_register_bytes(0x500), None);

        // Enable with the table pointer outside RAM: bus error on the walk.
        assert!(mmu.write_register_bytes(0x000, [0, 0, 0, 1]));
        assert!(mmu.translate(0x0, asi::USER_DATA, false).is_err());
        let fsr = mmu.read_register_bytes(0x300).map(registers::from_bus);
        assert_eq!(fsr.map(|v| (v >> FSR_FT_SHIFT) & 0x7), Some(FaultType::AccessBus as u32));
        assert_eq!(mmu.read_register_bytes(0x300), Some([0; 4]));
    }

    #[test]
    fn diagnostic_reads() {
        let (mut mmu, mut b) = setup(MmuConfig::default());
        map(&mut mmu, &mut b, 0, 0x0001_0000, 0x0008_0000, 1);
        mmu.translate(0x0001_0000, asi::USER_DATA, false).unwrap();
        let entry = *mmu.tlb(mmu.tlb_id(AccessPath::Data)).get(0x10).unwrap();

        assert_eq!(mmu.diag_read(AccessPath::Data, 0x0001_000C), entry.pte);
        assert_eq!(mmu.diag_read(AccessPath::Data, 0x0002_000C), 0);
        assert_eq!(mmu.diag_read(AccessPath::Data, 0x0), 0x10);
        assert_eq!(mmu.diag_read(AccessPath::Data, 0x4), entry.pte);
        assert_eq!(mmu.diag_read(AccessPath::Data, 0x8), entry.lru as u32);
        assert_eq!(mmu.diag_read(AccessPath::Data, 0x14), 0);
        assert_eq!(mmu.diag_read(AccessPath::Instruction, 0x0001_000C), 0);

        assert_eq!(mmu.diag_read_bytes(asi::DIAG_DTLB, 0x4), Some(entry.pte.to_be_bytes()));
        assert_eq!(mmu.diag_read_bytes(asi::SUPERVISOR_DATA, 0x4), None);
    }

    #[test]
    fn switching_power_counts_entry_accesses() {
        let (mut mmu, mut b) = setup(MmuConfig {
            power_monitoring: true,
            ..MmuConfig::default()
        });
        map(&mut mmu, &mut b, 0, 0x0001_0000, 0x0008_0000, 1);
        mmu.translate(0x0001_0000, asi::USER_DATA, false).unwrap();

        let model = *mmu.power().unwrap();
        let expected = model.dtlb_read_energy * 8.0 + model.dtlb_write_energy * 1.0;
        assert_eq!(mmu.switching_power(1.0), Some(expected));

        let (plain, _) = setup(MmuConfig::default());
        assert_eq!(plain.switching_power(1.0), None);
    }

    #[test]
    fn debugger_accesses_leave_fault_state_alone() {
        let (mut mmu, _b) = setup(MmuConfig::default());
        let dtlb = mmu.tlb_id(AccessPath::Data);
        let mut access = MemAccess::debugger();
        let fault = mmu.lookup(dtlb, 0x0001_0000, asi::USER_DATA, false, &mut access).unwrap_err();
        assert_eq!(fault.trap, None);
        assert_eq!(mmu.registers().peek_fault_status(), 0);
        assert!(mmu.exception_sink().traps.is_empty());
    }

    #[test]
    fn observer_sees_fault_updates() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let (mut mmu, _b) = setup(MmuConfig::default());
        mmu.set_register_observer(Some(Box::new(move |reg: MmuRegister, val: u32| log.borrow_mut().push((reg, val)))));
        assert!(mmu.translate(0x0001_0000, asi::SUPERVISOR_DATA, false).is_err());

        let fsr = mmu.registers().peek_fault_status();
        assert_eq!(
            *seen.borrow(),
            vec![(MmuRegister::FaultAddress, 0x0001_0000), (MmuRegister::FaultStatus, fsr)]
        );
    }
}
