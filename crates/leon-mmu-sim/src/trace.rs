use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use leon_mmu::bus::asi;
use leon_mmu::memory::pagetable::{PageTableBuilder, PageTableError};
use leon_mmu::{AccessPath, MemAccess, Mmu, Ram, TrapLog};

pub const HEADER_LINE: &str = "# leon_mmu_trace_v1";

/// Context tables hold one word per context; page tables are carved right
/// behind them.
const CONTEXT_TABLE_BYTES: u32 = 256 * 4;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("trace I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {reason}: {text:?}")]
    Malformed {
        line: usize,
        text: String,
        reason: &'static str,
    },
    #[error(transparent)]
    PageTable(#[from] PageTableError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    ContextTable(u32),
    Map {
        context: u32,
        vaddr: u32,
        paddr: u64,
        acc: u8,
        cacheable: bool,
        level: u8,
    },
    Context(u32),
    Control(u32),
    Read { asi: u8, vaddr: u32 },
    Write { asi: u8, vaddr: u32 },
    FaultStatus,
    Flush,
}

fn hex<T: TryFrom<u64>>(s: &str) -> Option<T> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(digits, 16).ok().and_then(|v| T::try_from(v).ok())
}

/// Parse one non-comment trace line.
pub fn parse_line(line: usize, text: &str) -> Result<TraceOp, TraceError> {
    let malformed = |reason| TraceError::Malformed {
        line,
        text: text.to_string(),
        reason,
    };
    let parts: Vec<&str> = text.trim().split(':').collect();
    let op = match parts.as_slice() {
        ["ctp", addr] => TraceOp::ContextTable(hex(addr).ok_or_else(|| malformed("bad address"))?),
        ["map", ctx, vaddr, paddr, acc, cache, rest @ ..] if rest.len() <= 1 => {
            let level = match rest.first() {
                None => 3,
                Some(level) => level.trim().parse::<u8>().map_err(|_| malformed("bad level"))?,
            };
            if !(1..=3).contains(&level) {
                return Err(malformed("level must be 1..=3"));
            }
            let acc = acc.trim().parse::<u8>().map_err(|_| malformed("bad access field"))?;
            if acc > 7 {
                return Err(malformed("access field must be 0..=7"));
            }
            let cacheable = match cache.trim() {
                "c" => true,
                "u" => false,
                _ => return Err(malformed("expected c or u")),
            };
            TraceOp::Map {
                context: ctx.trim().parse().map_err(|_| malformed("bad context"))?,
                vaddr: hex(vaddr).ok_or_else(|| malformed("bad virtual address"))?,
                paddr: hex(paddr).ok_or_else(|| malformed("bad physical address"))?,
                acc,
                cacheable,
                level,
            }
        }
        ["ctx", ctx] => TraceOp::Context(ctx.trim().parse().map_err(|_| malformed("bad context"))?),
        ["ctrl", val] => TraceOp::Control(hex(val).ok_or_else(|| malformed("bad control value"))?),
        [kind @ ("r" | "w"), asi_value, vaddr] => {
            let asi = hex(asi_value).ok_or_else(|| malformed("bad ASI"))?;
            let vaddr = hex(vaddr).ok_or_else(|| malformed("bad virtual address"))?;
            if *kind == "r" {
                TraceOp::Read { asi, vaddr }
            } else {
                TraceOp::Write { asi, vaddr }
            }
        }
        ["fsr"] => TraceOp::FaultStatus,
        ["flush"] => TraceOp::Flush,
        _ => return Err(malformed("unknown command")),
    };
    Ok(op)
}

/// Parse a trace. Malformed lines are logged and skipped.
pub fn parse<R: BufRead>(reader: R) -> Result<Vec<TraceOp>, TraceError> {
    let mut ops = Vec::new();
    let mut saw_header = false;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            saw_header |= line.trim() == HEADER_LINE;
            continue;
        }
        match parse_line(idx + 1, &line) {
            Ok(op) => ops.push(op),
            Err(e) => log::warn!("Ignoring trace line: {}", e),
        }
    }
    if !saw_header {
        log::warn!("Trace has no {:?} header", HEADER_LINE);
    }
    log::info!("Loaded trace: {} operations", ops.len());
    Ok(ops)
}

pub fn load(path: &Path) -> Result<Vec<TraceOp>, TraceError> {
    parse(BufReader::new(File::open(path)?))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub accesses: u64,
    pub faults: u64,
    /// Simulated cycles across all accesses.
    pub cycles: u64,
    /// (FSR, FAR) pairs observed by `fsr` lines.
    pub fault_reads: Vec<(u32, u32)>,
}

/// Drives an MMU with trace operations.
pub struct Runner {
    pub mmu: Mmu<Ram, TrapLog>,
    tables: Option<PageTableBuilder>,
    pub summary: RunSummary,
}

impl Runner {
    pub fn new(mmu: Mmu<Ram, TrapLog>) -> Self {
        Self {
            mmu,
            tables: None,
            summary: RunSummary::default(),
        }
    }

    pub fn run(&mut self, ops: &[TraceOp]) {
        for op in ops {
            if let Err(e) = self.apply(*op) {
                log::warn!("Trace operation {:?} failed: {}", op, e);
            }
        }
    }

    pub fn apply(&mut self, op: TraceOp) -> Result<(), TraceError> {
        match op {
            TraceOp::ContextTable(addr) => {
                let pool = addr.checked_add(CONTEXT_TABLE_BYTES).ok_or(PageTableError::OutOfMemory {
                    needed: CONTEXT_TABLE_BYTES,
                    at: addr,
                })?;
                let builder = PageTableBuilder::new(*self.mmu.geometry(), addr, pool)?;
                self.mmu.write_context_table_ptr(builder.context_table_pointer());
                self.tables = Some(builder);
            }
            TraceOp::Map {
                context,
                vaddr,
                paddr,
                acc,
                cacheable,
                level,
            } => {
                let Some(tables) = self.tables.as_mut() else {
                    log::warn!("map before ctp, ignoring {:#010X}", vaddr);
                    return Ok(());
                };
                tables.map(self.mmu.memory_mut(), context, vaddr, paddr, acc, cacheable, level)?;
            }
            TraceOp::Context(ctx) => self.mmu.write_context(ctx),
            TraceOp::Control(val) => self.mmu.write_control(val),
            TraceOp::Read { asi, vaddr } => {
                let mut buf = [0u8; 4];
                self.access(asi, vaddr, |adaptor, mmu, access| {
                    adaptor.mem_read(mmu, vaddr, asi, &mut buf, access)
                });
            }
            TraceOp::Write { asi, vaddr } => {
                self.access(asi, vaddr, |adaptor, mmu, access| {
                    adaptor.mem_write(mmu, vaddr, asi, &[0; 4], access)
                });
            }
            TraceOp::FaultStatus => {
                let fsr = self.mmu.read_fault_status();
                let far = self.mmu.read_fault_address();
                println!("FSR = {:#010X}  FAR = {:#010X}", fsr, far);
                self.summary.fault_reads.push((fsr, far));
            }
            TraceOp::Flush => self.mmu.flush(),
        }
        Ok(())
    }

    fn access(
        &mut self,
        asi_value: u8,
        vaddr: u32,
        f: impl FnOnce(leon_mmu::TlbAdaptor, &mut Mmu<Ram, TrapLog>, &mut MemAccess) -> bool,
    ) {
        let adaptor = match AccessPath::from_asi(asi_value) {
            _ if asi_value == asi::DIAG_ITLB => self.mmu.itlb_adaptor(),
            _ if asi_value == asi::DIAG_DTLB => self.mmu.dtlb_adaptor(),
            AccessPath::Instruction => self.mmu.itlb_adaptor(),
            AccessPath::Data => self.mmu.dtlb_adaptor(),
        };
        let mut access = MemAccess::new();
        let ok = f(adaptor, &mut self.mmu, &mut access);
        self.summary.accesses += 1;
        self.summary.cycles += access.delay;
        if !ok {
            self.summary.faults += 1;
        }
        log::debug!(
            "asi {:#04X} {:#010X}: {} ({} cycles)",
            asi_value,
            vaddr,
            if ok { "ok" } else { "failed" },
            access.delay
        );
    }
}
