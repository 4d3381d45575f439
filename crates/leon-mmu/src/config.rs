use crate::mmu::AccessPath;

/// Construction-time MMU parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmuConfig {
    /// Instruction TLB entries (2..=32). In combined mode this is the size
    /// of the shared store.
    pub itlb_entries: u32,
    /// Data TLB entries (2..=32). Ignored for storage in combined mode.
    pub dtlb_entries: u32,
    pub tlb_type: TlbType,
    pub replacement: Replacement,
    pub page_size: PageSize,
    /// Cycles charged to an access that hits in the TLB.
    pub hit_cycles: u64,
    /// Count TLB reads/writes for the power model.
    pub power_monitoring: bool,
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self {
            itlb_entries: 8,
            dtlb_entries: 8,
            tlb_type: TlbType::Split,
            replacement: Replacement::Lru,
            page_size: PageSize::K4,
            hit_cycles: 1,
            power_monitoring: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbType {
    /// Separate instruction and data stores.
    Split,
    /// One store shared by both paths.
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    Lru,
    /// Modulo-N counter, advanced on every lookup.
    Random,
}

/// Smallest MMU page, as encoded in the PSZ field of the control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    K4,
    K8,
    K16,
    K32,
}

impl PageSize {
    pub fn from_code(code: u32) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(Self::K4),
            1 => Ok(Self::K8),
            2 => Ok(Self::K16),
            3 => Ok(Self::K32),
            _ => Err(ConfigError::InvalidPageSize(code)),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::K4 => 0,
            Self::K8 => 1,
            Self::K16 => 2,
            Self::K32 => 3,
        }
    }

    pub fn bytes(self) -> u32 {
        0x1000 << self.code()
    }

    /// Index widths used for the page-table lookup at this page size.
    pub fn geometry(self) -> Geometry {
        let (idx1, idx2, idx3, vtag_width) = match self {
            Self::K4 => (8, 6, 6, 20),
            Self::K8 => (7, 6, 6, 19),
            Self::K16 => (6, 6, 6, 18),
            Self::K32 => (4, 7, 6, 17),
        };
        Geometry {
            idx1,
            idx2,
            idx3,
            vtag_width,
        }
    }
}

/// Bit widths of the virtual address tag and the three table indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub idx1: u32,
    pub idx2: u32,
    pub idx3: u32,
    pub vtag_width: u32,
}

impl Geometry {
    /// Virtual page number: the top `vtag_width` bits of the address.
    pub fn vpn(&self, vaddr: u32) -> u32 {
        vaddr >> (32 - self.vtag_width)
    }

    /// Table indices for each walk level. The extraction masks are fixed
    /// (8/6/6 bits) regardless of page size.
    pub fn indices(&self, vpn: u32) -> [u32; 3] {
        [(vpn >> 12) & 0xFF, (vpn >> 6) & 0x3F, vpn & 0x3F]
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{path} TLB must have 2..=32 entries, got {entries}")]
    InvalidTlbEntries { path: AccessPath, entries: u32 },
    #[error("unsupported MMU page size code {0} (expected 0..=3)")]
    InvalidPageSize(u32),
}

pub const MIN_TLB_ENTRIES: u32 = 2;
pub const MAX_TLB_ENTRIES: u32 = 32;

impl MmuConfig {
    pub fn validate(&self) -> Result<Geometry, ConfigError> {
        for (path, entries) in [
            (AccessPath::Instruction, self.itlb_entries),
            (AccessPath::Data, self.dtlb_entries),
        ] {
            if !(MIN_TLB_ENTRIES..=MAX_TLB_ENTRIES).contains(&entries) {
                return Err(ConfigError::InvalidTlbEntries { path, entries });
            }
        }
        Ok(self.page_size.geometry())
    }

    /// Build a config from the defaults, overridden by environment.
    ///
    /// `LEON_MMU_ITLB`, `LEON_MMU_DTLB`: entry counts.
    /// `LEON_MMU_TLB_TYPE`: `split|combined` (or `0|1`).
    /// `LEON_MMU_REPLACEMENT`: `lru|random` (or `0|1`).
    /// `LEON_MMU_PAGE_SIZE`: `0..3` or `4k|8k|16k|32k`.
    /// `LEON_MMU_POWER`: `1|on|true|yes` enables power monitoring.
    ///
    /// Entry counts are not range-checked here; `Mmu::new` does that.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// `from_env` over an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| var(name).map(|raw| (name.to_string(), raw));
        let mut config = Self::default();
        if let Some(v) = overlay(lookup("LEON_MMU_ITLB"), |s| s.parse::<u32>().ok()) {
            config.itlb_entries = v;
        }
        if let Some(v) = overlay(lookup("LEON_MMU_DTLB"), |s| s.parse::<u32>().ok()) {
            config.dtlb_entries = v;
        }
        if let Some(v) = overlay(lookup("LEON_MMU_TLB_TYPE"), parse_tlb_type) {
            config.tlb_type = v;
        }
        if let Some(v) = overlay(lookup("LEON_MMU_REPLACEMENT"), parse_replacement) {
            config.replacement = v;
        }
        if let Some(v) = overlay(lookup("LEON_MMU_PAGE_SIZE"), parse_page_size) {
            config.page_size = v;
        }
        if let Some(v) = overlay(lookup("LEON_MMU_POWER"), parse_flag) {
            config.power_monitoring = v;
        }
        config
    }
}

fn overlay<T>(var: Option<(String, String)>, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let (name, raw) = var?;
    let normalized = raw.trim().to_ascii_lowercase();
    let parsed = parse(&normalized);
    if parsed.is_none() {
        log::warn!("Unknown {} value {:?}; keeping default", name, raw);
    }
    parsed
}

pub fn parse_tlb_type(s: &str) -> Option<TlbType> {
    match s {
        "split" | "0" => Some(TlbType::Split),
        "combined" | "shared" | "1" => Some(TlbType::Combined),
        _ => None,
    }
}

pub fn parse_replacement(s: &str) -> Option<Replacement> {
    match s {
        "lru" | "0" => Some(Replacement::Lru),
        "random" | "rand" | "1" => Some(Replacement::Random),
        _ => None,
    }
}

pub fn parse_page_size(s: &str) -> Option<PageSize> {
    match s {
        "4k" => Some(PageSize::K4),
        "8k" => Some(PageSize::K8),
        "16k" => Some(PageSize::K16),
        "32k" => Some(PageSize::K32),
        _ => s.parse::<u32>().ok().and_then(|c| PageSize::from_code(c).ok()),
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s {
        "" | "0" | "off" | "false" | "no" => Some(false),
        "1" | "on" | "true" | "yes" => Some(true),
        _ => None,
    }
}
