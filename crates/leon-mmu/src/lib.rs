pub mod bus;
pub mod config;
pub mod memory;
pub mod mmu;

pub use bus::{ExceptionSink, MemAccess, MemoryInterface, TrapLog};
pub use config::{ConfigError, MmuConfig, PageSize, Replacement, TlbType};
pub use memory::Ram;
pub use mmu::{AccessPath, Mmu, MmuFault, TlbAdaptor, TlbOutcome, Translation};
