//! End-of-simulation statistics and the TLB power model.

use std::fmt::Write;

use crate::config::{MmuConfig, TlbType};
use crate::mmu::tlb::TlbStats;

/// Render the statistics block for a set of named stores.
pub fn render_report(stores: &[(&str, &TlbStats)]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "********************************************");
    let _ = writeln!(out, "* MMU statistic:");
    let _ = writeln!(out, "* -------------------");
    for (name, stats) in stores {
        for (slot, hits) in stats.hits.iter().enumerate() {
            let _ = writeln!(out, "* Hits in {}{}: {}", name, slot, hits);
        }
        let _ = writeln!(out, "* Misses in {}: {}", name, stats.misses);
        if stats.context_misses != 0 {
            let _ = writeln!(out, "*   of which context misses: {}", stats.context_misses);
        }
        if let Some(rate) = stats.hit_rate() {
            let _ = writeln!(out, "* {} hit rate: {}%", name, rate);
        }
    }
    let _ = writeln!(out, "********************************************");
    out
}

// Normalized figures for the controller and one TLB entry.
const STA_POWER_NORM: f64 = 7.19e7;
const INT_POWER_NORM: f64 = 3.74e-8;
const STA_TLB_POWER_NORM: f64 = 6_543_750.0;
const INT_TLB_POWER_NORM: f64 = 2.7225e-9;
const DYN_TLB_READ_ENERGY_NORM: f64 = 1.08125e-11;
const DYN_TLB_WRITE_ENERGY_NORM: f64 = 1.08125e-11;

/// Static power, internal power and per-access energies of the MMU, scaled
/// from the normalized figures by the number of TLB entries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerModel {
    pub sta_power: f64,
    pub int_power: f64,
    pub itlb_read_energy: f64,
    pub itlb_write_energy: f64,
    pub dtlb_read_energy: f64,
    pub dtlb_write_energy: f64,
}

impl PowerModel {
    pub fn new(config: &MmuConfig, clock_period_s: f64) -> Self {
        let (total, itlb, dtlb) = match config.tlb_type {
            TlbType::Split => (
                config.itlb_entries + config.dtlb_entries,
                config.itlb_entries,
                config.dtlb_entries,
            ),
            TlbType::Combined => (config.itlb_entries, config.itlb_entries, config.itlb_entries),
        };
        let (total, itlb, dtlb) = (f64::from(total), f64::from(itlb), f64::from(dtlb));
        let frequency = 1.0 / clock_period_s;
        Self {
            sta_power: STA_POWER_NORM + STA_TLB_POWER_NORM * total,
            int_power: INT_POWER_NORM * frequency + INT_TLB_POWER_NORM * total * frequency,
            itlb_read_energy: DYN_TLB_READ_ENERGY_NORM * itlb,
            itlb_write_energy: DYN_TLB_WRITE_ENERGY_NORM * itlb,
            dtlb_read_energy: DYN_TLB_READ_ENERGY_NORM * dtlb,
            dtlb_write_energy: DYN_TLB_WRITE_ENERGY_NORM * dtlb,
        }
    }

    /// Switching power over `elapsed_s` seconds of simulated time. `dtlb`
    /// is None when the store is shared.
    pub fn switching_power(&self, itlb: &TlbStats, dtlb: Option<&TlbStats>, elapsed_s: f64) -> f64 {
        if elapsed_s <= 0.0 {
            return 0.0;
        }
        let mut energy = self.itlb_read_energy * itlb.reads as f64
            + self.itlb_write_energy * itlb.writes as f64;
        if let Some(dtlb) = dtlb {
            energy += self.dtlb_read_energy * dtlb.reads as f64
                + self.dtlb_write_energy * dtlb.writes as f64;
        }
        energy / elapsed_s
    }
}
