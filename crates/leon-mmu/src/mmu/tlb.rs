//! TLB, the page descriptor cache.
//!
//! Fully associative store of resolved translations, keyed by virtual page
//! number. Each resident entry occupies one numbered slot (0..capacity);
//! slot numbers index the hit counters and the diagnostic interface.
//!
//! Entry format:
//!   context      context register value at the time of the walk
//!   pte          resolved PTE (PPN[31:8], C, M, R, ACC, ET)
//!   offset_mask  page size - 1 (0xFFF / 0x3FFFF / 0xFFFFFF)
//!   lru          recency marker, larger is more recent

use std::collections::BTreeMap;

use crate::config::Replacement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedTranslation {
    pub context: u32,
    pub pte: u32,
    pub tlb_slot: u32,
    pub lru: u64,
    pub offset_mask: u32,
}

/// Result of probing the store for a VPN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbProbe {
    Hit(CachedTranslation),
    /// VPN resident, but tagged with another context.
    ContextMiss,
    Miss,
}

/// Access counters of one store. Shared by both paths in combined mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlbStats {
    /// Hits per slot.
    pub hits: Vec<u64>,
    pub misses: u64,
    /// Subset of `misses` where the VPN matched but the context did not.
    pub context_misses: u64,
    /// Entry reads: every lookup reads all entries in parallel.
    pub reads: u64,
    /// Entry writes: one per insert.
    pub writes: u64,
}

impl TlbStats {
    pub fn total_hits(&self) -> u64 {
        self.hits.iter().sum()
    }

    /// Hit rate in whole percent, None before the first lookup.
    pub fn hit_rate(&self) -> Option<u64> {
        let total = self.total_hits() + self.misses;
        (total != 0).then(|| self.total_hits() * 100 / total)
    }
}

pub struct TlbCache {
    entries: BTreeMap<u32, CachedTranslation>,
    capacity: u32,
    replacement: Replacement,
    /// Source of recency markers.
    tick: u64,
    /// Modulo-N counter for random replacement.
    random: u32,
    pub stats: TlbStats,
}

impl TlbCache {
    pub fn new(capacity: u32, replacement: Replacement) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
            replacement,
            tick: 0,
            random: 0,
            stats: TlbStats {
                hits: vec![0; capacity as usize],
                ..TlbStats::default()
            },
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity as usize
    }

    pub fn replacement(&self) -> Replacement {
        self.replacement
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up `vpn` for `context`, updating counters. On a hit under LRU
    /// the entry becomes the most recently used.
    pub fn lookup(&mut self, vpn: u32, context: u32) -> TlbProbe {
        self.random = self.random.wrapping_add(1);
        self.stats.reads += u64::from(self.capacity);

        let tick = match self.replacement {
            Replacement::Lru => Some(self.next_tick()),
            Replacement::Random => None,
        };
        match self.entries.get_mut(&vpn) {
            Some(entry) if entry.context == context => {
                if let Some(tick) = tick {
                    entry.lru = tick;
                }
                self.stats.hits[entry.tlb_slot as usize] += 1;
                TlbProbe::Hit(*entry)
            }
            Some(_) => {
                self.stats.misses += 1;
                self.stats.context_misses += 1;
                TlbProbe::ContextMiss
            }
            None => {
                self.stats.misses += 1;
                TlbProbe::Miss
            }
        }
    }

    /// Install a translation for `vpn`. A resident entry for the same VPN
    /// (a context miss) is replaced in its own slot; otherwise a full store
    /// gives up one entry per the replacement policy.
    pub fn insert(&mut self, vpn: u32, context: u32, pte: u32, offset_mask: u32) -> u32 {
        let slot = match self.entries.get(&vpn) {
            Some(stale) => stale.tlb_slot,
            None if self.is_full() => self.evict(),
            None => self.free_slot(),
        };
        let lru = self.next_tick();
        self.entries.insert(
            vpn,
            CachedTranslation {
                context,
                pte,
                tlb_slot: slot,
                lru,
                offset_mask,
            },
        );
        self.stats.writes += 1;
        log::debug!("TLB slot {} <- vpn {:#X} ctx {} pte {:#010X}", slot, vpn, context, pte);
        slot
    }

    fn free_slot(&self) -> u32 {
        (0..self.capacity)
            .find(|slot| !self.entries.values().any(|e| e.tlb_slot == *slot))
            .unwrap_or(0)
    }

    /// Remove one entry per the replacement policy and return its slot.
    fn evict(&mut self) -> u32 {
        let victim = match self.replacement {
            Replacement::Lru => self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.lru)
                .map(|(vpn, e)| (*vpn, e.tlb_slot)),
            Replacement::Random => {
                let slot = self.random % self.capacity;
                self.entries
                    .iter()
                    .find(|(_, e)| e.tlb_slot == slot)
                    .or_else(|| self.entries.iter().next())
                    .map(|(vpn, e)| (*vpn, e.tlb_slot))
            }
        };
        match victim {
            Some((vpn, slot)) => {
                self.entries.remove(&vpn);
                log::debug!("TLB full, evicting slot {} (vpn {:#X})", slot, vpn);
                slot
            }
            None => 0,
        }
    }

    /// Replace the cached PTE of a resident entry, keeping its slot and age.
    pub fn update_pte(&mut self, vpn: u32, pte: u32) -> bool {
        match self.entries.get_mut(&vpn) {
            Some(entry) => {
                entry.pte = pte;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, vpn: u32) -> Option<&CachedTranslation> {
        self.entries.get(&vpn)
    }

    /// The entry occupying `slot`, with its VPN.
    pub fn slot(&self, slot: u32) -> Option<(u32, &CachedTranslation)> {
        self.entries
            .iter()
            .find(|(_, e)| e.tlb_slot == slot)
            .map(|(vpn, e)| (*vpn, e))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &CachedTranslation)> {
        self.entries.iter().map(|(vpn, e)| (*vpn, e))
    }

    pub fn flush(&mut self) {
        self.entries.clear();
    }

    pub fn flush_vpn(&mut self, vpn: u32) -> bool {
        self.entries.remove(&vpn).is_some()
    }
}
