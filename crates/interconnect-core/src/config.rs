//! Run configuration for the reference snooping topology.

use crate::{
    AddressMap, SimTime, CACHED_STEP_LATENCY, DEFAULT_GLOBAL_QUANTUM, DEFAULT_MEMORY_WORDS,
    MEMORY_ACCESS_LATENCY,
};

/// Default number of cached steps before the caching client stops.
pub const DEFAULT_CACHED_STEP_LIMIT: u32 = 100;

/// Default number of accesses issued by the table client.
pub const DEFAULT_TABLE_ACCESSES: u32 = 64;

/// Default number of distinct words the table client addresses.
pub const DEFAULT_TABLE_ADDRESS_WORDS: u32 = 128;

/// Default inclusive range watched by the caching client.
pub const DEFAULT_SNOOP_RANGE: (u64, u64) = (0x100, 0x17F);

/// Immutable configuration for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SimConfig {
    /// Bound on each client's local-time divergence.
    pub global_quantum: SimTime,
    /// Per-access latency of every memory block.
    pub memory_latency: SimTime,
    /// Words per memory block.
    pub memory_words: usize,
    /// Router address mapping.
    pub address_map: AddressMap,
    /// Inclusive global start of the caching client's snoop range.
    pub snoop_start: u64,
    /// Inclusive global end of the caching client's snoop range.
    pub snoop_end: u64,
    /// Latency of one cached step.
    pub cached_step_latency: SimTime,
    /// Cached steps executed before the caching client stops.
    pub cached_step_limit: u32,
    /// Accesses issued by the table client.
    pub table_accesses: u32,
    /// Distinct words the table client picks addresses from.
    pub table_address_words: u32,
    /// Seed for memory contents and the table client's access pattern.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            global_quantum: DEFAULT_GLOBAL_QUANTUM,
            memory_latency: MEMORY_ACCESS_LATENCY,
            memory_words: DEFAULT_MEMORY_WORDS,
            address_map: AddressMap::default(),
            snoop_start: DEFAULT_SNOOP_RANGE.0,
            snoop_end: DEFAULT_SNOOP_RANGE.1,
            cached_step_latency: CACHED_STEP_LATENCY,
            cached_step_limit: DEFAULT_CACHED_STEP_LIMIT,
            table_accesses: DEFAULT_TABLE_ACCESSES,
            table_address_words: DEFAULT_TABLE_ADDRESS_WORDS,
            seed: 0,
        }
    }
}

impl SimConfig {
    /// Bytes watched by the caching client.
    #[must_use]
    pub const fn snoop_len(&self) -> u64 {
        self.snoop_end.saturating_sub(self.snoop_start) + 1
    }
}
