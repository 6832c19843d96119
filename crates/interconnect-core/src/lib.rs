//! Core interconnect model for the snooping shared-memory simulator.

/// Simulation time and fixed latencies.
pub mod timing;
pub use timing::{SimTime, CACHED_STEP_LATENCY, DEFAULT_GLOBAL_QUANTUM, MEMORY_ACCESS_LATENCY};

/// Response statuses and fatal protocol violations.
pub mod fault;
pub use fault::{AccessError, ProtocolViolation, ResponseStatus};

/// Transaction payload and its reference-counted pool.
pub mod payload;
pub use payload::{Command, Request, RequestHandle, RequestPool, SnoopSetup, ACCESS_UNIT_BYTES};

/// Per-initiator local time with a global quantum.
pub mod clock;
pub use clock::LocalClock;

/// Forward/backward transport contracts and trace hooks.
pub mod api;
pub use api::{
    BackwardPath, InvalidationObserver, NullTrace, OriginId, Target, TargetId, TraceEvent,
    TraceSink,
};

/// Memory targets, direct views and write snoops.
pub mod memory;
pub use memory::{
    validate_burst, validate_byte_enable, validate_regular_access, validate_word_address,
    BackingStore, DirectAccessGrant, DirectView, MemoryBlock, SnoopRegistration, ViewError,
    DEFAULT_MEMORY_WORDS,
};

/// Two-target address router.
pub mod router;
pub use router::{
    AddressMap, AddressRouter, InvalidSelectBit, DEFAULT_SELECT_BIT, ROUTER_TARGET_COUNT,
};

/// Cooperative scheduler.
pub mod sched;
pub use sched::{EventId, Process, ProcessId, RunSummary, Scheduler, SimContext, Suspend};

/// Grant-table and caching initiators.
pub mod initiator;
pub use initiator::{
    AccessOutcome, CacheWindow, CachingClient, CachingState, DirectAccessTable, TableClient,
    TableClientStats,
};

/// Run configuration.
pub mod config;
pub use config::{
    SimConfig, DEFAULT_CACHED_STEP_LIMIT, DEFAULT_SNOOP_RANGE, DEFAULT_TABLE_ACCESSES,
    DEFAULT_TABLE_ADDRESS_WORDS,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
