//! Deterministic trace fingerprint for cross-host comparison of seeded runs.

use interconnect_core::{
    AddressRouter, CachingClient, Command, MemoryBlock, RequestPool, Scheduler, SimConfig,
    TableClient, TraceEvent,
};
use proptest as _;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

const fn command_tag(command: Command) -> u8 {
    match command {
        Command::Read => 0,
        Command::Write => 1,
    }
}

fn hash_event(hash: &mut u64, origin: usize, event: &TraceEvent) {
    hash_bytes(hash, &(origin as u64).to_le_bytes());
    match *event {
        TraceEvent::RegularAccess { command, address, data, at, delay } => {
            hash_bytes(hash, &[0x10, command_tag(command)]);
            hash_bytes(hash, &address.to_le_bytes());
            hash_bytes(hash, &data.to_le_bytes());
            hash_bytes(hash, &at.as_ps().to_le_bytes());
            hash_bytes(hash, &delay.as_ps().to_le_bytes());
        }
        TraceEvent::DirectAccess { command, address, data, at } => {
            hash_bytes(hash, &[0x11, command_tag(command)]);
            hash_bytes(hash, &address.to_le_bytes());
            hash_bytes(hash, &data.to_le_bytes());
            hash_bytes(hash, &at.as_ps().to_le_bytes());
        }
        TraceEvent::AccessFailed { command, address, status, at } => {
            hash_bytes(hash, &[0x12, command_tag(command), status.code().to_le_bytes()[0]]);
            hash_bytes(hash, &address.to_le_bytes());
            hash_bytes(hash, &at.as_ps().to_le_bytes());
        }
        TraceEvent::GrantAdded { start, end, write_allowed, at } => {
            hash_bytes(hash, &[0x13, u8::from(write_allowed)]);
            hash_bytes(hash, &start.to_le_bytes());
            hash_bytes(hash, &end.to_le_bytes());
            hash_bytes(hash, &at.as_ps().to_le_bytes());
        }
        TraceEvent::GrantDenied { address, command, at } => {
            hash_bytes(hash, &[0x14, command_tag(command)]);
            hash_bytes(hash, &address.to_le_bytes());
            hash_bytes(hash, &at.as_ps().to_le_bytes());
        }
        TraceEvent::SnoopArmed { start, end, at } => {
            hash_bytes(hash, &[0x15]);
            hash_bytes(hash, &start.to_le_bytes());
            hash_bytes(hash, &end.to_le_bytes());
            hash_bytes(hash, &at.as_ps().to_le_bytes());
        }
        TraceEvent::CachedInstruction { offset, word, at } => {
            hash_bytes(hash, &[0x16]);
            hash_bytes(hash, &offset.to_le_bytes());
            hash_bytes(hash, &word.to_le_bytes());
            hash_bytes(hash, &at.as_ps().to_le_bytes());
        }
        TraceEvent::CacheInvalidated { at } => {
            hash_bytes(hash, &[0x17]);
            hash_bytes(hash, &at.as_ps().to_le_bytes());
        }
        TraceEvent::Synchronized { at } => {
            hash_bytes(hash, &[0x18]);
            hash_bytes(hash, &at.as_ps().to_le_bytes());
        }
    }
}

fn fingerprint(seed: u64) -> String {
    let config = SimConfig {
        seed,
        ..SimConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut router = AddressRouter::new(config.address_map);
    for name in ["memory1", "memory2"] {
        router.bind_target(Box::new(MemoryBlock::with_random_contents(
            name,
            config.memory_words,
            config.memory_latency,
            &mut rng,
        )));
    }
    router.end_of_elaboration().expect("reference topology has two targets");

    let mut cache = CachingClient::new(
        "caching_initiator",
        config.global_quantum,
        config.snoop_start,
        config.snoop_end,
        config.cached_step_latency,
        config.cached_step_limit,
    );
    let mut table = TableClient::new("initiator", config.global_quantum, config.seed)
        .with_workload(config.table_accesses, config.table_address_words);
    let origin = router.bind_initiator(cache.observer());
    cache.attach(origin);
    let origin = router.bind_initiator(table.observer());
    table.attach(origin);

    let mut scheduler = Scheduler::new();
    scheduler.spawn(Box::new(cache));
    scheduler.spawn(Box::new(table));

    let mut pool = RequestPool::new();
    let mut trace: Vec<(usize, TraceEvent)> = Vec::new();
    let summary = scheduler
        .run(&mut router, &mut pool, &mut trace, None)
        .expect("run should complete");

    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    hash_bytes(&mut hash, &summary.end_time.as_ps().to_le_bytes());
    for (origin, event) in &trace {
        hash_event(&mut hash, *origin, event);
    }
    let failures = trace
        .iter()
        .filter(|(_, event)| matches!(event, TraceEvent::AccessFailed { .. }))
        .count();
    hash_bytes(&mut hash, &(failures as u64).to_le_bytes());

    format!("{hash:016x}")
}

fn main() {
    let seed = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);
    println!("{}", fingerprint(seed));
}
