//! Reference snooping topology: two memory blocks behind a router, one
//! caching client and one grant-table client.

use std::io::{self, Write};

use interconnect_core::{
    AddressRouter, CachingClient, MemoryBlock, OriginId, ProtocolViolation, RequestPool,
    RunSummary, Scheduler, SimConfig, SimTime, TableClient, TraceEvent, TraceSink,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber as _;

#[cfg(test)]
use tempfile as _;

/// Instance names of the two memory blocks, in target order.
pub const MEMORY_NAMES: [&str; 2] = ["memory1", "memory2"];

/// Instance name of the caching client.
pub const CACHING_CLIENT_NAME: &str = "caching_initiator";

/// Instance name of the grant-table client.
pub const TABLE_CLIENT_NAME: &str = "initiator";

/// Failures surfaced by a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// The model detected a fatal protocol violation.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    /// The trace log could not be written.
    #[error("failed to write trace log: {0}")]
    Log(#[from] io::Error),
    /// The report could not be serialised.
    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
}

/// Elaborated topology ready to run.
#[derive(Debug)]
pub struct Topology {
    config: SimConfig,
    router: AddressRouter,
    scheduler: Scheduler,
    pool: RequestPool,
    names: Vec<String>,
}

impl Topology {
    /// Builds and elaborates the reference topology from `config`.
    ///
    /// Memory contents and the table client's access pattern are both
    /// derived from `config.seed`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::TargetCount`] if elaboration fails.
    pub fn build(config: SimConfig) -> Result<Self, ProtocolViolation> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut router = AddressRouter::new(config.address_map);
        for name in MEMORY_NAMES {
            router.bind_target(Box::new(MemoryBlock::with_random_contents(
                name,
                config.memory_words,
                config.memory_latency,
                &mut rng,
            )));
        }
        router.end_of_elaboration()?;

        let mut cache = CachingClient::new(
            CACHING_CLIENT_NAME,
            config.global_quantum,
            config.snoop_start,
            config.snoop_end,
            config.cached_step_latency,
            config.cached_step_limit,
        );
        let mut table = TableClient::new(TABLE_CLIENT_NAME, config.global_quantum, config.seed)
            .with_workload(config.table_accesses, config.table_address_words);

        let mut names = Vec::new();
        cache.attach(router.bind_initiator(cache.observer()));
        names.push(CACHING_CLIENT_NAME.to_string());
        table.attach(router.bind_initiator(table.observer()));
        names.push(TABLE_CLIENT_NAME.to_string());

        let mut scheduler = Scheduler::new();
        scheduler.spawn(Box::new(cache));
        scheduler.spawn(Box::new(table));

        info!(target: "snoop_sim", seed = config.seed, "topology elaborated");
        Ok(Self {
            config,
            router,
            scheduler,
            pool: RequestPool::new(),
            names,
        })
    }

    /// Configuration the topology was built from.
    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Client names indexed by origin.
    #[must_use]
    pub fn client_names(&self) -> &[String] {
        &self.names
    }

    /// Requests still allocated in the shared pool.
    #[must_use]
    pub fn requests_in_use(&self) -> usize {
        self.pool.in_use()
    }

    /// Runs until every client finishes or global time would pass `until`.
    ///
    /// # Errors
    ///
    /// Propagates the first [`ProtocolViolation`].
    pub fn run(
        &mut self,
        trace: &mut dyn TraceSink,
        until: Option<SimTime>,
    ) -> Result<RunSummary, ProtocolViolation> {
        self.scheduler.run(&mut self.router, &mut self.pool, trace, until)
    }
}

/// Per-kind event counts gathered from a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TraceTallies {
    /// Accesses served through the transport path.
    pub regular_accesses: u32,
    /// Accesses served through a granted view.
    pub direct_accesses: u32,
    /// Transport accesses answered with an error status.
    pub failed_accesses: u32,
    /// Grants added to a client table.
    pub grants_added: u32,
    /// Grant requests refused.
    pub grants_denied: u32,
    /// Snoop grants received by the caching client.
    pub snoops_armed: u32,
    /// Steps executed out of the cache.
    pub cached_steps: u32,
    /// Cache invalidations noticed by the caching client.
    pub cache_invalidations: u32,
    /// Quantum synchronisations.
    pub synchronisations: u32,
}

impl TraceSink for TraceTallies {
    fn on_event(&mut self, _origin: OriginId, event: TraceEvent) {
        let counter = match event {
            TraceEvent::RegularAccess { .. } => &mut self.regular_accesses,
            TraceEvent::DirectAccess { .. } => &mut self.direct_accesses,
            TraceEvent::AccessFailed { .. } => &mut self.failed_accesses,
            TraceEvent::GrantAdded { .. } => &mut self.grants_added,
            TraceEvent::GrantDenied { .. } => &mut self.grants_denied,
            TraceEvent::SnoopArmed { .. } => &mut self.snoops_armed,
            TraceEvent::CachedInstruction { .. } => &mut self.cached_steps,
            TraceEvent::CacheInvalidated { .. } => &mut self.cache_invalidations,
            TraceEvent::Synchronized { .. } => &mut self.synchronisations,
        };
        *counter += 1;
    }
}

/// One human-readable log line for `event` emitted by client `name`.
#[must_use]
pub fn describe_event(name: &str, event: &TraceEvent) -> String {
    match *event {
        TraceEvent::RegularAccess { command, address, data, at, delay } => format!(
            "{name} completed regular {}, addr = {address:x}, data = {data:x}, time {at} delay = {delay}",
            command.as_str()
        ),
        TraceEvent::DirectAccess { command, address, data, at } => format!(
            "{name} completed DMI {}, addr = {address:x}, data = {data:x}, time {at}",
            command.as_str()
        ),
        TraceEvent::AccessFailed { command, address, status, at } => format!(
            "{name} {} failed with status {}, addr = {address:x}, time {at}",
            command.as_str(),
            status.code()
        ),
        TraceEvent::GrantAdded { start, end, write_allowed, at } => format!(
            "{name} added DMI region {start:x} to {end:x} ({}), time {at}",
            if write_allowed { "read/write" } else { "read" }
        ),
        TraceEvent::GrantDenied { address, command, at } => format!(
            "{name} was denied DMI {} at addr = {address:x}, time {at}",
            command.as_str()
        ),
        TraceEvent::SnoopArmed { start, end, at } => {
            format!("{name} armed write snoop on {start:x} to {end:x}, time {at}")
        }
        TraceEvent::CachedInstruction { offset, word, at } => {
            format!("{name} executing instruction from cache at {at}, offset = {offset:x}, word = {word:x}")
        }
        TraceEvent::CacheInvalidated { at } => format!("{name} cache invalidated at {at}"),
        TraceEvent::Synchronized { at } => format!("{name} synchronised at {at}"),
    }
}

/// Trace sink that tallies every event and optionally writes one log line
/// per event.
///
/// The first write failure is kept and reported by [`LogTrace::finish`];
/// later events are still tallied.
#[derive(Debug)]
pub struct LogTrace<W> {
    writer: Option<W>,
    names: Vec<String>,
    tallies: TraceTallies,
    error: Option<io::Error>,
}

impl<W: Write> LogTrace<W> {
    /// Sink writing lines to `writer`, naming origins with `names`.
    pub fn new(writer: Option<W>, names: &[String]) -> Self {
        Self {
            writer,
            names: names.to_vec(),
            tallies: TraceTallies::default(),
            error: None,
        }
    }

    /// Counts gathered so far.
    #[must_use]
    pub const fn tallies(&self) -> TraceTallies {
        self.tallies
    }

    /// Flushes the writer and returns the tallies.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error hit while logging or flushing.
    pub fn finish(mut self) -> io::Result<TraceTallies> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(self.tallies)
    }
}

impl<W: Write> TraceSink for LogTrace<W> {
    fn on_event(&mut self, origin: OriginId, event: TraceEvent) {
        self.tallies.on_event(origin, event);
        if self.error.is_some() {
            return;
        }
        if let Some(writer) = self.writer.as_mut() {
            let name = self.names.get(origin).map_or("client", String::as_str);
            if let Err(error) = writeln!(writer, "{}", describe_event(name, &event)) {
                self.error = Some(error);
            }
        }
    }
}

/// Outcome of one run, serialisable for `--json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Configuration the run used.
    pub config: SimConfig,
    /// Scheduler summary.
    pub summary: RunSummary,
    /// Event counts.
    pub tallies: TraceTallies,
    /// Requests left allocated in the pool.
    pub requests_in_use: usize,
}

impl RunReport {
    /// Pretty-printed JSON encoding.
    ///
    /// # Errors
    ///
    /// See [`serde_json::to_string_pretty`].
    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builds the topology, runs it and collects a report, writing the trace
/// log to `log` when given.
///
/// # Errors
///
/// See [`SimError`].
pub fn run<W: Write>(config: SimConfig, log: Option<W>, until: Option<SimTime>) -> Result<RunReport, SimError> {
    let mut topology = Topology::build(config)?;
    let mut trace = LogTrace::new(log, topology.client_names());
    let summary = topology.run(&mut trace, until)?;
    let tallies = trace.finish()?;
    info!(
        target: "snoop_sim",
        end_time = %summary.end_time,
        resumptions = summary.resumptions,
        "run complete"
    );
    Ok(RunReport {
        config,
        summary,
        tallies,
        requests_in_use: topology.requests_in_use(),
    })
}
