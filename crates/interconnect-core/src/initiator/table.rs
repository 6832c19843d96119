//! Initiator that keeps a table of direct-access grants and falls back to
//! the transport path on a miss.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::{
    Command, DirectAccessGrant, InvalidationObserver, LocalClock, OriginId, Process,
    ProtocolViolation, ResponseStatus, SimContext, SimTime, Suspend, TraceEvent,
    DEFAULT_TABLE_ACCESSES, DEFAULT_TABLE_ADDRESS_WORDS,
};

/// Ordered list of granted views. Lookups take the first match; overlapping
/// or duplicate entries may coexist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectAccessTable {
    entries: Vec<DirectAccessGrant>,
}

impl DirectAccessTable {
    /// Empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a grant without deduplication.
    pub fn push(&mut self, grant: DirectAccessGrant) {
        self.entries.push(grant);
    }

    /// First entry covering `address` that permits `command`.
    #[must_use]
    pub fn lookup(&self, address: u64, command: Command) -> Option<&DirectAccessGrant> {
        self.entries
            .iter()
            .find(|grant| grant.contains(address) && grant.allows(command))
    }

    /// Drops every entry overlapping `start..=end`, keeping the rest in
    /// order. Returns the number removed.
    pub fn invalidate(&mut self, start: u64, end: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|grant| !grant.overlaps(start, end));
        before - self.entries.len()
    }

    /// Drops one specific entry.
    pub fn remove(&mut self, grant: &DirectAccessGrant) {
        if let Some(index) = self.entries.iter().position(|entry| entry == grant) {
            self.entries.remove(index);
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the table holds no grants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &DirectAccessGrant> {
        self.entries.iter()
    }
}

impl InvalidationObserver for RefCell<DirectAccessTable> {
    fn invalidate_direct_access(&self, start: u64, end: u64) {
        let removed = self.borrow_mut().invalidate(start, end);
        if removed > 0 {
            debug!(target: "table_client", start, end, removed, "pruned direct-access table");
        }
    }
}

/// How one access was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessOutcome {
    /// Served through a granted view.
    Direct,
    /// Served through the transport path.
    Regular,
    /// The transport path answered with an error status.
    Failed(ResponseStatus),
}

/// Counters kept by a [`TableClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableClientStats {
    /// Accesses served through a view.
    pub direct: u32,
    /// Accesses served through the transport path.
    pub regular: u32,
    /// Transport accesses that failed.
    pub failed: u32,
    /// Grants appended to the table.
    pub grants_added: u32,
    /// Grant requests refused.
    pub grants_denied: u32,
}

/// Random-access initiator that prefers granted views.
#[derive(Debug)]
pub struct TableClient {
    name: String,
    origin: OriginId,
    clock: LocalClock,
    rng: StdRng,
    remaining: u32,
    address_words: u32,
    data: u32,
    table: Rc<RefCell<DirectAccessTable>>,
    stats: TableClientStats,
}

impl TableClient {
    /// Client issuing `accesses` random accesses over `address_words` words.
    #[must_use]
    pub fn new(name: impl Into<String>, quantum: SimTime, seed: u64) -> Self {
        Self {
            name: name.into(),
            origin: 0,
            clock: LocalClock::new(quantum),
            rng: StdRng::seed_from_u64(seed),
            remaining: DEFAULT_TABLE_ACCESSES,
            address_words: DEFAULT_TABLE_ADDRESS_WORDS,
            data: 0,
            table: Rc::new(RefCell::new(DirectAccessTable::new())),
            stats: TableClientStats::default(),
        }
    }

    /// Overrides the number of random accesses and the word span.
    #[must_use]
    pub fn with_workload(mut self, accesses: u32, address_words: u32) -> Self {
        self.remaining = accesses;
        self.address_words = address_words;
        self
    }

    /// Observer to bind on the router.
    #[must_use]
    pub fn observer(&self) -> Rc<dyn InvalidationObserver> {
        self.table.clone()
    }

    /// Records the origin id the router assigned.
    pub const fn attach(&mut self, origin: OriginId) {
        self.origin = origin;
    }

    /// Current grant table.
    #[must_use]
    pub fn table(&self) -> Ref<'_, DirectAccessTable> {
        self.table.borrow()
    }

    /// Running counters.
    #[must_use]
    pub const fn stats(&self) -> TableClientStats {
        self.stats
    }

    /// Last word read or about to be written.
    #[must_use]
    pub const fn data(&self) -> u32 {
        self.data
    }

    /// Sets the word the next write stores.
    pub const fn set_data(&mut self, data: u32) {
        self.data = data;
    }

    /// Local clock.
    #[must_use]
    pub const fn clock(&self) -> &LocalClock {
        &self.clock
    }

    /// Performs one access, preferring the grant table.
    ///
    /// A hit moves data through the view and charges the grant's latency.
    /// A miss goes through the router; an eligible response triggers a grant
    /// request whose result is appended to the table.
    ///
    /// # Errors
    ///
    /// Propagates fatal [`ProtocolViolation`]s from the pool or router.
    pub fn access(
        &mut self,
        ctx: &mut SimContext<'_>,
        address: u64,
        command: Command,
    ) -> Result<AccessOutcome, ProtocolViolation> {
        let hit = self.table.borrow().lookup(address, command).cloned();
        if let Some(grant) = hit {
            let moved = match command {
                Command::Write => grant.write_word(address, self.data),
                Command::Read => grant.read_word(address).map(|word| self.data = word),
            };
            match moved {
                Ok(()) => {
                    self.clock.advance(grant.latency(command));
                    self.stats.direct += 1;
                    ctx.trace.on_event(
                        self.origin,
                        TraceEvent::DirectAccess {
                            command,
                            address,
                            data: self.data,
                            at: self.clock.current_time(ctx.now),
                        },
                    );
                    return Ok(AccessOutcome::Direct);
                }
                Err(error) => {
                    warn!(target: "table_client", client = %self.name, address, %error, "dropping unusable grant");
                    self.table.borrow_mut().remove(&grant);
                }
            }
        }

        self.regular_access(ctx, address, command)
    }

    fn regular_access(
        &mut self,
        ctx: &mut SimContext<'_>,
        address: u64,
        command: Command,
    ) -> Result<AccessOutcome, ProtocolViolation> {
        let handle = ctx.pool.allocate();
        ctx.pool.acquire(handle)?;
        let request = ctx.pool.get_mut(handle)?;
        request.prepare_word(command, address, self.data);

        let issued_at = ctx.now;
        let mut delay = self.clock.local_time();
        ctx.router.transport(request, &mut delay)?;
        self.clock.set(delay);

        let status = request.response_status;
        if status.is_error() {
            warn!(target: "table_client", client = %self.name, address, ?status, "response error from transport");
            self.stats.failed += 1;
            ctx.trace.on_event(
                self.origin,
                TraceEvent::AccessFailed {
                    command,
                    address,
                    status,
                    at: self.clock.current_time(ctx.now),
                },
            );
            ctx.pool.release(handle)?;
            return Ok(AccessOutcome::Failed(status));
        }

        if command == Command::Read {
            self.data = request.data_word().unwrap_or_default();
        }
        self.stats.regular += 1;
        ctx.trace.on_event(
            self.origin,
            TraceEvent::RegularAccess {
                command,
                address,
                data: self.data,
                at: issued_at,
                delay,
            },
        );

        if request.dmi_allowed {
            // Reuse the request to ask for a grant at the same address.
            request.address = address;
            let at = self.clock.current_time(ctx.now);
            match ctx.router.grant(request)? {
                Some(grant) => {
                    self.stats.grants_added += 1;
                    ctx.trace.on_event(
                        self.origin,
                        TraceEvent::GrantAdded {
                            start: grant.start_address,
                            end: grant.end_address,
                            write_allowed: grant.write_allowed,
                            at,
                        },
                    );
                    self.table.borrow_mut().push(grant);
                }
                None => {
                    self.stats.grants_denied += 1;
                    ctx.trace.on_event(self.origin, TraceEvent::GrantDenied { address, command, at });
                }
            }
        }

        ctx.pool.release(handle)?;
        Ok(AccessOutcome::Regular)
    }
}

impl Process for TableClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, ctx: &mut SimContext<'_>) -> Result<Suspend, ProtocolViolation> {
        while self.remaining > 0 {
            self.remaining -= 1;

            let word = self.rng.gen_range(0..self.address_words.max(1));
            let command = if self.rng.gen_bool(0.5) {
                Command::Write
            } else {
                Command::Read
            };
            let address = u64::from(word) << 2;
            if command == Command::Write {
                self.data = word << 2;
            }

            self.access(ctx, address, command)?;

            if self.clock.needs_sync() {
                let at = self.clock.sync(ctx.now);
                ctx.trace.on_event(self.origin, TraceEvent::Synchronized { at });
                return Ok(Suspend::Until(at));
            }
        }
        Ok(Suspend::Finished)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{AccessOutcome, DirectAccessTable, TableClient};
    use crate::{
        AddressMap, AddressRouter, BackingStore, Command, DirectAccessGrant, DirectView,
        InvalidationObserver, MemoryBlock, Process, RequestPool, ResponseStatus, SimContext,
        SimTime, Suspend, TraceEvent, DEFAULT_MEMORY_WORDS, MEMORY_ACCESS_LATENCY,
    };

    fn grant(store: &BackingStore, start: u64, end: u64, write: bool) -> DirectAccessGrant {
        let mut grant = DirectAccessGrant::new(DirectView::new(store, 0), start, end, SimTime::from_ns(10));
        if write {
            grant.allow_read_write();
        } else {
            grant.allow_read();
        }
        grant
    }

    fn store() -> BackingStore {
        Rc::new(RefCell::new(vec![0; 0x400].into_boxed_slice()))
    }

    fn router() -> AddressRouter {
        let mut router = AddressRouter::new(AddressMap::default());
        for name in ["memory1", "memory2"] {
            router.bind_target(Box::new(MemoryBlock::new(name, DEFAULT_MEMORY_WORDS, MEMORY_ACCESS_LATENCY)));
        }
        router
    }

    fn client(router: &mut AddressRouter) -> TableClient {
        let mut client = TableClient::new("initiator", SimTime::from_us(1), 1);
        let origin = router.bind_initiator(client.observer());
        client.attach(origin);
        client
    }

    #[test]
    fn lookup_is_first_match_with_matching_permission() {
        let backing = store();
        let mut table = DirectAccessTable::new();
        table.push(grant(&backing, 0x00, 0xFF, false));
        table.push(grant(&backing, 0x80, 0x17F, true));
        table.push(grant(&backing, 0x00, 0x1FF, true));

        assert_eq!(table.lookup(0x90, Command::Read), table.iter().next());
        assert_eq!(table.lookup(0x90, Command::Write), table.iter().nth(1));
        assert_eq!(table.lookup(0x1F0, Command::Read), table.iter().nth(2));
        assert_eq!(table.lookup(0x200, Command::Read), None);
    }

    #[test]
    fn invalidate_prunes_overlaps_and_keeps_order() {
        let backing = store();
        let mut table = DirectAccessTable::new();
        table.push(grant(&backing, 0x000, 0x0FF, true));
        table.push(grant(&backing, 0x100, 0x1FF, true));
        table.push(grant(&backing, 0x200, 0x2FF, false));
        table.push(grant(&backing, 0x100, 0x1FF, false));
        table.push(grant(&backing, 0x300, 0x3FF, true));

        assert_eq!(table.invalidate(0x1F0, 0x200), 3);
        let left: Vec<_> = table.iter().map(|g| (g.start_address, g.end_address)).collect();
        assert_eq!(left, vec![(0x000, 0x0FF), (0x300, 0x3FF)]);
    }

    #[test]
    fn invalidate_with_no_entries_is_a_no_op() {
        let table = RefCell::new(DirectAccessTable::new());
        table.invalidate_direct_access(0, u64::MAX);
        assert!(table.borrow().is_empty());
    }

    #[test]
    fn miss_goes_through_transport_then_hit_uses_grant() {
        let mut router = router();
        let mut client = client(&mut router);
        let mut pool = RequestPool::new();
        let mut trace: Vec<(usize, TraceEvent)> = Vec::new();
        let mut ctx = SimContext::new(SimTime::ZERO, &mut router, &mut pool, &mut trace);

        client.set_data(0x44);
        assert_eq!(client.access(&mut ctx, 0x144, Command::Write), Ok(AccessOutcome::Regular));
        assert_eq!(client.table().len(), 1);
        assert_eq!(client.clock().local_time(), MEMORY_ACCESS_LATENCY);

        assert_eq!(client.access(&mut ctx, 0x144, Command::Read), Ok(AccessOutcome::Direct));
        assert_eq!(client.data(), 0x44);
        assert_eq!(client.clock().local_time(), SimTime::from_ns(100));
        assert_eq!(ctx.pool.in_use(), 0);
        drop(ctx);

        assert!(matches!(
            trace.as_slice(),
            [
                (0, TraceEvent::RegularAccess { .. }),
                (0, TraceEvent::GrantAdded { start: 0x100, end: 0x1FF, write_allowed: true, .. }),
                (0, TraceEvent::DirectAccess { command: Command::Read, data: 0x44, .. }),
            ]
        ));
        assert_eq!(client.stats().direct, 1);
    }

    #[test]
    fn read_grant_does_not_serve_writes() {
        let mut router = router();
        let mut client = client(&mut router);
        let mut pool = RequestPool::new();
        let mut trace: Vec<(usize, TraceEvent)> = Vec::new();
        let mut ctx = SimContext::new(SimTime::ZERO, &mut router, &mut pool, &mut trace);

        assert_eq!(client.access(&mut ctx, 0x10, Command::Read), Ok(AccessOutcome::Regular));
        assert_eq!(client.access(&mut ctx, 0x10, Command::Write), Ok(AccessOutcome::Regular));
        assert_eq!(client.access(&mut ctx, 0x10, Command::Write), Ok(AccessOutcome::Direct));
        assert_eq!(client.table().len(), 2);
    }

    #[test]
    fn transport_error_is_recoverable() {
        let mut router = router();
        let mut client = client(&mut router);
        let mut pool = RequestPool::new();
        let mut trace: Vec<(usize, TraceEvent)> = Vec::new();
        let mut ctx = SimContext::new(SimTime::ZERO, &mut router, &mut pool, &mut trace);

        assert_eq!(
            client.access(&mut ctx, 0x102, Command::Read),
            Ok(AccessOutcome::Failed(ResponseStatus::AddressError))
        );
        assert!(client.table().is_empty());
        assert_eq!(client.stats().failed, 1);
        assert_eq!(ctx.pool.in_use(), 0);
    }

    #[test]
    fn dropped_store_falls_back_to_transport() {
        let mut router = router();
        let mut client = client(&mut router);
        let backing = store();
        client.table.borrow_mut().push(grant(&backing, 0, 0x1FF, true));
        drop(backing);

        let mut pool = RequestPool::new();
        let mut trace: Vec<(usize, TraceEvent)> = Vec::new();
        let mut ctx = SimContext::new(SimTime::ZERO, &mut router, &mut pool, &mut trace);
        assert_eq!(client.access(&mut ctx, 0x20, Command::Read), Ok(AccessOutcome::Regular));
        assert_eq!(client.table().len(), 1);
        assert!(client.table().iter().all(|g| g.view().is_live()));
    }

    #[test]
    fn resume_yields_at_quantum_and_finishes_after_workload() {
        let mut router = router();
        let mut client = TableClient::new("initiator", SimTime::from_ns(100), 3).with_workload(4, 128);
        let origin = router.bind_initiator(client.observer());
        client.attach(origin);

        let mut pool = RequestPool::new();
        let mut trace: Vec<(usize, TraceEvent)> = Vec::new();
        let mut now = SimTime::ZERO;
        let mut yields = 0;
        loop {
            let mut ctx = SimContext::new(now, &mut router, &mut pool, &mut trace);
            match client.resume(&mut ctx).expect("no violation") {
                Suspend::Until(at) => {
                    assert!(at > now);
                    now = at;
                    yields += 1;
                }
                Suspend::Finished => break,
                Suspend::WaitEvent(_) => unreachable!("table client never waits on events"),
            }
        }
        assert!(yields >= 1);
        let stats = client.stats();
        assert_eq!(stats.direct + stats.regular + stats.failed, 4);
    }
}
