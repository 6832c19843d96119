//! Initiator that mirrors a memory range into a private cache and relies on
//! a standing write snoop to learn when the mirror goes stale.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, info};

use crate::{
    Command, DirectAccessGrant, InvalidationObserver, LocalClock, OriginId, Process,
    ProtocolViolation, RequestHandle, SimContext, SimTime, SnoopSetup, Suspend, TraceEvent,
    ACCESS_UNIT_BYTES,
};

/// Validity flag of the cached range, shared with the router.
#[derive(Debug)]
pub struct CacheWindow {
    start: u64,
    end: u64,
    valid: Cell<bool>,
    invalidations: Cell<u32>,
}

impl CacheWindow {
    /// Window over `start..=end`, initially invalid.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            valid: Cell::new(false),
            invalidations: Cell::new(0),
        }
    }

    /// `true` while no overlapping invalidation arrived since the last fill.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    /// Overlapping invalidations observed so far.
    #[must_use]
    pub fn invalidations(&self) -> u32 {
        self.invalidations.get()
    }
}

impl InvalidationObserver for CacheWindow {
    fn invalidate_direct_access(&self, start: u64, end: u64) {
        if start <= self.end && end >= self.start {
            debug!(target: "caching_client", start, end, "cache window invalidated");
            self.valid.set(false);
            self.invalidations.set(self.invalidations.get() + 1);
        }
    }
}

/// Where a [`CachingClient`] is in its request/fill/execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachingState {
    /// About to ask for a snoop grant over the window.
    RequestSnoop,
    /// Holding a fresh grant, about to copy it into the cache.
    FillCache,
    /// Executing steps out of the cache.
    ExecuteLoop,
}

/// Client that executes fixed-latency steps out of a cached copy of memory.
#[derive(Debug)]
pub struct CachingClient {
    name: String,
    origin: OriginId,
    clock: LocalClock,
    window: Rc<CacheWindow>,
    cache: Box<[u8]>,
    state: CachingState,
    pending: Option<(RequestHandle, DirectAccessGrant)>,
    offset: usize,
    executed: u32,
    step_latency: SimTime,
    step_limit: u32,
    fills: u32,
}

impl CachingClient {
    /// Client caching `start..=end` and running `step_limit` steps.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        quantum: SimTime,
        start: u64,
        end: u64,
        step_latency: SimTime,
        step_limit: u32,
    ) -> Self {
        let len = usize::try_from(end.saturating_sub(start) + 1).unwrap_or(0);
        Self {
            name: name.into(),
            origin: 0,
            clock: LocalClock::new(quantum),
            window: Rc::new(CacheWindow::new(start, end)),
            cache: vec![0; len].into_boxed_slice(),
            state: CachingState::RequestSnoop,
            pending: None,
            offset: 0,
            executed: 0,
            step_latency,
            step_limit,
            fills: 0,
        }
    }

    /// Observer to bind on the router.
    #[must_use]
    pub fn observer(&self) -> Rc<dyn InvalidationObserver> {
        self.window.clone()
    }

    /// Records the origin id the router assigned.
    pub const fn attach(&mut self, origin: OriginId) {
        self.origin = origin;
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CachingState {
        self.state
    }

    /// Shared validity window.
    #[must_use]
    pub fn window(&self) -> &CacheWindow {
        &self.window
    }

    /// Cached bytes.
    #[must_use]
    pub fn cache(&self) -> &[u8] {
        &self.cache
    }

    /// Steps executed so far.
    #[must_use]
    pub const fn executed(&self) -> u32 {
        self.executed
    }

    /// Times the cache has been filled.
    #[must_use]
    pub const fn fills(&self) -> u32 {
        self.fills
    }

    /// Local clock.
    #[must_use]
    pub const fn clock(&self) -> &LocalClock {
        &self.clock
    }

    fn request_snoop(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ProtocolViolation> {
        let (start, end) = (self.window.start, self.window.end);
        let handle = ctx.pool.allocate();
        ctx.pool.acquire(handle)?;
        let request = ctx.pool.get_mut(handle)?;
        request.command = Command::Read;
        request.address = start;
        request.snoop = Some(SnoopSetup::new(end));

        let Some(grant) = ctx.router.grant(request)? else {
            ctx.pool.release(handle)?;
            return Err(ProtocolViolation::SnoopGrantDenied { start, end });
        };
        // Our own grant broadcasts an invalidation over the window first.
        self.window.valid.set(true);

        ctx.trace.on_event(
            self.origin,
            TraceEvent::SnoopArmed {
                start: grant.start_address,
                end: grant.end_address,
                at: self.clock.current_time(ctx.now),
            },
        );
        self.pending = Some((handle, grant));
        self.state = CachingState::FillCache;
        Ok(())
    }

    fn fill_cache(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ProtocolViolation> {
        let Some((handle, grant)) = self.pending.take() else {
            self.state = CachingState::RequestSnoop;
            return Ok(());
        };
        let read = grant.view().read(0, &mut self.cache);
        ctx.pool.get_mut(handle)?.snoop = None;
        ctx.pool.release(handle)?;
        read.map_err(|reason| ProtocolViolation::ViewUnavailable {
            start: grant.start_address,
            end: grant.end_address,
            reason,
        })?;

        self.fills += 1;
        self.offset = 0;
        self.state = CachingState::ExecuteLoop;
        info!(target: "caching_client", client = %self.name, fill = self.fills, "cache filled");
        Ok(())
    }

    fn step(&mut self, ctx: &mut SimContext<'_>) {
        let mut word = [0; ACCESS_UNIT_BYTES];
        if let Some(bytes) = self.cache.get(self.offset..self.offset + ACCESS_UNIT_BYTES) {
            word.copy_from_slice(bytes);
        }
        self.clock.advance(self.step_latency);
        ctx.trace.on_event(
            self.origin,
            TraceEvent::CachedInstruction {
                offset: self.offset as u64,
                word: u32::from_le_bytes(word),
                at: self.clock.current_time(ctx.now),
            },
        );
        self.executed += 1;
        self.offset += ACCESS_UNIT_BYTES;
        if self.offset + ACCESS_UNIT_BYTES > self.cache.len() {
            self.offset = 0;
        }
    }
}

impl Process for CachingClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, ctx: &mut SimContext<'_>) -> Result<Suspend, ProtocolViolation> {
        loop {
            match self.state {
                CachingState::RequestSnoop => self.request_snoop(ctx)?,
                CachingState::FillCache => self.fill_cache(ctx)?,
                CachingState::ExecuteLoop => {
                    if self.executed >= self.step_limit {
                        return Ok(Suspend::Finished);
                    }
                    if !self.window.is_valid() {
                        ctx.trace.on_event(
                            self.origin,
                            TraceEvent::CacheInvalidated {
                                at: self.clock.current_time(ctx.now),
                            },
                        );
                        self.state = CachingState::RequestSnoop;
                        continue;
                    }
                    self.step(ctx);
                    if self.clock.needs_sync() {
                        let at = self.clock.sync(ctx.now);
                        ctx.trace.on_event(self.origin, TraceEvent::Synchronized { at });
                        return Ok(Suspend::Until(at));
                    }
                }
            }
        }
    }
}
