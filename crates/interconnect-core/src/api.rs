//! Transport boundary contracts between initiators, the router and targets.

use crate::{Command, DirectAccessGrant, ProtocolViolation, Request, ResponseStatus, SimTime};

/// Index of an upstream client port on the router.
pub type OriginId = usize;

/// Index of a downstream target port on the router.
pub type TargetId = usize;

/// Forward-path interface every target implements.
pub trait Target {
    /// Serves a regular access, completing it in place and adding the
    /// target's latency to `delay`.
    fn transport(&mut self, request: &mut Request, delay: &mut SimTime, backward: &mut dyn BackwardPath);

    /// Asks for a direct-access grant, optionally arming a write snoop.
    ///
    /// Returns `Ok(None)` when the grant is denied.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolViolation`] for requests the protocol forbids.
    fn grant(
        &mut self,
        request: &mut Request,
        backward: &mut dyn BackwardPath,
    ) -> Result<Option<DirectAccessGrant>, ProtocolViolation>;

    /// Diagnostic transfer that bypasses every protocol check and side
    /// effect. Returns the number of bytes moved.
    fn debug_access(&mut self, request: &mut Request) -> usize;
}

/// Backward path a target uses to revoke direct views it handed out.
pub trait BackwardPath {
    /// Announces that `start..=end` (target-local) must no longer be
    /// accessed through any previously granted view.
    fn invalidate_direct_access(&mut self, start: u64, end: u64);
}

impl BackwardPath for Vec<(u64, u64)> {
    fn invalidate_direct_access(&mut self, start: u64, end: u64) {
        self.push((start, end));
    }
}

/// Upstream observer of invalidation broadcasts.
///
/// Broadcasts may arrive while the observing client is itself in the middle
/// of a call, so observers take `&self` and keep their state in cells.
pub trait InvalidationObserver {
    /// Reacts to an invalidation of the global range `start..=end`.
    fn invalidate_direct_access(&self, start: u64, end: u64);
}

/// Trace events emitted by initiators at access and synchronisation points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TraceEvent {
    /// A regular access completed through the transport path.
    RegularAccess {
        /// Access direction.
        command: Command,
        /// Global address.
        address: u64,
        /// Word read or written.
        data: u32,
        /// Global time when the call was issued.
        at: SimTime,
        /// Local time annotated by the transport call.
        delay: SimTime,
    },
    /// An access was served through a granted view.
    DirectAccess {
        /// Access direction.
        command: Command,
        /// Global address.
        address: u64,
        /// Word read or written.
        data: u32,
        /// Client time after the access.
        at: SimTime,
    },
    /// A regular access completed with an error status.
    AccessFailed {
        /// Access direction.
        command: Command,
        /// Global address.
        address: u64,
        /// Error status returned by the target.
        status: ResponseStatus,
        /// Client time of the failure.
        at: SimTime,
    },
    /// A direct-access grant was added to a client's table.
    GrantAdded {
        /// Inclusive global start.
        start: u64,
        /// Inclusive global end.
        end: u64,
        /// Whether the grant allows writes.
        write_allowed: bool,
        /// Client time.
        at: SimTime,
    },
    /// A grant request was refused by the target.
    GrantDenied {
        /// Requested address.
        address: u64,
        /// Requested direction.
        command: Command,
        /// Client time.
        at: SimTime,
    },
    /// A standing write snoop was granted to a caching client.
    SnoopArmed {
        /// Inclusive global start.
        start: u64,
        /// Inclusive global end.
        end: u64,
        /// Client time.
        at: SimTime,
    },
    /// One step was executed from cached data.
    CachedInstruction {
        /// Byte offset into the cache.
        offset: u64,
        /// Word fetched from the cache.
        word: u32,
        /// Client time.
        at: SimTime,
    },
    /// A caching client noticed its cache was invalidated.
    CacheInvalidated {
        /// Client time.
        at: SimTime,
    },
    /// A client published its local time.
    Synchronized {
        /// Global time the client resumes at.
        at: SimTime,
    },
}

/// Sink for initiator trace events.
pub trait TraceSink {
    /// Records an event in execution order.
    fn on_event(&mut self, origin: OriginId, event: TraceEvent);
}

impl TraceSink for Vec<(OriginId, TraceEvent)> {
    fn on_event(&mut self, origin: OriginId, event: TraceEvent) {
        self.push((origin, event));
    }
}

/// Trace sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn on_event(&mut self, _origin: OriginId, _event: TraceEvent) {}
}

#[cfg(test)]
mod tests {
    use super::{BackwardPath, NullTrace, TraceEvent, TraceSink};
    use crate::SimTime;

    #[test]
    fn vec_backward_path_records_in_order() {
        let mut recorded: Vec<(u64, u64)> = Vec::new();
        recorded.invalidate_direct_access(0x20, 0x33);
        recorded.invalidate_direct_access(0, 0xFF);
        assert_eq!(recorded, vec![(0x20, 0x33), (0, 0xFF)]);
    }

    #[test]
    fn vec_trace_sink_keeps_origin() {
        let mut trace = Vec::new();
        let event = TraceEvent::CacheInvalidated {
            at: SimTime::from_ns(5),
        };
        trace.on_event(1, event);
        NullTrace.on_event(0, event);
        assert_eq!(trace, vec![(1, event)]);
    }
}
