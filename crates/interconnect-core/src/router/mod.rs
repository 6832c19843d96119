//! Two-target address router: forward fan-out, asynchronous return routing,
//! snoop-range translation and invalidation broadcast.

/// Global/local address mapping.
pub mod map;

pub use map::{AddressMap, InvalidSelectBit, DEFAULT_SELECT_BIT};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::{
    BackwardPath, DirectAccessGrant, InvalidationObserver, OriginId, ProtocolViolation, Request,
    RequestHandle, RequestPool, SimTime, SnoopSetup, Target, TargetId,
};

/// Number of downstream targets a router must be bound to.
pub const ROUTER_TARGET_COUNT: usize = 2;

struct UpstreamPort {
    observer: Rc<dyn InvalidationObserver>,
    responses: VecDeque<RequestHandle>,
}

/// Backward path handed to a target for the duration of one call.
struct Broadcast<'a> {
    map: AddressMap,
    target: TargetId,
    upstream: &'a [UpstreamPort],
}

impl BackwardPath for Broadcast<'_> {
    fn invalidate_direct_access(&mut self, start: u64, end: u64) {
        broadcast(self.map, self.upstream, self.target, start, end);
    }
}

fn broadcast(map: AddressMap, upstream: &[UpstreamPort], target: TargetId, start: u64, end: u64) {
    let start = map.reconstruct(start, target);
    let end = map.reconstruct(end, target);
    debug!(target: "router", target_id = target, start, end, "broadcast invalidation");
    for port in upstream {
        port.observer.invalidate_direct_access(start, end);
    }
}

/// Routes requests from any number of initiators to exactly two targets.
pub struct AddressRouter {
    map: AddressMap,
    targets: Vec<Box<dyn Target>>,
    upstream: Vec<UpstreamPort>,
    origins: HashMap<RequestHandle, OriginId>,
    completed: VecDeque<RequestHandle>,
}

impl fmt::Debug for AddressRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressRouter")
            .field("map", &self.map)
            .field("targets", &self.targets.len())
            .field("initiators", &self.upstream.len())
            .field("in_flight", &self.origins.len())
            .finish_non_exhaustive()
    }
}

impl AddressRouter {
    /// Router with no ports bound yet.
    #[must_use]
    pub fn new(map: AddressMap) -> Self {
        Self {
            map,
            targets: Vec::with_capacity(ROUTER_TARGET_COUNT),
            upstream: Vec::new(),
            origins: HashMap::new(),
            completed: VecDeque::new(),
        }
    }

    /// Address mapping in use.
    #[must_use]
    pub const fn map(&self) -> AddressMap {
        self.map
    }

    /// Binds the next downstream target and returns its port index.
    pub fn bind_target(&mut self, target: Box<dyn Target>) -> TargetId {
        self.targets.push(target);
        self.targets.len() - 1
    }

    /// Binds an upstream initiator and returns its origin id. The observer
    /// receives every invalidation broadcast.
    pub fn bind_initiator(&mut self, observer: Rc<dyn InvalidationObserver>) -> OriginId {
        self.upstream.push(UpstreamPort {
            observer,
            responses: VecDeque::new(),
        });
        self.upstream.len() - 1
    }

    /// Number of bound targets.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Number of bound initiators.
    #[must_use]
    pub fn initiator_count(&self) -> usize {
        self.upstream.len()
    }

    /// Setup-time check run once all ports are bound.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::TargetCount`] unless exactly
    /// [`ROUTER_TARGET_COUNT`] targets are bound.
    pub fn end_of_elaboration(&self) -> Result<(), ProtocolViolation> {
        if self.targets.len() == ROUTER_TARGET_COUNT {
            Ok(())
        } else {
            Err(ProtocolViolation::TargetCount {
                bound: self.targets.len(),
            })
        }
    }

    fn decode(&self, address: u64) -> Result<(TargetId, u64), ProtocolViolation> {
        let (target, local) = self.map.decode(address);
        if target < self.targets.len() {
            Ok((target, local))
        } else {
            Err(ProtocolViolation::TargetCount {
                bound: self.targets.len(),
            })
        }
    }

    /// Blocking transport: rewrites the address to target-local space and
    /// dispatches.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::TargetCount`] when the decoded target is
    /// not bound.
    pub fn transport(&mut self, request: &mut Request, delay: &mut SimTime) -> Result<(), ProtocolViolation> {
        let (target, local) = self.decode(request.address)?;
        request.address = local;

        let mut backward = Broadcast {
            map: self.map,
            target,
            upstream: &self.upstream,
        };
        self.targets[target].transport(request, delay, &mut backward);
        Ok(())
    }

    /// Asynchronous forward path. The router takes its own reference to the
    /// request, records `origin` for the return trip and dispatches; the
    /// completed request waits for [`AddressRouter::deliver_backward`].
    ///
    /// Delivered responses queue per origin until the initiator collects
    /// them with [`AddressRouter::take_response`]. A caller using this path
    /// must drain its queue and release its own reference to each handle.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::UnknownOrigin`] when `origin` has no
    /// bound initiator, [`ProtocolViolation::StaleRequest`] for a dead handle
    /// and [`ProtocolViolation::TargetCount`] for an unbound target. Nothing
    /// is dispatched on error.
    pub fn forward(
        &mut self,
        origin: OriginId,
        handle: RequestHandle,
        pool: &mut RequestPool,
        delay: &mut SimTime,
    ) -> Result<(), ProtocolViolation> {
        if origin >= self.upstream.len() {
            return Err(ProtocolViolation::UnknownOrigin { origin });
        }
        let request = pool.get_mut(handle)?;
        let (target, local) = self.decode(request.address)?;
        request.address = local;

        let mut backward = Broadcast {
            map: self.map,
            target,
            upstream: &self.upstream,
        };
        self.targets[target].transport(request, delay, &mut backward);

        pool.acquire(handle)?;
        self.origins.insert(handle, origin);
        self.completed.push_back(handle);
        Ok(())
    }

    /// Routes one response back to the initiator it came from and drops the
    /// router's reference.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::UnroutedResponse`] when no origin was
    /// recorded for `handle` and [`ProtocolViolation::UnknownOrigin`] when
    /// the recorded origin has no bound initiator. The record is kept in the
    /// latter case.
    pub fn backward(&mut self, handle: RequestHandle, pool: &mut RequestPool) -> Result<OriginId, ProtocolViolation> {
        let origin = *self
            .origins
            .get(&handle)
            .ok_or(ProtocolViolation::UnroutedResponse { handle })?;
        let port = self
            .upstream
            .get_mut(origin)
            .ok_or(ProtocolViolation::UnknownOrigin { origin })?;
        port.responses.push_back(handle);
        self.origins.remove(&handle);
        pool.release(handle)?;
        Ok(origin)
    }

    /// Delivers every completed asynchronous request along the backward path.
    /// Returns the number delivered.
    ///
    /// # Errors
    ///
    /// Propagates the first [`AddressRouter::backward`] failure.
    pub fn deliver_backward(&mut self, pool: &mut RequestPool) -> Result<usize, ProtocolViolation> {
        let mut delivered = 0;
        while let Some(handle) = self.completed.pop_front() {
            self.backward(handle, pool)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Next response routed back to `origin`, if any. Unbound origins have
    /// no queue.
    pub fn take_response(&mut self, origin: OriginId) -> Option<RequestHandle> {
        self.upstream.get_mut(origin)?.responses.pop_front()
    }

    /// Responses delivered to `origin` and not yet collected.
    #[must_use]
    pub fn pending_responses(&self, origin: OriginId) -> usize {
        self.upstream.get(origin).map_or(0, |port| port.responses.len())
    }

    /// Requests currently travelling the asynchronous path.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.origins.len()
    }

    /// Forwards a grant request. An active snoop setup has its end address
    /// translated with the same mapping; a granted range is translated back
    /// to global addresses before it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::CrossTargetSnoop`] when the snoop bounds
    /// decode to different targets, or any violation raised by the target.
    pub fn grant(&mut self, request: &mut Request) -> Result<Option<DirectAccessGrant>, ProtocolViolation> {
        let global = request.address;
        let (target, local) = self.decode(global)?;
        request.address = local;

        if let Some(setup) = request.active_snoop() {
            let (end_target, end_local) = self.map.decode(setup.end_address);
            if end_target != target {
                return Err(ProtocolViolation::CrossTargetSnoop {
                    start: global,
                    end: setup.end_address,
                });
            }
            request.snoop = Some(SnoopSetup {
                end_address: end_local,
                ..setup
            });
        }

        let mut backward = Broadcast {
            map: self.map,
            target,
            upstream: &self.upstream,
        };
        let granted = self.targets[target].grant(request, &mut backward)?;

        Ok(granted.map(|mut grant| {
            grant.relocate(
                self.map.reconstruct(grant.start_address, target),
                self.map.reconstruct(grant.end_address, target),
            );
            grant
        }))
    }

    /// Diagnostic access routed like a regular one. Unbound targets move
    /// nothing.
    pub fn debug_access(&mut self, request: &mut Request) -> usize {
        let Ok((target, local)) = self.decode(request.address) else {
            return 0;
        };
        request.address = local;
        self.targets[target].debug_access(request)
    }

    /// Broadcasts an invalidation of `start..=end` on `target` to every
    /// initiator, after rebuilding the global range.
    pub fn invalidate(&self, target: TargetId, start: u64, end: u64) {
        broadcast(self.map, &self.upstream, target, start, end);
    }
}
