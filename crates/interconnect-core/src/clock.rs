//! Per-client local time with a bounded divergence from global time.

use crate::SimTime;

/// Private time offset of one client relative to global simulated time.
///
/// A client advances its offset without yielding and only publishes it at a
/// synchronisation point, so two clients may disagree by up to one quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    offset: SimTime,
    quantum: SimTime,
}

impl LocalClock {
    /// Creates a clock with zero offset and the given quantum.
    #[must_use]
    pub const fn new(quantum: SimTime) -> Self {
        Self {
            offset: SimTime::ZERO,
            quantum,
        }
    }

    /// Adds `delta` to the local offset.
    pub fn advance(&mut self, delta: SimTime) {
        self.offset += delta;
    }

    /// Replaces the offset, e.g. with a delay annotated by a target.
    pub fn set(&mut self, offset: SimTime) {
        self.offset = offset;
    }

    /// Current private offset.
    #[must_use]
    pub const fn local_time(&self) -> SimTime {
        self.offset
    }

    /// Configured quantum.
    #[must_use]
    pub const fn quantum(&self) -> SimTime {
        self.quantum
    }

    /// Effective time of this client given the global time `now`.
    #[must_use]
    pub const fn current_time(&self, now: SimTime) -> SimTime {
        now.saturating_add(self.offset)
    }

    /// `true` once the offset has reached the quantum.
    #[must_use]
    pub fn needs_sync(&self) -> bool {
        self.offset >= self.quantum
    }

    /// Publishes the offset and resets it. Returns the global time at which
    /// the client may resume.
    pub fn sync(&mut self, now: SimTime) -> SimTime {
        let resume_at = self.current_time(now);
        self.offset = SimTime::ZERO;
        resume_at
    }
}

#[cfg(test)]
mod tests {
    use super::LocalClock;
    use crate::SimTime;

    #[test]
    fn needs_sync_once_quantum_is_reached() {
        let mut clock = LocalClock::new(SimTime::from_ns(100));
        clock.advance(SimTime::from_ns(50));
        assert!(!clock.needs_sync());
        clock.advance(SimTime::from_ns(50));
        assert!(clock.needs_sync());
    }

    #[test]
    fn sync_publishes_offset_and_resets() {
        let mut clock = LocalClock::new(SimTime::from_us(1));
        clock.advance(SimTime::from_ns(1_050));
        let now = SimTime::from_us(2);

        assert_eq!(clock.current_time(now), SimTime::from_ns(3_050));
        assert_eq!(clock.sync(now), SimTime::from_ns(3_050));
        assert_eq!(clock.local_time(), SimTime::ZERO);
        assert!(!clock.needs_sync());
    }

    #[test]
    fn set_overrides_accumulated_offset() {
        let mut clock = LocalClock::new(SimTime::from_us(1));
        clock.advance(SimTime::from_ns(10));
        clock.set(SimTime::from_ns(60));
        assert_eq!(clock.local_time(), SimTime::from_ns(60));
    }

    #[test]
    fn zero_quantum_always_requests_sync() {
        let clock = LocalClock::new(SimTime::ZERO);
        assert!(clock.needs_sync());
        assert_eq!(clock.quantum(), SimTime::ZERO);
    }
}
