//! Simulated time and the fixed latencies used by the reference components.

use std::fmt;
use std::ops::{Add, AddAssign};

/// Picosecond-resolution point or span of simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time, the start of every run.
    pub const ZERO: Self = Self(0);

    /// Builds a time value from picoseconds.
    #[must_use]
    pub const fn from_ps(ps: u64) -> Self {
        Self(ps)
    }

    /// Builds a time value from nanoseconds.
    #[must_use]
    pub const fn from_ns(ns: u64) -> Self {
        Self(ns.saturating_mul(1_000))
    }

    /// Builds a time value from microseconds.
    #[must_use]
    pub const fn from_us(us: u64) -> Self {
        Self(us.saturating_mul(1_000_000))
    }

    /// Returns the raw picosecond count.
    #[must_use]
    pub const fn as_ps(self) -> u64 {
        self.0
    }

    /// Returns `true` for the zero instant/span.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Adds two spans, clamping at the representable maximum.
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Subtracts `rhs`, clamping at zero.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Add for SimTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ps = self.0;
        if ps == 0 {
            write!(f, "0 s")
        } else if ps % 1_000_000 == 0 {
            write!(f, "{} us", ps / 1_000_000)
        } else if ps % 1_000 == 0 {
            write!(f, "{} ns", ps / 1_000)
        } else {
            write!(f, "{ps} ps")
        }
    }
}

/// Fixed per-access latency of a memory block, both regular and direct.
pub const MEMORY_ACCESS_LATENCY: SimTime = SimTime::from_ns(50);

/// Latency charged for one cached instruction step of the caching client.
pub const CACHED_STEP_LATENCY: SimTime = SimTime::from_ns(50);

/// Default global quantum bounding each client's local-time divergence.
pub const DEFAULT_GLOBAL_QUANTUM: SimTime = SimTime::from_us(1);

#[cfg(test)]
mod tests {
    use super::{SimTime, DEFAULT_GLOBAL_QUANTUM, MEMORY_ACCESS_LATENCY};

    #[test]
    fn unit_constructors_agree() {
        assert_eq!(SimTime::from_ns(1_000), SimTime::from_us(1));
        assert_eq!(SimTime::from_ns(50).as_ps(), 50_000);
        assert_eq!(DEFAULT_GLOBAL_QUANTUM.as_ps(), 1_000_000);
    }

    #[test]
    fn arithmetic_saturates_instead_of_wrapping() {
        let max = SimTime::from_ps(u64::MAX);
        assert_eq!(max + MEMORY_ACCESS_LATENCY, max);
        assert_eq!(SimTime::ZERO.saturating_sub(MEMORY_ACCESS_LATENCY), SimTime::ZERO);

        let mut acc = SimTime::ZERO;
        acc += MEMORY_ACCESS_LATENCY;
        acc += MEMORY_ACCESS_LATENCY;
        assert_eq!(acc, SimTime::from_ns(100));
    }

    #[test]
    fn display_picks_the_coarsest_exact_unit() {
        assert_eq!(SimTime::ZERO.to_string(), "0 s");
        assert_eq!(SimTime::from_ns(50).to_string(), "50 ns");
        assert_eq!(SimTime::from_us(3).to_string(), "3 us");
        assert_eq!(SimTime::from_ps(1_500).to_string(), "1500 ps");
    }
}
