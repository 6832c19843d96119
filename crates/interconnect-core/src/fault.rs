use thiserror::Error;

use crate::{OriginId, RequestHandle, ViewError};

/// Data-path failures a target reports through the response status.
///
/// These never halt a run; the initiator decides whether to log and continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessError {
    /// Address is out of bounds or not aligned to the access unit.
    #[error("address out of range or misaligned")]
    Address,
    /// Partial-byte access was requested through a byte-enable mask.
    #[error("byte-enable access is not supported")]
    ByteEnable,
    /// Data length or streaming width differs from the fixed access unit.
    #[error("data length or streaming width does not match the access unit")]
    Burst,
}

/// Completion status carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(i8)]
pub enum ResponseStatus {
    /// Mandatory initial value; the target has not completed the request.
    #[default]
    Incomplete = 0,
    /// Request completed successfully.
    Ok = 1,
    /// See [`AccessError::Address`].
    AddressError = -2,
    /// See [`AccessError::Burst`].
    BurstError = -4,
    /// See [`AccessError::ByteEnable`].
    ByteEnableError = -5,
}

impl ResponseStatus {
    /// Stable signed status code.
    #[must_use]
    pub const fn code(self) -> i8 {
        self as i8
    }

    /// Converts a stable status code back into a status.
    #[must_use]
    pub const fn from_code(code: i8) -> Option<Self> {
        match code {
            0 => Some(Self::Incomplete),
            1 => Some(Self::Ok),
            -2 => Some(Self::AddressError),
            -4 => Some(Self::BurstError),
            -5 => Some(Self::ByteEnableError),
            _ => None,
        }
    }

    /// Returns `true` only for [`ResponseStatus::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns `true` for every error status.
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.code() < 0
    }

    /// Data-path error behind this status, if any.
    #[must_use]
    pub const fn access_error(self) -> Option<AccessError> {
        match self {
            Self::AddressError => Some(AccessError::Address),
            Self::ByteEnableError => Some(AccessError::ByteEnable),
            Self::BurstError => Some(AccessError::Burst),
            Self::Incomplete | Self::Ok => None,
        }
    }
}

impl From<AccessError> for ResponseStatus {
    fn from(error: AccessError) -> Self {
        match error {
            AccessError::Address => Self::AddressError,
            AccessError::ByteEnable => Self::ByteEnableError,
            AccessError::Burst => Self::BurstError,
        }
    }
}

/// Fatal protocol violations. Any of these halts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ProtocolViolation {
    /// A write command carried an active snoop setup.
    #[error("write snoop requested by a write command at {address:#x}")]
    WriteSnoopRequest {
        /// Start address of the offending request.
        address: u64,
    },
    /// A response came back on the backward path with no recorded origin.
    #[error("no recorded origin for request {handle} on the backward path")]
    UnroutedResponse {
        /// Identity of the orphaned request.
        handle: RequestHandle,
    },
    /// A request named an origin with no bound initiator.
    #[error("origin {origin} has no bound initiator")]
    UnknownOrigin {
        /// The unbound origin id.
        origin: OriginId,
    },
    /// The router was elaborated with the wrong number of targets.
    #[error("router must be bound to exactly two targets, found {bound}")]
    TargetCount {
        /// Number of targets actually bound.
        bound: usize,
    },
    /// Snoop range bounds decode to different targets.
    #[error("snoop range {start:#x}..={end:#x} spans more than one target")]
    CrossTargetSnoop {
        /// Global start address.
        start: u64,
        /// Global end address.
        end: u64,
    },
    /// A snoop-protocol target refused a snoop grant the caller is owed.
    #[error("snoop grant over {start:#x}..={end:#x} was denied")]
    SnoopGrantDenied {
        /// Requested start address.
        start: u64,
        /// Requested end address.
        end: u64,
    },
    /// A request handle was used after its slot was recycled.
    #[error("stale request handle {handle}")]
    StaleRequest {
        /// The stale handle.
        handle: RequestHandle,
    },
    /// A release was issued on a request that holds no references.
    #[error("release of request {handle} with zero references")]
    ReleaseUnderflow {
        /// The over-released handle.
        handle: RequestHandle,
    },
    /// A freshly granted view could not be dereferenced.
    #[error("granted view over {start:#x}..={end:#x} is unusable: {reason}")]
    ViewUnavailable {
        /// Inclusive global start of the grant.
        start: u64,
        /// Inclusive global end of the grant.
        end: u64,
        /// Why the view failed.
        reason: ViewError,
    },
}
