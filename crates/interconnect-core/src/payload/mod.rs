//! Request objects exchanged between initiators, the router and targets.

/// Recycling request arena with generation-checked handles.
pub mod pool;

pub use pool::{RequestHandle, RequestPool};

use crate::ResponseStatus;

/// Bytes moved by every regular access.
pub const ACCESS_UNIT_BYTES: usize = 4;

/// Transfer direction of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Command {
    /// Target to initiator.
    #[default]
    Read,
    /// Initiator to target.
    Write,
}

impl Command {
    /// Lower-case name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Asks a target to arm a standing write snoop from the request address
/// through `end_address` (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SnoopSetup {
    /// Inclusive end of the snooped range.
    pub end_address: u64,
    /// Only an active setup is honoured by targets.
    pub active: bool,
}

impl SnoopSetup {
    /// Active setup ending at `end_address`.
    #[must_use]
    pub const fn new(end_address: u64) -> Self {
        Self {
            end_address,
            active: true,
        }
    }
}

/// Unit of work carried along the forward and backward paths.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    /// Transfer direction.
    pub command: Command,
    /// Byte address, rewritten to target-local space by the router.
    pub address: u64,
    /// Data buffer; its length is the data length of the request.
    pub data: Vec<u8>,
    /// Streaming width in bytes.
    pub streaming_width: usize,
    /// Byte-enable mask. Must be `None`; partial-byte access is unsupported.
    pub byte_enable: Option<Vec<u8>>,
    /// Set by a target to hint that a direct-access grant is available.
    pub dmi_allowed: bool,
    /// Completion status.
    pub response_status: ResponseStatus,
    /// Optional snoop setup payload for grant calls.
    pub snoop: Option<SnoopSetup>,
}

impl Request {
    /// Restores every field to its mandatory initial value.
    pub fn reset(&mut self) {
        self.command = Command::Read;
        self.address = 0;
        self.data.clear();
        self.streaming_width = 0;
        self.byte_enable = None;
        self.dmi_allowed = false;
        self.response_status = ResponseStatus::Incomplete;
        self.snoop = None;
    }

    /// Populates a single-word regular access with the mandatory initial
    /// response fields.
    pub fn prepare_word(&mut self, command: Command, address: u64, word: u32) {
        self.command = command;
        self.address = address;
        self.data.clear();
        self.data.extend_from_slice(&word.to_le_bytes());
        self.streaming_width = ACCESS_UNIT_BYTES;
        self.byte_enable = None;
        self.dmi_allowed = false;
        self.response_status = ResponseStatus::Incomplete;
    }

    /// Data length in bytes.
    #[must_use]
    pub fn data_length(&self) -> usize {
        self.data.len()
    }

    /// Reads the data buffer as a little-endian word.
    #[must_use]
    pub fn data_word(&self) -> Option<u32> {
        let bytes: [u8; ACCESS_UNIT_BYTES] = self.data.get(..ACCESS_UNIT_BYTES)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Returns the snoop setup only when it is present and active.
    #[must_use]
    pub fn active_snoop(&self) -> Option<SnoopSetup> {
        self.snoop.filter(|setup| setup.active)
    }
}
