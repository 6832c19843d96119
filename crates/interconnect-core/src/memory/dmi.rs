//! Direct-access grants and the non-owning views they carry.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use thiserror::Error;

use crate::{Command, SimTime, ACCESS_UNIT_BYTES};

/// Shared backing store of a memory block.
pub type BackingStore = Rc<RefCell<Box<[u8]>>>;

/// Failure to dereference a direct view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ViewError {
    /// The memory block behind the view no longer exists.
    #[error("backing store behind the direct view was dropped")]
    Dropped,
    /// The access falls outside the backing store.
    #[error("direct view access at offset {offset:#x} is out of range")]
    OutOfRange {
        /// Offset into the backing store.
        offset: usize,
    },
}

/// Non-owning window into a backing store starting at `base`.
///
/// The view never keeps the store alive; every dereference re-checks it.
#[derive(Clone)]
pub struct DirectView {
    store: Weak<RefCell<Box<[u8]>>>,
    base: usize,
}

impl DirectView {
    /// Creates a view into `store` whose first byte is `store[base]`.
    #[must_use]
    pub fn new(store: &BackingStore, base: usize) -> Self {
        Self {
            store: Rc::downgrade(store),
            base,
        }
    }

    /// `true` while the backing store is alive.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.store.strong_count() > 0
    }

    /// Copies `buf.len()` bytes starting `offset` bytes into the view.
    ///
    /// # Errors
    ///
    /// See [`ViewError`].
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), ViewError> {
        let store = self.store.upgrade().ok_or(ViewError::Dropped)?;
        let store = store.borrow();
        let start = self.base + offset;
        let src = store
            .get(start..start + buf.len())
            .ok_or(ViewError::OutOfRange { offset: start })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Copies `bytes` into the view starting `offset` bytes in.
    ///
    /// # Errors
    ///
    /// See [`ViewError`].
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), ViewError> {
        let store = self.store.upgrade().ok_or(ViewError::Dropped)?;
        let mut store = store.borrow_mut();
        let start = self.base + offset;
        let dst = store
            .get_mut(start..start + bytes.len())
            .ok_or(ViewError::OutOfRange { offset: start })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn same_window(&self, other: &Self) -> bool {
        self.base == other.base && Weak::ptr_eq(&self.store, &other.store)
    }
}

impl fmt::Debug for DirectView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectView")
            .field("base", &self.base)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Permission to access `start_address..=end_address` straight through a
/// view, valid until an overlapping invalidation is observed.
#[derive(Debug, Clone)]
pub struct DirectAccessGrant {
    view: DirectView,
    /// Inclusive first address covered.
    pub start_address: u64,
    /// Inclusive last address covered.
    pub end_address: u64,
    /// Reads through the view are allowed.
    pub read_allowed: bool,
    /// Writes through the view are allowed.
    pub write_allowed: bool,
    /// Latency charged per direct read.
    pub read_latency: SimTime,
    /// Latency charged per direct write.
    pub write_latency: SimTime,
}

impl DirectAccessGrant {
    /// Grant with no access rights over the given range.
    #[must_use]
    pub fn new(view: DirectView, start_address: u64, end_address: u64, latency: SimTime) -> Self {
        Self {
            view,
            start_address,
            end_address,
            read_allowed: false,
            write_allowed: false,
            read_latency: latency,
            write_latency: latency,
        }
    }

    /// Allows reads only.
    pub fn allow_read(&mut self) {
        self.read_allowed = true;
        self.write_allowed = false;
    }

    /// Allows reads and writes.
    pub fn allow_read_write(&mut self) {
        self.read_allowed = true;
        self.write_allowed = true;
    }

    /// `true` when `address` lies in the granted range.
    #[must_use]
    pub const fn contains(&self, address: u64) -> bool {
        address >= self.start_address && address <= self.end_address
    }

    /// `true` when the inclusive range `start..=end` intersects this grant.
    #[must_use]
    pub const fn overlaps(&self, start: u64, end: u64) -> bool {
        start <= self.end_address && end >= self.start_address
    }

    /// `true` when the grant permits `command`.
    #[must_use]
    pub const fn allows(&self, command: Command) -> bool {
        match command {
            Command::Read => self.read_allowed,
            Command::Write => self.write_allowed,
        }
    }

    /// Latency charged for one direct access of kind `command`.
    #[must_use]
    pub const fn latency(&self, command: Command) -> SimTime {
        match command {
            Command::Read => self.read_latency,
            Command::Write => self.write_latency,
        }
    }

    /// Number of bytes covered.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end_address - self.start_address + 1
    }

    /// The view carried by this grant.
    #[must_use]
    pub const fn view(&self) -> &DirectView {
        &self.view
    }

    /// Moves the range into another address space without touching the view.
    pub fn relocate(&mut self, start_address: u64, end_address: u64) {
        self.start_address = start_address;
        self.end_address = end_address;
    }

    /// Reads a little-endian word at `address` through the view.
    ///
    /// # Errors
    ///
    /// See [`ViewError`].
    pub fn read_word(&self, address: u64) -> Result<u32, ViewError> {
        let mut bytes = [0_u8; ACCESS_UNIT_BYTES];
        self.view.read(self.offset_of(address)?, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Writes a little-endian word at `address` through the view.
    ///
    /// # Errors
    ///
    /// See [`ViewError`].
    pub fn write_word(&self, address: u64, word: u32) -> Result<(), ViewError> {
        self.view.write(self.offset_of(address)?, &word.to_le_bytes())
    }

    fn offset_of(&self, address: u64) -> Result<usize, ViewError> {
        address
            .checked_sub(self.start_address)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(ViewError::OutOfRange { offset: 0 })
    }
}

impl PartialEq for DirectAccessGrant {
    fn eq(&self, other: &Self) -> bool {
        self.view.same_window(&other.view)
            && self.start_address == other.start_address
            && self.end_address == other.end_address
            && self.read_allowed == other.read_allowed
            && self.write_allowed == other.write_allowed
            && self.read_latency == other.read_latency
            && self.write_latency == other.write_latency
    }
}

impl Eq for DirectAccessGrant {}
