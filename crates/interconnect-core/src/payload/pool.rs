//! Reference-counted request recycling.
//!
//! Requests live in slots of an arena. A [`RequestHandle`] names a slot and
//! the generation it was handed out in; once the last reference is released
//! the slot's generation moves on and every older handle becomes stale.

use std::fmt;

use crate::{ProtocolViolation, Request};

/// Generation-checked identity of a pooled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle {
    index: u32,
    generation: u32,
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}g{}", self.index, self.generation)
    }
}

#[derive(Debug, Default)]
struct Slot {
    request: Request,
    generation: u32,
    ref_count: u32,
    in_use: bool,
}

/// Allocates and recycles requests; owns their reference counts.
#[derive(Debug, Default)]
pub struct RequestPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl RequestPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a request with default fields and a reference count of zero.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` requests are simultaneously in use.
    pub fn allocate(&mut self) -> RequestHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.in_use = true;
            return RequestHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = u32::try_from(self.slots.len()).expect("request pool exhausted");
        self.slots.push(Slot {
            in_use: true,
            ..Slot::default()
        });
        RequestHandle {
            index,
            generation: 0,
        }
    }

    /// Adds one reference and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::StaleRequest`] for a recycled handle.
    pub fn acquire(&mut self, handle: RequestHandle) -> Result<u32, ProtocolViolation> {
        let slot = self.slot_mut(handle)?;
        slot.ref_count += 1;
        Ok(slot.ref_count)
    }

    /// Drops one reference and returns the remaining count. At zero the
    /// request is reset and its slot returns to the free list.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::StaleRequest`] for a recycled handle and
    /// [`ProtocolViolation::ReleaseUnderflow`] when no reference is held.
    pub fn release(&mut self, handle: RequestHandle) -> Result<u32, ProtocolViolation> {
        let slot = self.slot_mut(handle)?;
        if slot.ref_count == 0 {
            return Err(ProtocolViolation::ReleaseUnderflow { handle });
        }
        slot.ref_count -= 1;
        let remaining = slot.ref_count;
        if remaining == 0 {
            slot.request.reset();
            slot.in_use = false;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(handle.index);
        }
        Ok(remaining)
    }

    /// Shared access to a live request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::StaleRequest`] for a recycled handle.
    pub fn get(&self, handle: RequestHandle) -> Result<&Request, ProtocolViolation> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.in_use && slot.generation == handle.generation)
            .map(|slot| &slot.request)
            .ok_or(ProtocolViolation::StaleRequest { handle })
    }

    /// Exclusive access to a live request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::StaleRequest`] for a recycled handle.
    pub fn get_mut(&mut self, handle: RequestHandle) -> Result<&mut Request, ProtocolViolation> {
        Ok(&mut self.slot_mut(handle)?.request)
    }

    /// Current reference count of a live request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::StaleRequest`] for a recycled handle.
    pub fn ref_count(&self, handle: RequestHandle) -> Result<u32, ProtocolViolation> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.in_use && slot.generation == handle.generation)
            .map(|slot| slot.ref_count)
            .ok_or(ProtocolViolation::StaleRequest { handle })
    }

    /// Number of requests currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Number of slots ever created.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot_mut(&mut self, handle: RequestHandle) -> Result<&mut Slot, ProtocolViolation> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.in_use && slot.generation == handle.generation)
            .ok_or(ProtocolViolation::StaleRequest { handle })
    }
}

#[cfg(test)]
mod tests {
    use super::RequestPool;
    use crate::{Command, ProtocolViolation, Request};

    #[test]
    fn allocate_returns_default_request_with_zero_count() {
        let mut pool = RequestPool::new();
        let handle = pool.allocate();
        assert_eq!(pool.ref_count(handle), Ok(0));
        assert_eq!(pool.get(handle), Ok(&Request::default()));
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn release_to_zero_recycles_the_slot() {
        let mut pool = RequestPool::new();
        let first = pool.allocate();
        pool.acquire(first).expect("live handle");
        pool.get_mut(first)
            .expect("live handle")
            .prepare_word(Command::Write, 0x40, 9);
        assert_eq!(pool.release(first), Ok(0));
        assert_eq!(pool.in_use(), 0);

        let second = pool.allocate();
        assert_eq!(pool.capacity(), 1);
        assert_ne!(first, second);
        assert_eq!(pool.get(second), Ok(&Request::default()));
    }

    #[test]
    fn shared_request_survives_until_last_release() {
        let mut pool = RequestPool::new();
        let handle = pool.allocate();
        assert_eq!(pool.acquire(handle), Ok(1));
        assert_eq!(pool.acquire(handle), Ok(2));
        assert_eq!(pool.release(handle), Ok(1));
        assert!(pool.get(handle).is_ok());
        assert_eq!(pool.release(handle), Ok(0));
        assert!(pool.get(handle).is_err());
    }

    #[test]
    fn stale_handle_is_a_protocol_violation() {
        let mut pool = RequestPool::new();
        let handle = pool.allocate();
        pool.acquire(handle).expect("live handle");
        pool.release(handle).expect("live handle");

        assert_eq!(
            pool.acquire(handle),
            Err(ProtocolViolation::StaleRequest { handle })
        );
        assert_eq!(
            pool.get_mut(handle).map(|_| ()),
            Err(ProtocolViolation::StaleRequest { handle })
        );
    }

    #[test]
    fn release_without_reference_underflows() {
        let mut pool = RequestPool::new();
        let handle = pool.allocate();
        assert_eq!(
            pool.release(handle),
            Err(ProtocolViolation::ReleaseUnderflow { handle })
        );
    }
}
