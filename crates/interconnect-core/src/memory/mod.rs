//! Backing-store targets that serve regular accesses, hand out direct views
//! and arm standing write snoops.

/// Regular-access legality checks.
pub mod access;
/// Direct-access grants and non-owning views.
pub mod dmi;

pub use access::{validate_burst, validate_byte_enable, validate_regular_access, validate_word_address};
pub use dmi::{BackingStore, DirectAccessGrant, DirectView, ViewError};

use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;
use tracing::debug;

use crate::{
    BackwardPath, Command, ProtocolViolation, Request, ResponseStatus, SimTime, Target,
    ACCESS_UNIT_BYTES,
};

/// Words held by a memory block in the reference topology (256 bytes).
pub const DEFAULT_MEMORY_WORDS: usize = 64;

/// Standing write snoop armed on a memory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnoopRegistration {
    /// Inclusive first snooped address (target-local).
    pub start: u64,
    /// Inclusive last snooped address (target-local).
    pub end: u64,
}

impl SnoopRegistration {
    /// `true` when a write of `len` bytes at `addr` touches the snooped range.
    #[must_use]
    pub const fn hit_by(&self, addr: u64, len: u64) -> bool {
        addr.saturating_add(len) > self.start && addr <= self.end
    }
}

/// Word-addressed memory with direct-access and write-snoop support.
#[derive(Debug)]
pub struct MemoryBlock {
    name: String,
    store: BackingStore,
    latency: SimTime,
    snoop: Option<SnoopRegistration>,
}

impl MemoryBlock {
    /// Zero-filled block of `words` access units.
    #[must_use]
    pub fn new(name: impl Into<String>, words: usize, latency: SimTime) -> Self {
        Self {
            name: name.into(),
            store: Rc::new(RefCell::new(vec![0; words * ACCESS_UNIT_BYTES].into_boxed_slice())),
            latency,
            snoop: None,
        }
    }

    /// Block whose words start out as random byte values drawn from `rng`.
    #[must_use]
    pub fn with_random_contents<R: Rng>(
        name: impl Into<String>,
        words: usize,
        latency: SimTime,
        rng: &mut R,
    ) -> Self {
        let block = Self::new(name, words, latency);
        {
            let mut store = block.store.borrow_mut();
            for word in store.chunks_exact_mut(ACCESS_UNIT_BYTES) {
                word.copy_from_slice(&rng.gen_range(0_u32..256).to_le_bytes());
            }
        }
        block
    }

    /// Instance name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.store.borrow().len()
    }

    /// Fixed per-access latency.
    #[must_use]
    pub const fn latency(&self) -> SimTime {
        self.latency
    }

    /// Currently armed write snoop, if any.
    #[must_use]
    pub const fn snoop_registration(&self) -> Option<SnoopRegistration> {
        self.snoop
    }

    /// Reads the word at `addr` without any protocol side effect.
    #[must_use]
    pub fn peek_word(&self, addr: u64) -> Option<u32> {
        let start = usize::try_from(addr).ok()?;
        let store = self.store.borrow();
        let bytes: [u8; ACCESS_UNIT_BYTES] = store.get(start..start + ACCESS_UNIT_BYTES)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Serves a regular access.
    ///
    /// Failing checks set an error status and return without touching the
    /// store or `delay`. A write that touches an armed snoop broadcasts an
    /// invalidation of the whole snooped range and disarms it.
    pub fn execute(&mut self, request: &mut Request, delay: &mut SimTime, backward: &mut dyn BackwardPath) {
        let size = self.size_bytes();
        if let Err(error) = validate_regular_access(request, size) {
            request.response_status = error.into();
            return;
        }

        let addr = request.address;
        let start = usize::try_from(addr).unwrap_or(usize::MAX);
        let len = request.data_length();
        match request.command {
            Command::Read => {
                debug!(target: "memory", memory = %self.name, addr, "execute read");
                request.data.copy_from_slice(&self.store.borrow()[start..start + len]);
            }
            Command::Write => {
                debug!(target: "memory", memory = %self.name, addr, "execute write");
                self.store.borrow_mut()[start..start + len].copy_from_slice(&request.data);

                if let Some(snoop) = self.snoop.filter(|snoop| snoop.hit_by(addr, len as u64)) {
                    debug!(
                        target: "memory",
                        memory = %self.name,
                        start = snoop.start,
                        end = snoop.end,
                        "write hit snooped region"
                    );
                    backward.invalidate_direct_access(snoop.start, snoop.end);
                    self.snoop = None;
                }
            }
        }

        *delay += self.latency;
        request.dmi_allowed = true;
        request.response_status = ResponseStatus::Ok;
    }

    /// Grants a direct view.
    ///
    /// With an active snoop setup the block arms a write snoop over
    /// `request.address..=setup.end_address`, builds a read-only grant over
    /// that range, invalidates the range for every holder and only then
    /// checks the start alignment. A misaligned start therefore yields a
    /// denial that still leaves the snoop armed and the invalidation
    /// delivered.
    ///
    /// Without a snoop setup the grant spans the whole store; write grants
    /// are refused while a snoop is armed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::WriteSnoopRequest`] when a write command
    /// carries an active snoop setup.
    pub fn grant(
        &mut self,
        request: &mut Request,
        backward: &mut dyn BackwardPath,
    ) -> Result<Option<DirectAccessGrant>, ProtocolViolation> {
        if let Some(setup) = request.active_snoop() {
            if request.command == Command::Write {
                return Err(ProtocolViolation::WriteSnoopRequest {
                    address: request.address,
                });
            }

            let start = request.address;
            let end = setup.end_address;
            self.snoop = Some(SnoopRegistration { start, end });

            let base = usize::try_from(start).unwrap_or(usize::MAX);
            let mut grant = DirectAccessGrant::new(DirectView::new(&self.store, base), start, end, self.latency);
            grant.allow_read();

            debug!(target: "memory", memory = %self.name, start, end, "setup write snoop");
            backward.invalidate_direct_access(start, end);

            // Checked after the snoop is armed and the range invalidated.
            if start % ACCESS_UNIT_BYTES as u64 != 0 {
                return Ok(None);
            }
            return Ok(Some(grant));
        }

        let end = (self.size_bytes() as u64).saturating_sub(1);
        let mut grant = DirectAccessGrant::new(DirectView::new(&self.store, 0), 0, end, self.latency);

        match request.command {
            Command::Write if self.snoop.is_some() => Ok(None),
            Command::Write => {
                grant.allow_read_write();
                Ok(Some(grant))
            }
            Command::Read => {
                grant.allow_read();
                Ok(Some(grant))
            }
        }
    }

    /// Copies bytes straight between the request and the store, clamping the
    /// length to the in-bounds remainder. No snoop or invalidation side
    /// effects. Misaligned or out-of-range requests move nothing.
    pub fn debug_access(&mut self, request: &mut Request) -> usize {
        let size = self.size_bytes();
        let unit = ACCESS_UNIT_BYTES as u64;
        let Ok(start) = usize::try_from(request.address) else {
            return 0;
        };
        let requested = request.data_length();
        if request.address % unit != 0 || requested % ACCESS_UNIT_BYTES != 0 || start >= size {
            return 0;
        }

        let len = requested.min(size - start);
        let mut store = self.store.borrow_mut();
        match request.command {
            Command::Read => request.data[..len].copy_from_slice(&store[start..start + len]),
            Command::Write => store[start..start + len].copy_from_slice(&request.data[..len]),
        }
        len
    }
}

impl Target for MemoryBlock {
    fn transport(&mut self, request: &mut Request, delay: &mut SimTime, backward: &mut dyn BackwardPath) {
        self.execute(request, delay, backward);
    }

    fn grant(
        &mut self,
        request: &mut Request,
        backward: &mut dyn BackwardPath,
    ) -> Result<Option<DirectAccessGrant>, ProtocolViolation> {
        Self::grant(self, request, backward)
    }

    fn debug_access(&mut self, request: &mut Request) -> usize {
        Self::debug_access(self, request)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{MemoryBlock, SnoopRegistration, DEFAULT_MEMORY_WORDS};
    use crate::{
        Command, ProtocolViolation, Request, ResponseStatus, SimTime, SnoopSetup,
        MEMORY_ACCESS_LATENCY,
    };

    fn memory() -> MemoryBlock {
        MemoryBlock::new("memory", DEFAULT_MEMORY_WORDS, MEMORY_ACCESS_LATENCY)
    }

    fn word_request(command: Command, address: u64, word: u32) -> Request {
        let mut request = Request::default();
        request.prepare_word(command, address, word);
        request
    }

    fn snoop_request(start: u64, end: u64) -> Request {
        Request {
            address: start,
            snoop: Some(SnoopSetup::new(end)),
            ..Request::default()
        }
    }

    #[test]
    fn write_then_read_round_trips_and_charges_latency() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut delay = SimTime::ZERO;

        let mut write = word_request(Command::Write, 0x40, 0x1234_5678);
        mem.execute(&mut write, &mut delay, &mut backward);
        assert_eq!(write.response_status, ResponseStatus::Ok);
        assert!(write.dmi_allowed);

        let mut read = word_request(Command::Read, 0x40, 0);
        mem.execute(&mut read, &mut delay, &mut backward);
        assert_eq!(read.data_word(), Some(0x1234_5678));
        assert_eq!(delay, SimTime::from_ns(100));
        assert!(backward.is_empty());
    }

    #[test]
    fn rejected_access_leaves_delay_and_store_untouched() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut delay = SimTime::ZERO;

        let mut out_of_range = word_request(Command::Write, 0x100, 1);
        mem.execute(&mut out_of_range, &mut delay, &mut backward);
        assert_eq!(out_of_range.response_status, ResponseStatus::AddressError);

        let mut partial = word_request(Command::Write, 0x10, 1);
        partial.byte_enable = Some(vec![0xFF, 0, 0, 0]);
        mem.execute(&mut partial, &mut delay, &mut backward);
        assert_eq!(partial.response_status, ResponseStatus::ByteEnableError);

        let mut burst = word_request(Command::Write, 0x10, 1);
        burst.data.extend_from_slice(&[0; 4]);
        mem.execute(&mut burst, &mut delay, &mut backward);
        assert_eq!(burst.response_status, ResponseStatus::BurstError);

        assert_eq!(delay, SimTime::ZERO);
        assert_eq!(mem.peek_word(0x10), Some(0));
        assert!(!burst.dmi_allowed);
    }

    #[test]
    fn write_into_snooped_words_invalidates_whole_registration_once() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut delay = SimTime::ZERO;

        let mut setup = snoop_request(8 * 4, 12 * 4 + 3);
        let grant = mem.grant(&mut setup, &mut backward).expect("read snoop is legal");
        assert!(grant.is_some());
        backward.clear();

        let mut write = word_request(Command::Write, 10 * 4, 0xAB);
        mem.execute(&mut write, &mut delay, &mut backward);
        assert_eq!(backward, vec![(0x20, 0x33)]);
        assert_eq!(mem.snoop_registration(), None);

        mem.execute(&mut write, &mut delay, &mut backward);
        assert_eq!(backward.len(), 1);
    }

    #[test]
    fn write_next_to_snooped_range_does_not_fire() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut delay = SimTime::ZERO;
        let mut setup = snoop_request(0x20, 0x33);
        mem.grant(&mut setup, &mut backward).expect("legal");
        backward.clear();

        for addr in [0x1C, 0x34] {
            let mut write = word_request(Command::Write, addr, 1);
            mem.execute(&mut write, &mut delay, &mut backward);
        }
        assert!(backward.is_empty());
        assert_eq!(
            mem.snoop_registration(),
            Some(SnoopRegistration {
                start: 0x20,
                end: 0x33
            })
        );
    }

    #[test]
    fn snoop_grant_is_read_only_and_flushes_range_first() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut setup = snoop_request(0x00, 0x7F);

        let grant = mem
            .grant(&mut setup, &mut backward)
            .expect("legal")
            .expect("aligned start is granted");
        assert!(grant.read_allowed);
        assert!(!grant.write_allowed);
        assert_eq!((grant.start_address, grant.end_address), (0x00, 0x7F));
        assert_eq!(grant.read_latency, MEMORY_ACCESS_LATENCY);
        assert_eq!(grant.write_latency, MEMORY_ACCESS_LATENCY);
        assert_eq!(backward, vec![(0x00, 0x7F)]);
    }

    #[test]
    fn write_snoop_request_is_a_protocol_violation() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut setup = snoop_request(0x00, 0x7F);
        setup.command = Command::Write;

        assert_eq!(
            mem.grant(&mut setup, &mut backward),
            Err(ProtocolViolation::WriteSnoopRequest { address: 0 })
        );
        assert_eq!(mem.snoop_registration(), None);
    }

    // A misaligned snoop start is denied only after the registration and the
    // invalidation have already happened.
    #[test]
    fn misaligned_snoop_start_is_denied_after_side_effects() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut setup = snoop_request(0x22, 0x33);

        assert_eq!(mem.grant(&mut setup, &mut backward), Ok(None));
        assert_eq!(
            mem.snoop_registration(),
            Some(SnoopRegistration {
                start: 0x22,
                end: 0x33
            })
        );
        assert_eq!(backward, vec![(0x22, 0x33)]);
    }

    #[test]
    fn plain_write_grant_denied_while_snoop_armed_but_read_granted() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut setup = snoop_request(0x20, 0x33);
        mem.grant(&mut setup, &mut backward).expect("legal");

        let mut write = word_request(Command::Write, 0x24, 0);
        assert_eq!(mem.grant(&mut write, &mut backward), Ok(None));
        assert!(mem.snoop_registration().is_some());

        let mut read = word_request(Command::Read, 0x24, 0);
        let grant = mem.grant(&mut read, &mut backward).expect("legal").expect("read granted");
        assert!(grant.read_allowed && !grant.write_allowed);
        assert_eq!((grant.start_address, grant.end_address), (0, 0xFF));
    }

    #[test]
    fn plain_write_grant_allows_read_write_over_full_range() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut write = word_request(Command::Write, 0x80, 0);
        let grant = mem.grant(&mut write, &mut backward).expect("legal").expect("granted");
        assert!(grant.read_allowed && grant.write_allowed);

        grant.write_word(0x80, 0xCAFE).expect("view in range");
        assert_eq!(mem.peek_word(0x80), Some(0xCAFE));
        assert!(backward.is_empty());
    }

    #[test]
    fn regrant_after_invalidation_succeeds() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut delay = SimTime::ZERO;

        let mut setup = snoop_request(0x40, 0x5F);
        assert!(mem.grant(&mut setup, &mut backward).expect("legal").is_some());
        let mut write = word_request(Command::Write, 0x44, 3);
        mem.execute(&mut write, &mut delay, &mut backward);
        assert_eq!(mem.snoop_registration(), None);

        let mut again = snoop_request(0x40, 0x5F);
        assert!(mem.grant(&mut again, &mut backward).expect("legal").is_some());
        assert!(mem.snoop_registration().is_some());
    }

    #[test]
    fn debug_access_clamps_and_skips_snoop() {
        let mut mem = memory();
        let mut backward = Vec::new();
        let mut setup = snoop_request(0xF0, 0xFF);
        mem.grant(&mut setup, &mut backward).expect("legal");
        backward.clear();

        let mut write = Request {
            command: Command::Write,
            address: 0xF8,
            data: vec![0xEE; 16],
            ..Request::default()
        };
        assert_eq!(mem.debug_access(&mut write), 8);
        assert_eq!(mem.peek_word(0xFC), Some(0xEEEE_EEEE));
        assert!(backward.is_empty());
        assert!(mem.snoop_registration().is_some());

        let mut read = Request {
            command: Command::Read,
            address: 0xF8,
            data: vec![0; 8],
            ..Request::default()
        };
        assert_eq!(mem.debug_access(&mut read), 8);
        assert_eq!(read.data, vec![0xEE; 8]);
    }

    #[test]
    fn debug_access_rejects_misaligned_and_out_of_range() {
        let mut mem = memory();
        for (address, len) in [(0x02, 4), (0x00, 3), (0x100, 4)] {
            let mut request = Request {
                address,
                data: vec![0; len],
                ..Request::default()
            };
            assert_eq!(mem.debug_access(&mut request), 0);
        }
    }

    #[test]
    fn random_fill_is_deterministic_per_seed() {
        let a = MemoryBlock::with_random_contents("a", 8, MEMORY_ACCESS_LATENCY, &mut StdRng::seed_from_u64(7));
        let b = MemoryBlock::with_random_contents("b", 8, MEMORY_ACCESS_LATENCY, &mut StdRng::seed_from_u64(7));
        for addr in (0..32).step_by(4) {
            let word = a.peek_word(addr).expect("in range");
            assert!(word < 256);
            assert_eq!(Some(word), b.peek_word(addr));
        }
    }
}
