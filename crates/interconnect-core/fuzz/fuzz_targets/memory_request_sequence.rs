#![no_main]

use interconnect_core::{
    validate_regular_access, AddressMap, AddressRouter, Command, MemoryBlock, Request,
    SimTime, SnoopSetup, DEFAULT_MEMORY_WORDS, MEMORY_ACCESS_LATENCY,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut router = AddressRouter::new(AddressMap::default());
    for name in ["memory1", "memory2"] {
        router.bind_target(Box::new(MemoryBlock::new(name, DEFAULT_MEMORY_WORDS, MEMORY_ACCESS_LATENCY)));
    }

    for chunk in data.chunks_exact(6) {
        let address = u64::from(u16::from_le_bytes([chunk[0], chunk[1]]));
        let len = usize::from(chunk[2] % 9);
        let op = chunk[3];
        let word = u32::from(u16::from_le_bytes([chunk[4], chunk[5]]));

        let mut request = Request {
            command: if op & 1 == 0 { Command::Read } else { Command::Write },
            address,
            data: word.to_le_bytes().iter().copied().cycle().take(len).collect(),
            streaming_width: len,
            ..Request::default()
        };
        let _ = validate_regular_access(&request, 256);

        match op % 4 {
            0 | 1 => {
                let mut delay = SimTime::ZERO;
                let _ = router.transport(&mut request, &mut delay);
            }
            2 => {
                request.snoop = Some(SnoopSetup::new(address.saturating_add(u64::from(chunk[4]))));
                let _ = router.grant(&mut request);
            }
            _ => {
                let _ = router.debug_access(&mut request);
            }
        }
    }
});
