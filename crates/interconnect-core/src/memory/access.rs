//! Request legality checks applied by a memory block before any data moves.

use crate::{AccessError, Request, ACCESS_UNIT_BYTES};

/// Validates that `addr` names a whole access unit inside a store of
/// `size_bytes` bytes.
///
/// # Errors
///
/// Returns [`AccessError::Address`] for out-of-range or misaligned addresses.
pub fn validate_word_address(addr: u64, size_bytes: usize) -> Result<(), AccessError> {
    let unit = ACCESS_UNIT_BYTES as u64;
    let words = (size_bytes / ACCESS_UNIT_BYTES) as u64;
    if addr / unit >= words || addr % unit != 0 {
        Err(AccessError::Address)
    } else {
        Ok(())
    }
}

/// Rejects any byte-enable mask.
///
/// # Errors
///
/// Returns [`AccessError::ByteEnable`] when a mask is present.
pub const fn validate_byte_enable(byte_enable: Option<&Vec<u8>>) -> Result<(), AccessError> {
    if byte_enable.is_some() {
        Err(AccessError::ByteEnable)
    } else {
        Ok(())
    }
}

/// Validates data length and streaming width against the access unit.
///
/// # Errors
///
/// Returns [`AccessError::Burst`] unless both equal [`ACCESS_UNIT_BYTES`].
pub const fn validate_burst(length: usize, streaming_width: usize) -> Result<(), AccessError> {
    if length == ACCESS_UNIT_BYTES && streaming_width == ACCESS_UNIT_BYTES {
        Ok(())
    } else {
        Err(AccessError::Burst)
    }
}

/// Applies every regular-access check in protocol order: address, byte
/// enable, burst.
///
/// # Errors
///
/// Returns the first failing [`AccessError`].
pub fn validate_regular_access(request: &Request, size_bytes: usize) -> Result<(), AccessError> {
    validate_word_address(request.address, size_bytes)?;
    validate_byte_enable(request.byte_enable.as_ref())?;
    validate_burst(request.data_length(), request.streaming_width)
}
