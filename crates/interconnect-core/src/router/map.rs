//! Global-to-local address decoding for a two-target router.

use thiserror::Error;

use crate::TargetId;

/// Router address bit selecting the target in the reference topology.
pub const DEFAULT_SELECT_BIT: u32 = 8;

/// Bijective mapping between global addresses and `(target, local)` pairs.
///
/// One reserved bit picks the target; every other bit passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(try_from = "u32", into = "u32")
)]
pub struct AddressMap {
    select_bit: u32,
}

impl Default for AddressMap {
    fn default() -> Self {
        Self::new(DEFAULT_SELECT_BIT)
    }
}

/// Select bit outside a 64-bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("select bit {0} does not fit in a 64-bit address")]
pub struct InvalidSelectBit(pub u32);

impl TryFrom<u32> for AddressMap {
    type Error = InvalidSelectBit;

    fn try_from(select_bit: u32) -> Result<Self, Self::Error> {
        Self::checked(select_bit).ok_or(InvalidSelectBit(select_bit))
    }
}

impl From<AddressMap> for u32 {
    fn from(map: AddressMap) -> Self {
        map.select_bit
    }
}

const _: () = assert!(DEFAULT_SELECT_BIT < u64::BITS, "select bit must fit in an address");

impl AddressMap {
    /// Mapping that reserves `select_bit`.
    ///
    /// # Panics
    ///
    /// Panics when `select_bit` does not fit in a 64-bit address.
    #[must_use]
    pub const fn new(select_bit: u32) -> Self {
        assert!(select_bit < u64::BITS, "select bit must fit in an address");
        Self { select_bit }
    }

    /// Mapping that reserves `select_bit`, or `None` when the bit does not
    /// fit in a 64-bit address.
    #[must_use]
    pub const fn checked(select_bit: u32) -> Option<Self> {
        if select_bit < u64::BITS {
            Some(Self { select_bit })
        } else {
            None
        }
    }

    /// Reserved bit position.
    #[must_use]
    pub const fn select_bit(self) -> u32 {
        self.select_bit
    }

    const fn select_mask(self) -> u64 {
        1 << self.select_bit
    }

    /// Splits a global address into its target and target-local address.
    #[must_use]
    pub const fn decode(self, address: u64) -> (TargetId, u64) {
        let target = ((address >> self.select_bit) & 1) as TargetId;
        (target, address & !self.select_mask())
    }

    /// Rebuilds the global address of `local` on `target`.
    #[must_use]
    pub const fn reconstruct(self, local: u64, target: TargetId) -> u64 {
        (local & !self.select_mask()) | (((target as u64) & 1) << self.select_bit)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{AddressMap, InvalidSelectBit, DEFAULT_SELECT_BIT};

    #[test]
    fn select_bit_set_decodes_to_target_one() {
        let map = AddressMap::default();
        let global = 0x140;
        let (target, local) = map.decode(global);
        assert_eq!(target, 1);
        assert_eq!(local, 0x40);
        assert_eq!(local & (1 << DEFAULT_SELECT_BIT), 0);
        assert_eq!(map.reconstruct(local, target), global);
    }

    #[test]
    fn select_bit_clear_is_identity_on_target_zero() {
        let map = AddressMap::default();
        assert_eq!(map.decode(0xFC), (0, 0xFC));
        assert_eq!(map.reconstruct(0xFC, 0), 0xFC);
    }

    #[test]
    fn higher_bits_pass_through() {
        let map = AddressMap::new(4);
        assert_eq!(map.decode(0xF0F0), (1, 0xF0E0));
        assert_eq!(map.reconstruct(0xF0E0, 1), 0xF0F0);
    }

    #[test]
    fn select_bit_past_the_address_width_is_refused() {
        assert_eq!(AddressMap::try_from(64), Err(InvalidSelectBit(64)));
        assert_eq!(AddressMap::try_from(70), Err(InvalidSelectBit(70)));
        assert_eq!(AddressMap::checked(70), None);
        assert_eq!(AddressMap::try_from(63).map(AddressMap::select_bit), Ok(63));
        assert_eq!(u32::from(AddressMap::default()), DEFAULT_SELECT_BIT);
    }

    proptest! {
        #[test]
        fn decode_then_reconstruct_is_exact(address in any::<u64>(), bit in 0_u32..64) {
            let map = AddressMap::new(bit);
            let (target, local) = map.decode(address);
            prop_assert!(target <= 1);
            prop_assert_eq!(map.reconstruct(local, target), address);
        }
    }
}
