use crate::service::error::Error;
use std::fmt::{Display, Formatter};

/// Address in target memory, measured in addressable units (see
/// [`crate::service::config::MemoryConfig::addressable_size`]).
///
/// Range ends are computed in 128-bit space so a range may touch the very end of the 64-bit
/// address space without overflow.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Address(u64);

impl Address {
    /// First address after the end of a 64-bit address space.
    pub const SPACE_END: u128 = u64::MAX as u128 + 1;

    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn as_u128(self) -> u128 {
        self.0 as u128
    }

    /// Signed distance from `self` to `other` (`other - self`) in addressable units.
    pub fn distance_to(self, other: Address) -> i128 {
        other.0 as i128 - self.0 as i128
    }

    /// Return address located `units` after this one, `None` on address space overflow.
    pub fn checked_add(self, units: u64) -> Option<Address> {
        self.0.checked_add(units).map(Address)
    }

    /// Same as [`Address::checked_add`] but return [`Error::InconsistentRange`] on overflow.
    pub fn add(self, units: u64) -> Result<Address, Error> {
        self.checked_add(units)
            .ok_or(Error::InconsistentRange(self, units))
    }

    /// Return address shifted by a signed number of units, `None` on address space overflow.
    pub fn checked_offset(self, units: i64) -> Option<Address> {
        if units >= 0 {
            self.0.checked_add(units as u64)
        } else {
            self.0.checked_sub(units.unsigned_abs())
        }
        .map(Address)
    }

    /// Exclusive end of range `[self, self + units)`.
    pub fn end(self, units: u64) -> u128 {
        self.0 as u128 + units as u128
    }

    /// Create address from a 128-bit position. Caller guarantees that position is in
    /// address space.
    pub(crate) fn from_position(pos: u128) -> Address {
        debug_assert!(pos <= u64::MAX as u128);
        Address(pos as u64)
    }
}

impl From<u64> for Address {
    fn from(addr: u64) -> Self {
        Address(addr)
    }
}

impl From<usize> for Address {
    fn from(addr: usize) -> Self {
        Address(addr as u64)
    }
}

impl From<Address> for u64 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format!("{:#016X}", self.0))
    }
}

/// Validate that `[start, start + units)` fits into a 64-bit address space.
pub fn check_range(start: Address, units: u64) -> Result<(), Error> {
    if start.end(units) > Address::SPACE_END {
        return Err(Error::InconsistentRange(start, units));
    }
    Ok(())
}
