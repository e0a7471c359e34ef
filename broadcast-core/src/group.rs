//! The 8-bit broadcast group tag.

use std::convert::TryFrom;
use std::fmt;

use crate::error::WireError;

/// A client receives a `Broadcast` message only if its own group equals the
/// sender's. Valid range is 0..=255; the newtype exists so "256 or
/// negative refuses construction" (boundary behavior) is a real, checked
/// path rather than relying on `u8` wraparound at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BroadcastGroup(u8);

impl BroadcastGroup {
    pub const fn new(value: u8) -> Self {
        BroadcastGroup(value)
    }

    pub const fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for BroadcastGroup {
    type Error = WireError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (0..=255).contains(&value) {
            Ok(BroadcastGroup(value as u8))
        } else {
            Err(WireError::InvalidGroup(value))
        }
    }
}

impl From<u8> for BroadcastGroup {
    fn from(value: u8) -> Self {
        BroadcastGroup(value)
    }
}

impl fmt::Display for BroadcastGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_values_are_valid() {
        assert!(BroadcastGroup::try_from(0i64).is_ok());
        assert!(BroadcastGroup::try_from(255i64).is_ok());
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert!(BroadcastGroup::try_from(256i64).is_err());
        assert!(BroadcastGroup::try_from(-1i64).is_err());
    }
}
