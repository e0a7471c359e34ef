//! Sender clock readings carried in the wire envelope.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A sender's 64-bit clock reading at message construction, microseconds
/// since the Unix epoch. Any stable 64-bit encoding of UTC with
/// sub-millisecond resolution satisfies the wire contract; this crate uses
/// microseconds so the same type comfortably outlives millisecond
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(u64);

impl Tick {
    /// Reads the current wall clock.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        Tick(micros as u64)
    }

    pub fn from_micros(micros: u64) -> Self {
        Tick(micros)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Absolute distance between two clock readings, saturating instead of
    /// panicking on underflow — the two clocks being compared belong to
    /// different machines and either may be "ahead".
    pub fn abs_diff(&self, other: Tick) -> Duration {
        Duration::from_micros(self.0.abs_diff(other.0))
    }
}

impl From<Tick> for u64 {
    fn from(t: Tick) -> u64 {
        t.0
    }
}

impl From<u64> for Tick {
    fn from(v: u64) -> Tick {
        Tick(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_diff_is_symmetric() {
        let a = Tick::from_micros(1_000_000);
        let b = Tick::from_micros(1_500_000);
        assert_eq!(a.abs_diff(b), b.abs_diff(a));
        assert_eq!(a.abs_diff(b), Duration::from_micros(500_000));
    }

    #[test]
    fn now_is_monotonic_enough() {
        let a = Tick::now();
        let b = Tick::now();
        assert!(b >= a);
    }
}
