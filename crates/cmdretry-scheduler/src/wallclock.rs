//! A wall-clock instant expressed as milliseconds since the Unix epoch.
//!
//! The scheduler core deals entirely in caller-supplied wall-clock times
//! (they cross the wire as unix seconds / RFC3339 per §6), never
//! [`std::time::Instant`], since commitments must be comparable across
//! process restarts within a single run and serializable for the registry
//! and protocol layers.

use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallClock(i64);

impl WallClock {
    /// Constructs a `WallClock` directly from milliseconds since epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Converts from a [`SystemTime`].
    pub fn from_system_time(time: SystemTime) -> Self {
        let millis = match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            Err(e) => -(e.duration().as_millis() as i64),
        };
        Self(millis)
    }

    /// Converts to a [`SystemTime`].
    pub fn to_system_time(self) -> SystemTime {
        if self.0 >= 0 {
            UNIX_EPOCH + Duration::from_millis(self.0 as u64)
        } else {
            UNIX_EPOCH - Duration::from_millis((-self.0) as u64)
        }
    }

    /// Milliseconds since the epoch.
    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Seconds since the epoch (truncated), the unit used on the wire.
    pub fn as_unix_seconds(self) -> i64 {
        self.0.div_euclid(1000)
    }

    /// Constructs from unix seconds, the unit used on the wire.
    pub fn from_unix_seconds(seconds: i64) -> Self {
        Self(seconds.saturating_mul(1000))
    }

    /// Saturating duration between two instants; zero if `self <= earlier`.
    pub fn saturating_duration_since(self, earlier: WallClock) -> Duration {
        if self.0 <= earlier.0 {
            Duration::ZERO
        } else {
            Duration::from_millis((self.0 - earlier.0) as u64)
        }
    }
}

impl Add<Duration> for WallClock {
    type Output = WallClock;
    fn add(self, rhs: Duration) -> WallClock {
        WallClock(self.0.saturating_add(rhs.as_millis() as i64))
    }
}

impl Sub<Duration> for WallClock {
    type Output = WallClock;
    fn sub(self, rhs: Duration) -> WallClock {
        WallClock(self.0.saturating_sub(rhs.as_millis() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_sub_duration() {
        let t = WallClock::from_millis(10_000);
        assert_eq!((t + Duration::from_secs(5)).as_millis(), 15_000);
        assert_eq!((t - Duration::from_secs(5)).as_millis(), 5_000);
    }

    #[test]
    fn unix_seconds_roundtrip() {
        let t = WallClock::from_unix_seconds(1_700_000_000);
        assert_eq!(t.as_unix_seconds(), 1_700_000_000);
    }

    #[test]
    fn saturating_duration_since_never_negative() {
        let a = WallClock::from_millis(100);
        let b = WallClock::from_millis(200);
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
        assert_eq!(b.saturating_duration_since(a), Duration::from_millis(100));
    }
}
