//! Common types shared by the scheduler and its collaborators.

use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An instant on a virtual clock.
///
/// Internally a count of nanoseconds since the Unix epoch. Tick 0 is
/// `1970-01-01T00:00:00Z`, which is also where every new clock starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimePoint(u64);

impl TimePoint {
    /// The epoch (tick 0).
    pub const EPOCH: TimePoint = TimePoint(0);

    /// Creates a time point from a raw nanosecond count.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time point from whole seconds since the epoch.
    ///
    /// # Panics
    /// Panics if the value does not fit in the nanosecond representation.
    pub fn from_unix_secs(secs: u64) -> Self {
        match secs.checked_mul(1_000_000_000) {
            Some(nanos) => Self(nanos),
            None => panic!("time point overflow: {secs}s since epoch"),
        }
    }

    /// Nanoseconds elapsed since the epoch.
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Whole seconds since the epoch, truncating any sub-second part.
    pub const fn as_unix_secs(&self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Duration since the epoch.
    pub fn time_since_epoch(&self) -> Duration {
        Duration::from_nanos(self.0)
    }

    /// Duration elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn duration_since(&self, earlier: TimePoint) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Adds a duration, returning `None` on overflow.
    pub fn checked_add(&self, d: Duration) -> Option<TimePoint> {
        let nanos = u64::try_from(d.as_nanos()).ok()?;
        self.0.checked_add(nanos).map(TimePoint)
    }

    /// Maps this time point onto the wall-clock timeline (epoch = `UNIX_EPOCH`).
    pub fn to_system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.time_since_epoch()
    }
}

impl Add<Duration> for TimePoint {
    type Output = TimePoint;

    /// # Panics
    /// Panics on overflow; a virtual deadline past the representable range
    /// is a bug in the caller.
    fn add(self, rhs: Duration) -> TimePoint {
        match self.checked_add(rhs) {
            Some(t) => t,
            None => panic!("time point overflow: {} + {:?}", self.0, rhs),
        }
    }
}

/// Identifier of an application within its shared-time group.
///
/// Assigned by the clock in construction order, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId(pub u64);

impl AppId {
    /// Returns the raw index.
    pub fn index(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "app-{}", self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_point_add_and_since() {
        let t = TimePoint::EPOCH + Duration::from_nanos(20);
        assert_eq!(t.as_nanos(), 20);

        let later = t + Duration::from_secs(1);
        assert_eq!(later.duration_since(t), Duration::from_secs(1));

        // Saturates instead of going negative
        assert_eq!(t.duration_since(later), Duration::ZERO);
    }

    #[test]
    fn test_unix_secs_truncates() {
        let t = TimePoint::from_unix_secs(90) + Duration::from_millis(999);
        assert_eq!(t.as_unix_secs(), 90);
        assert_eq!(t.to_system_time(), UNIX_EPOCH + Duration::from_millis(90_999));
    }

    #[test]
    #[should_panic(expected = "time point overflow")]
    fn test_add_overflow_panics() {
        let _ = TimePoint::from_nanos(u64::MAX) + Duration::from_nanos(1);
    }

    #[test]
    fn test_time_point_serializes_as_nanos() {
        let json = serde_json::to_string(&TimePoint::from_nanos(200)).unwrap();
        assert_eq!(json, "200");
    }

    #[test]
    fn test_app_id_display() {
        assert_eq!(AppId(3).to_string(), "app-3");
        assert_eq!(AppId(3).index(), 3);
    }
}
