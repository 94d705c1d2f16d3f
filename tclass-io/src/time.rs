//! Uptime clock for probe timestamps and deadlines
//!
//! Timestamps are milliseconds of uptime carried as `i64`, the same value
//! that goes on the wire. The range is treated as a circle of
//! [`UPTIME_WRAP`] milliseconds: advancing past the end continues from zero
//! instead of overflowing, and comparisons go through [`Timestamp::offset_from`]
//! so a deadline that wrapped is still seen as in the future.

use std::ops::Sub;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Length of the uptime circle in milliseconds
pub const UPTIME_WRAP: i64 = i64::MAX;

const HALF_WRAP: i64 = UPTIME_WRAP / 2;

/// Uptime timestamp in milliseconds, always within `[0, UPTIME_WRAP)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Uptime zero
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create a timestamp, folding `millis` onto the uptime circle
    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis.rem_euclid(UPTIME_WRAP))
    }

    /// Raw millisecond value (what goes on the wire)
    #[inline]
    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Advance by `millis`, wrapping relative to the overflow boundary
    ///
    /// Negative advances are treated as zero.
    pub fn wrapping_add_millis(self, millis: i64) -> Self {
        let millis = millis.clamp(0, UPTIME_WRAP - 1);
        match self.0.checked_add(millis) {
            Some(t) if t < UPTIME_WRAP => Timestamp(t),
            _ => Timestamp(millis - (UPTIME_WRAP - self.0)),
        }
    }

    /// Advance by a duration, wrapping like [`Timestamp::wrapping_add_millis`]
    pub fn wrapping_add(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(UPTIME_WRAP - 1);
        self.wrapping_add_millis(millis)
    }

    /// Milliseconds from `earlier` forward to `self` around the circle
    pub fn wrapping_since(self, earlier: Timestamp) -> i64 {
        if self.0 >= earlier.0 {
            self.0 - earlier.0
        } else {
            (UPTIME_WRAP - earlier.0) + self.0
        }
    }

    /// Signed distance of `self` from `reference`
    ///
    /// Positive when `self` lies ahead of `reference` by less than half the
    /// circle, negative when it lies behind.
    pub fn offset_from(self, reference: Timestamp) -> i64 {
        let forward = self.wrapping_since(reference);
        if forward > HALF_WRAP {
            forward - UPTIME_WRAP
        } else {
            forward
        }
    }

    /// Whether `self` is at or past `reference`
    #[inline]
    pub fn is_at_or_after(self, reference: Timestamp) -> bool {
        self.offset_from(reference) >= 0
    }

    /// Time left until `self` when observed at `now` (zero if already past)
    pub fn remaining_from(self, now: Timestamp) -> Duration {
        Duration::from_millis(self.offset_from(now).max(0) as u64)
    }
}

impl Sub for Timestamp {
    type Output = i64;

    /// Signed distance in milliseconds, see [`Timestamp::offset_from`]
    fn sub(self, other: Timestamp) -> i64 {
        self.offset_from(other)
    }
}

/// Source of uptime timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock independent uptime, counted from construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
    base: Timestamp,
}

impl MonotonicClock {
    /// Clock reading zero now
    pub fn new() -> Self {
        Self::starting_at(Timestamp::ZERO)
    }

    /// Clock reading `base` now
    pub fn starting_at(base: Timestamp) -> Self {
        MonotonicClock {
            origin: Instant::now(),
            base,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        self.base.wrapping_add(self.origin.elapsed())
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            now: AtomicI64::new(start.as_millis()),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, now: Timestamp) {
        self.now.store(now.as_millis(), Ordering::SeqCst);
    }

    /// Move forward by `millis`, wrapping at the end of the circle
    pub fn advance(&self, millis: i64) -> Timestamp {
        let next = self.now().wrapping_add_millis(millis);
        self.set(next);
        next
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_from_millis_folds() {
        assert_eq!(Timestamp::from_millis(5).as_millis(), 5);
        assert_eq!(Timestamp::from_millis(-1).as_millis(), UPTIME_WRAP - 1);
        assert_eq!(Timestamp::from_millis(i64::MAX).as_millis(), 0);
    }

    #[test]
    fn test_add_without_overflow() {
        let ts = Timestamp::from_millis(1_000);
        assert_eq!(ts.wrapping_add_millis(30_000).as_millis(), 31_000);
        assert_eq!(ts.wrapping_add_millis(-10), ts);
    }

    #[test]
    fn test_add_wraps_relative_to_boundary() {
        let ts = Timestamp::from_millis(UPTIME_WRAP - 10);
        let next = ts.wrapping_add_millis(30);

        assert_eq!(next.as_millis(), 30 - 10);
        assert_eq!(next.wrapping_since(ts), 30);
        assert!(next.is_at_or_after(ts));
        assert!(!ts.is_at_or_after(next));
    }

    #[test]
    fn test_add_landing_on_boundary() {
        let ts = Timestamp::from_millis(UPTIME_WRAP - 30);
        assert_eq!(ts.wrapping_add_millis(30), Timestamp::ZERO);
    }

    #[test]
    fn test_offset_sign() {
        let a = Timestamp::from_millis(100);
        let b = Timestamp::from_millis(250);
        assert_eq!(b.offset_from(a), 150);
        assert_eq!(a.offset_from(b), -150);
        assert_eq!(b - a, 150);
    }

    #[test]
    fn test_remaining_from() {
        let deadline = Timestamp::from_millis(2_000);
        assert_eq!(
            deadline.remaining_from(Timestamp::from_millis(500)),
            Duration::from_millis(1_500)
        );
        assert_eq!(
            deadline.remaining_from(Timestamp::from_millis(2_500)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let start = clock.now();
        thread::sleep(Duration::from_millis(10));
        let elapsed = clock.now() - start;
        assert!(elapsed >= 10);
        assert!(elapsed < 500);
    }

    #[test]
    fn test_monotonic_clock_near_wrap() {
        let clock = MonotonicClock::starting_at(Timestamp::from_millis(UPTIME_WRAP - 1));
        thread::sleep(Duration::from_millis(5));
        let now = clock.now();
        assert!(now.as_millis() < 1_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(Timestamp::from_millis(UPTIME_WRAP - 5));
        clock.advance(10);
        assert_eq!(clock.now().as_millis(), 5);
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_advance_is_recoverable(base in 0..UPTIME_WRAP, step in 0..HALF_WRAP) {
                let start = Timestamp::from_millis(base);
                let later = start.wrapping_add_millis(step);

                prop_assert!(later.as_millis() >= 0 && later.as_millis() < UPTIME_WRAP);
                prop_assert_eq!(later.wrapping_since(start), step);
                prop_assert_eq!(later.offset_from(start), step);
                prop_assert!(later.is_at_or_after(start));
            }
        }
    }
}
