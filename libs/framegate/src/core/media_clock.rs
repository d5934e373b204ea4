// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

/// Monotonic clock shared by every runner in the process.
pub struct MediaClock;

impl MediaClock {
    #[inline]
    pub fn now() -> Duration {
        static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(std::time::Instant::now);
        start.elapsed()
    }
}

/// Packet timestamp in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_duration(d: Duration) -> Self {
        Self(i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Issues strictly increasing timestamps for input packets.
///
/// Follows [`MediaClock`], but if the clock repeats or the caller feeds two
/// frames inside one microsecond the next stamp is bumped past the last one.
#[derive(Debug, Default)]
pub struct TimestampGenerator {
    last: Option<Timestamp>,
}

impl TimestampGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> Timestamp {
        self.next_at(Timestamp::from_duration(MediaClock::now()))
    }

    /// Stamp for a frame observed at `now`.
    pub fn next_at(&mut self, now: Timestamp) -> Timestamp {
        let stamp = match self.last {
            Some(last) if now <= last => Timestamp(last.0.saturating_add(1)),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }

    pub fn last(&self) -> Option<Timestamp> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_clock_still_increases() {
        let mut ts = TimestampGenerator::new();
        let a = ts.next_at(Timestamp(100));
        let b = ts.next_at(Timestamp(100));
        let c = ts.next_at(Timestamp(50));
        assert_eq!(a, Timestamp(100));
        assert_eq!(b, Timestamp(101));
        assert_eq!(c, Timestamp(102));
    }

    #[test]
    fn test_follows_clock_when_it_advances() {
        let mut ts = TimestampGenerator::new();
        ts.next_at(Timestamp(10));
        assert_eq!(ts.next_at(Timestamp(500)), Timestamp(500));
    }

    #[test]
    fn test_media_clock_is_monotonic() {
        let mut ts = TimestampGenerator::new();
        let first = ts.next();
        let second = ts.next();
        assert!(second > first);
    }
}
