// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Monotonic clocks and delta timestamps.
//!
//! Incoming messages carry the time elapsed since the previous delivered
//! message, in seconds. The first delivered message on an endpoint is always
//! stamped `0.0`. The baseline moves on every raw event the driver hands us,
//! including ones that end up filtered out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A point on a monotonic timeline, in nanoseconds from the clock's epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MonotonicTime(u64);

impl MonotonicTime {
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Seconds elapsed since `earlier`. Never negative.
    pub fn seconds_since(self, earlier: MonotonicTime) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 * 1e-9
    }
}

/// Source of monotonic time, readable from the driver callback thread.
pub trait MonotonicClock: Send {
    fn now(&self) -> MonotonicTime;
}

/// Wall-clock independent time from [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now(&self) -> MonotonicTime {
        MonotonicTime(self.epoch.elapsed().as_nanos() as u64)
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, time: MonotonicTime) {
        self.nanos.store(time.as_nanos(), Ordering::Release);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> MonotonicTime {
        MonotonicTime(self.nanos.load(Ordering::Acquire))
    }
}

/// Delta-timestamping state for one input endpoint.
#[derive(Debug)]
pub struct TimestampClock<C: MonotonicClock = SystemClock> {
    clock: C,
    last_time: MonotonicTime,
    first_message: bool,
}

impl<C: MonotonicClock> TimestampClock<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            last_time: MonotonicTime::default(),
            first_message: true,
        }
    }

    /// Current time of the underlying clock.
    pub fn now(&self) -> MonotonicTime {
        self.clock.now()
    }

    /// Seconds between two readings.
    pub fn delta(last: MonotonicTime, now: MonotonicTime) -> f64 {
        now.seconds_since(last)
    }

    /// Timestamp for the raw event being processed right now.
    ///
    /// Moves the baseline unconditionally. Returns `0.0` until a message has
    /// been delivered.
    pub fn stamp(&mut self) -> f64 {
        let now = self.clock.now();
        let timestamp = if self.first_message {
            0.0
        } else {
            Self::delta(self.last_time, now)
        };
        self.last_time = now;
        timestamp
    }

    /// Record that a message carrying the last stamp was delivered.
    pub fn mark_delivered(&mut self) {
        self.first_message = false;
    }

    pub fn is_first_message(&self) -> bool {
        self.first_message
    }

    pub fn last_time(&self) -> MonotonicTime {
        self.last_time
    }
}

impl Default for TimestampClock<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock::new())
    }
}
