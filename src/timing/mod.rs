// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Timing module.
//!
//! Monotonic time sources and the delta-timestamping used on incoming
//! MIDI messages.

pub mod clock;

pub use clock::{ManualClock, MonotonicClock, MonotonicTime, SystemClock, TimestampClock};
