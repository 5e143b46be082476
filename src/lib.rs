// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! midilink: backend-agnostic MIDI input and output.
//!
//! Endpoints ([`midi::MidiInput`], [`midi::MidiOutput`]) sit on top of a
//! [`driver::Driver`], one implementation per native backend. Incoming
//! driver fragments are rebuilt into whole, filtered, delta-timestamped
//! messages on the driver's own thread; outgoing bytes are split into
//! protocol-legal events by a growable encoder.

pub mod config;
pub mod driver;
pub mod midi;
pub mod timing;
