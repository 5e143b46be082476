// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI endpoints.
//!
//! [`MidiInput`] and [`MidiOutput`] run on any [`Driver`](crate::driver::Driver)
//! and share the same port lifecycle. Input messages are rebuilt from raw
//! driver fragments by the [`InputReconstructor`]; output bytes are split
//! into events by the [`OutputEncoder`].

pub mod error;
pub mod filter;
pub mod input;
pub mod message;
pub mod output;
pub mod port;

pub use error::{PortError, SendError};
pub use filter::{Decision, EventClass, FilterConfig, FilterPolicy, SysexState};
pub use input::{
    Delivery, InputReconstructor, InputStats, InputStatsSnapshot, MessageSink, MidiInput,
};
pub use message::{MessageBuffer, MessageKind, MidiMessage};
pub use output::{MidiOutput, OutputEncoder};
pub use port::{ConnectionState, PortLifecycle};

/// MIDI message constants
pub mod messages {
    // Channel Voice Messages (upper nibble, lower nibble is channel 0-15)
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_AFTERTOUCH: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_AFTERTOUCH: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;

    // System Common Messages
    pub const SYSEX_START: u8 = 0xF0;
    pub const TIME_CODE: u8 = 0xF1;
    pub const SONG_POSITION: u8 = 0xF2;
    pub const SONG_SELECT: u8 = 0xF3;
    pub const TUNE_REQUEST: u8 = 0xF6;
    pub const SYSEX_END: u8 = 0xF7;

    // System Real-Time Messages
    pub const TIMING_CLOCK: u8 = 0xF8;
    pub const START: u8 = 0xFA;
    pub const CONTINUE: u8 = 0xFB;
    pub const STOP: u8 = 0xFC;
    pub const ACTIVE_SENSING: u8 = 0xFE;
    pub const RESET: u8 = 0xFF;

    /// Whether `byte` is a status byte rather than data.
    pub const fn is_status(byte: u8) -> bool {
        byte & 0x80 != 0
    }

    /// Whether `byte` is a single-byte real-time message.
    pub const fn is_realtime(byte: u8) -> bool {
        byte >= TIMING_CLOCK
    }
}
