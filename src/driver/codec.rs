// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Byte-stream to MIDI event encoder shared by the backends.
//!
//! Works like a sequencer-style event encoder: each call consumes exactly one
//! discrete event from the front of the byte stream, and state (running
//! status, an open SysEx) carries over to the next call. SysEx data is cut
//! into chunks no larger than the buffer capacity.

use std::collections::TryReserveError;

use super::DriverError;
use crate::midi::messages;

/// Initial capacity of a fresh encoder.
pub const DEFAULT_ENCODER_CAPACITY: usize = 32;

/// Encoder state plus the scratch buffer holding the last encoded event.
///
/// `capacity` only ever grows.
#[derive(Debug, Clone)]
pub struct EncoderBuffer {
    capacity: usize,
    scratch: Vec<u8>,
    running_status: Option<u8>,
    in_sysex: bool,
}

impl EncoderBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            scratch: Vec::with_capacity(capacity),
            running_status: None,
            in_sysex: false,
        }
    }

    /// Largest chunk a single encode call may produce.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grow to at least `required` bytes. Returns whether it grew.
    pub fn reserve(&mut self, required: usize) -> Result<bool, TryReserveError> {
        if required <= self.capacity {
            return Ok(false);
        }
        self.scratch.clear();
        self.scratch.try_reserve(required)?;
        self.capacity = required;
        Ok(true)
    }

    /// Whether a SysEx was started and not yet terminated.
    pub fn in_sysex(&self) -> bool {
        self.in_sysex
    }

    /// Forget running status and any open SysEx.
    pub fn reset(&mut self) {
        self.scratch.clear();
        self.running_status = None;
        self.in_sysex = false;
    }

    /// The event produced by the last successful [`encode`](Self::encode).
    pub fn event(&self) -> &[u8] {
        &self.scratch
    }

    /// Encode the first event of `bytes` into the scratch buffer and return
    /// how many input bytes it consumed (always at least one on success).
    pub fn encode(&mut self, bytes: &[u8]) -> Result<usize, DriverError> {
        self.scratch.clear();
        let Some(&first) = bytes.first() else {
            return Err(DriverError::Incomplete);
        };

        // Real-time bytes never disturb running status or an open SysEx.
        if messages::is_realtime(first) {
            self.scratch.push(first);
            return Ok(1);
        }

        if first == messages::SYSEX_START || (self.in_sysex && !messages::is_status(first)) {
            if first == messages::SYSEX_START {
                self.running_status = None;
            }
            return Ok(self.encode_sysex(bytes));
        }

        if first == messages::SYSEX_END {
            if !self.in_sysex {
                return Err(malformed("end of exclusive without a SysEx in progress"));
            }
            self.in_sysex = false;
            self.scratch.push(first);
            return Ok(1);
        }

        // Any other status byte ends an unterminated SysEx.
        if messages::is_status(first) {
            self.in_sysex = false;
        }

        match first {
            0x80..=0xEF => {
                let len = channel_message_len(first);
                self.copy_event(bytes, len)?;
                self.running_status = Some(first);
                Ok(len)
            }
            messages::TIME_CODE | messages::SONG_SELECT => {
                self.running_status = None;
                self.copy_event(bytes, 2)?;
                Ok(2)
            }
            messages::SONG_POSITION => {
                self.running_status = None;
                self.copy_event(bytes, 3)?;
                Ok(3)
            }
            messages::TUNE_REQUEST => {
                self.running_status = None;
                self.scratch.push(first);
                Ok(1)
            }
            0xF4 | 0xF5 => Err(malformed(format!("undefined status byte {first:#04X}"))),
            _ => {
                let Some(status) = self.running_status else {
                    return Err(malformed(format!(
                        "data byte {first:#04X} without a status byte"
                    )));
                };
                let data_len = channel_message_len(status) - 1;
                if bytes.len() < data_len {
                    return Err(DriverError::Incomplete);
                }
                check_data(&bytes[..data_len])?;
                self.scratch.push(status);
                self.scratch.extend_from_slice(&bytes[..data_len]);
                Ok(data_len)
            }
        }
    }

    fn copy_event(&mut self, bytes: &[u8], len: usize) -> Result<(), DriverError> {
        if bytes.len() < len {
            return Err(DriverError::Incomplete);
        }
        check_data(&bytes[1..len])?;
        self.scratch.extend_from_slice(&bytes[..len]);
        Ok(())
    }

    fn encode_sysex(&mut self, bytes: &[u8]) -> usize {
        let limit = bytes.len().min(self.capacity);
        let mut end = limit;
        let mut terminated = false;
        for (i, &byte) in bytes[..limit].iter().enumerate().skip(1) {
            if byte == messages::SYSEX_END {
                end = i + 1;
                terminated = true;
                break;
            }
            if messages::is_status(byte) && !messages::is_realtime(byte) {
                // A status byte aborts the SysEx; leave it for the next call.
                end = i;
                terminated = true;
                break;
            }
        }
        self.scratch.extend_from_slice(&bytes[..end]);
        self.in_sysex = !terminated;
        end
    }
}

impl Default for EncoderBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODER_CAPACITY)
    }
}

/// Length including the status byte of a channel voice message.
fn channel_message_len(status: u8) -> usize {
    match status & 0xF0 {
        messages::PROGRAM_CHANGE | messages::CHANNEL_AFTERTOUCH => 2,
        _ => 3,
    }
}

fn check_data(data: &[u8]) -> Result<(), DriverError> {
    match data.iter().find(|&&b| messages::is_status(b)) {
        Some(b) => Err(malformed(format!("status byte {b:#04X} inside message data"))),
        None => Ok(()),
    }
}

fn malformed(reason: impl Into<String>) -> DriverError {
    DriverError::Malformed {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_note_on() {
        let mut enc = EncoderBuffer::default();
        let consumed = enc.encode(&[0x90, 60, 100, 0x80, 60, 0]).unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(enc.event(), &[0x90, 60, 100]);
    }

    #[test]
    fn test_encode_program_change_is_two_bytes() {
        let mut enc = EncoderBuffer::default();
        assert_eq!(enc.encode(&[0xC3, 5]).unwrap(), 2);
        assert_eq!(enc.event(), &[0xC3, 5]);
    }

    #[test]
    fn test_running_status() {
        let mut enc = EncoderBuffer::default();
        enc.encode(&[0x90, 60, 100]).unwrap();
        let consumed = enc.encode(&[62, 90]).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(enc.event(), &[0x90, 62, 90]);
    }

    #[test]
    fn test_data_without_status_is_rejected() {
        let mut enc = EncoderBuffer::default();
        assert!(matches!(
            enc.encode(&[0x40, 0x7F]),
            Err(DriverError::Malformed { .. })
        ));
    }

    #[test]
    fn test_incomplete_channel_message() {
        let mut enc = EncoderBuffer::default();
        assert_eq!(enc.encode(&[0x90, 60]), Err(DriverError::Incomplete));
        assert_eq!(enc.encode(&[]), Err(DriverError::Incomplete));
    }

    #[test]
    fn test_undefined_status() {
        let mut enc = EncoderBuffer::default();
        assert!(matches!(enc.encode(&[0xF4]), Err(DriverError::Malformed { .. })));
        assert!(matches!(enc.encode(&[0xF7]), Err(DriverError::Malformed { .. })));
    }

    #[test]
    fn test_realtime_single_byte() {
        let mut enc = EncoderBuffer::default();
        assert_eq!(enc.encode(&[0xF8, 0xFA]).unwrap(), 1);
        assert_eq!(enc.event(), &[0xF8]);
    }

    #[test]
    fn test_sysex_fits_in_capacity() {
        let mut enc = EncoderBuffer::new(16);
        let sysex = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7, 0x90, 60, 100];
        assert_eq!(enc.encode(&sysex).unwrap(), 6);
        assert_eq!(enc.event(), &sysex[..6]);
        assert!(!enc.in_sysex());
        assert_eq!(enc.encode(&sysex[6..]).unwrap(), 3);
    }

    #[test]
    fn test_sysex_chunked_by_capacity() {
        let mut enc = EncoderBuffer::new(4);
        let sysex = [0xF0, 1, 2, 3, 4, 5, 0xF7];
        assert_eq!(enc.encode(&sysex).unwrap(), 4);
        assert!(enc.in_sysex());
        assert_eq!(enc.encode(&sysex[4..]).unwrap(), 3);
        assert_eq!(enc.event(), &[4, 5, 0xF7]);
        assert!(!enc.in_sysex());
    }

    #[test]
    fn test_sysex_across_calls() {
        let mut enc = EncoderBuffer::default();
        assert_eq!(enc.encode(&[0xF0, 0x43, 0x10]).unwrap(), 3);
        assert!(enc.in_sysex());
        assert_eq!(enc.encode(&[0x4C, 0x00, 0xF7]).unwrap(), 3);
        assert!(!enc.in_sysex());
    }

    #[test]
    fn test_status_byte_aborts_sysex() {
        let mut enc = EncoderBuffer::default();
        let consumed = enc.encode(&[0xF0, 1, 2, 0x90, 60, 100]).unwrap();
        assert_eq!(consumed, 3);
        assert!(!enc.in_sysex());
        assert_eq!(enc.encode(&[0x90, 60, 100]).unwrap(), 3);
    }

    #[test]
    fn test_reserve_grows_only() {
        let mut enc = EncoderBuffer::new(32);
        assert!(!enc.reserve(16).unwrap());
        assert_eq!(enc.capacity(), 32);
        assert!(enc.reserve(1024).unwrap());
        assert_eq!(enc.capacity(), 1024);
        assert!(!enc.reserve(64).unwrap());
        assert_eq!(enc.capacity(), 1024);
    }
}
