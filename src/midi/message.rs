// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Reconstructed MIDI messages.

use std::fmt;

use super::messages;

/// One complete MIDI message as handed to client code.
///
/// `timestamp` is the delta in seconds since the previous delivered message
/// (`0.0` for the first one).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MidiMessage {
    pub timestamp: f64,
    pub bytes: Vec<u8>,
}

impl MidiMessage {
    pub fn new(timestamp: f64, bytes: Vec<u8>) -> Self {
        Self { timestamp, bytes }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn status(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    pub fn is_sysex(&self) -> bool {
        self.status() == Some(messages::SYSEX_START)
    }

    /// Parsed view of the bytes, for display and routing.
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::parse(&self.bytes)
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10.6}s ", self.timestamp)?;
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Parsed MIDI message types
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// Note On: channel (0-15), note (0-127), velocity (1-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// Pitch Bend: channel (0-15), value (-8192 to 8191)
    PitchBend { channel: u8, value: i16 },
    ChannelAftertouch { channel: u8, pressure: u8 },
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
    /// System Exclusive, payload between `F0` and `F7`
    SysEx(Vec<u8>),
    /// MIDI Time Code quarter frame
    TimeCode(u8),
    SongPosition(u16),
    SongSelect(u8),
    TuneRequest,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    Reset,
    /// Anything that did not parse as one of the above
    Unknown(Vec<u8>),
}

impl MessageKind {
    /// Parse raw MIDI bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;

        match status {
            messages::TIMING_CLOCK => return Some(MessageKind::TimingClock),
            messages::START => return Some(MessageKind::Start),
            messages::CONTINUE => return Some(MessageKind::Continue),
            messages::STOP => return Some(MessageKind::Stop),
            messages::ACTIVE_SENSING => return Some(MessageKind::ActiveSensing),
            messages::RESET => return Some(MessageKind::Reset),
            messages::TUNE_REQUEST => return Some(MessageKind::TuneRequest),
            messages::SYSEX_START => {
                let payload = match rest.split_last() {
                    Some((&messages::SYSEX_END, body)) => body,
                    _ => rest,
                };
                return Some(MessageKind::SysEx(payload.to_vec()));
            }
            messages::TIME_CODE if data.len() >= 2 => {
                return Some(MessageKind::TimeCode(data[1] & 0x7F))
            }
            messages::SONG_POSITION if data.len() >= 3 => {
                let value = (data[1] as u16 & 0x7F) | ((data[2] as u16 & 0x7F) << 7);
                return Some(MessageKind::SongPosition(value));
            }
            messages::SONG_SELECT if data.len() >= 2 => {
                return Some(MessageKind::SongSelect(data[1] & 0x7F))
            }
            _ => {}
        }

        let msg_type = status & 0xF0;
        let channel = status & 0x0F;

        match msg_type {
            messages::NOTE_OFF if data.len() >= 3 => Some(MessageKind::NoteOff {
                channel,
                note: data[1] & 0x7F,
                velocity: data[2] & 0x7F,
            }),
            messages::NOTE_ON if data.len() >= 3 => {
                let velocity = data[2] & 0x7F;
                // Note On with velocity 0 is a Note Off
                if velocity == 0 {
                    Some(MessageKind::NoteOff {
                        channel,
                        note: data[1] & 0x7F,
                        velocity: 0,
                    })
                } else {
                    Some(MessageKind::NoteOn {
                        channel,
                        note: data[1] & 0x7F,
                        velocity,
                    })
                }
            }
            messages::CONTROL_CHANGE if data.len() >= 3 => Some(MessageKind::ControlChange {
                channel,
                controller: data[1] & 0x7F,
                value: data[2] & 0x7F,
            }),
            messages::PROGRAM_CHANGE if data.len() >= 2 => Some(MessageKind::ProgramChange {
                channel,
                program: data[1] & 0x7F,
            }),
            messages::PITCH_BEND if data.len() >= 3 => {
                let lsb = (data[1] & 0x7F) as i16;
                let msb = (data[2] & 0x7F) as i16;
                Some(MessageKind::PitchBend {
                    channel,
                    value: ((msb << 7) | lsb) - 8192,
                })
            }
            messages::CHANNEL_AFTERTOUCH if data.len() >= 2 => {
                Some(MessageKind::ChannelAftertouch {
                    channel,
                    pressure: data[1] & 0x7F,
                })
            }
            messages::POLY_AFTERTOUCH if data.len() >= 3 => Some(MessageKind::PolyAftertouch {
                channel,
                note: data[1] & 0x7F,
                pressure: data[2] & 0x7F,
            }),
            _ => Some(MessageKind::Unknown(data.to_vec())),
        }
    }

    /// MIDI Time Code or Timing Clock.
    pub fn is_timing(&self) -> bool {
        matches!(self, MessageKind::TimeCode(_) | MessageKind::TimingClock)
    }
}

/// Accumulates the bytes of one logical message, which for SysEx may arrive
/// over several driver fragments.
///
/// There is no size limit: a SysEx that is never terminated keeps growing.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    bytes: Vec<u8>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, fragment: &[u8]) {
        self.bytes.extend_from_slice(fragment);
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Move the accumulated bytes out as a completed message, leaving the
    /// buffer empty.
    pub fn take(&mut self, timestamp: f64) -> MidiMessage {
        MidiMessage::new(timestamp, std::mem::take(&mut self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_on() {
        assert_eq!(
            MessageKind::parse(&[0x90, 60, 100]),
            Some(MessageKind::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            })
        );
    }

    #[test]
    fn test_parse_note_on_velocity_zero() {
        assert_eq!(
            MessageKind::parse(&[0x93, 60, 0]),
            Some(MessageKind::NoteOff {
                channel: 3,
                note: 60,
                velocity: 0
            })
        );
    }

    #[test]
    fn test_parse_pitch_bend() {
        assert_eq!(
            MessageKind::parse(&[0xE0, 0x00, 0x40]),
            Some(MessageKind::PitchBend {
                channel: 0,
                value: 0
            })
        );
        assert_eq!(
            MessageKind::parse(&[0xE1, 0x7F, 0x7F]),
            Some(MessageKind::PitchBend {
                channel: 1,
                value: 8191
            })
        );
    }

    #[test]
    fn test_parse_system_messages() {
        assert_eq!(MessageKind::parse(&[0xF8]), Some(MessageKind::TimingClock));
        assert_eq!(MessageKind::parse(&[0xFE]), Some(MessageKind::ActiveSensing));
        assert_eq!(MessageKind::parse(&[0xF1, 0x23]), Some(MessageKind::TimeCode(0x23)));
        assert_eq!(
            MessageKind::parse(&[0xF2, 0x01, 0x01]),
            Some(MessageKind::SongPosition(129))
        );
        assert!(MessageKind::TimingClock.is_timing());
        assert!(!MessageKind::ActiveSensing.is_timing());
    }

    #[test]
    fn test_parse_sysex_strips_framing() {
        assert_eq!(
            MessageKind::parse(&[0xF0, 0x7E, 0x01, 0xF7]),
            Some(MessageKind::SysEx(vec![0x7E, 0x01]))
        );
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(MessageKind::parse(&[]), None);
    }

    #[test]
    fn test_display_hex() {
        let msg = MidiMessage::new(0.5, vec![0x90, 0x40, 0x7F]);
        assert_eq!(msg.to_string(), "  0.500000s 90 40 7F");
    }

    #[test]
    fn test_buffer_accumulates_and_takes() {
        let mut buffer = MessageBuffer::new();
        assert!(buffer.is_empty());
        buffer.append(&[0xF0, 1, 2]);
        buffer.append(&[3, 0xF7]);
        assert_eq!(buffer.len(), 5);

        let msg = buffer.take(0.25);
        assert_eq!(msg.bytes, vec![0xF0, 1, 2, 3, 0xF7]);
        assert_eq!(msg.timestamp, 0.25);
        assert!(msg.is_sysex());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_clear() {
        let mut buffer = MessageBuffer::with_capacity(8);
        buffer.append(&[0x90, 60, 100]);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.as_slice(), &[] as &[u8]);
    }
}
