// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Errors surfaced by MIDI endpoints.

use thiserror::Error;

use crate::driver::DriverError;

/// Failures of port lifecycle operations. None of them are fatal; the
/// endpoint is left in its last consistent state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// The native MIDI service is not running; try again later.
    #[error("MIDI driver unavailable")]
    DriverUnavailable,
    #[error("invalid port index {index} ({count} ports available)")]
    InvalidPortIndex { index: usize, count: usize },
    /// `client:port` is longer than the driver accepts.
    #[error("port name '{name}' is too long (limit {max} including client name)")]
    InvalidName { name: String, max: usize },
    /// The operation needs a registered port.
    #[error("no port is open")]
    NotOpen,
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error(transparent)]
    Driver(DriverError),
}

impl From<DriverError> for PortError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Unavailable(_) => PortError::DriverUnavailable,
            DriverError::Unsupported(what) => PortError::Unsupported(what),
            other => PortError::Driver(other),
        }
    }
}

/// Failure of a `send_message` call. Chunks sent before the failure are not
/// recalled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("no output port is open")]
    PortClosed,
    #[error("could not grow the encoder buffer to {required} bytes")]
    Resize { required: usize },
    #[error("could not encode MIDI data at byte {offset}: {source}")]
    Encode { offset: usize, source: DriverError },
    /// The encoder made no progress.
    #[error("MIDI encoder consumed nothing at byte {offset}")]
    Stalled { offset: usize },
    #[error("could not transmit MIDI data at byte {offset}: {source}")]
    Transmit { offset: usize, source: DriverError },
    #[error("could not drain MIDI output: {0}")]
    Drain(DriverError),
}
