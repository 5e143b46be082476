// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Driver Port Interface.
//!
//! Every native MIDI subsystem (the in-process loopback bus, Core MIDI,
//! midir) is exposed through the [`Driver`] trait. Endpoints only ever talk
//! to a driver through this trait; the backend is chosen when the endpoint
//! is built and never inspected at runtime.

pub mod codec;
pub mod loopback;

#[cfg(target_os = "macos")]
pub mod coremidi_backend;
#[cfg(feature = "midir")]
pub mod midir_backend;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::EncoderBuffer;
pub use loopback::{LoopbackConfig, LoopbackDriver};

#[cfg(target_os = "macos")]
pub use coremidi_backend::CoreMidiDriver;
#[cfg(feature = "midir")]
pub use midir_backend::MidirDriver;

/// Errors reported by a native driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The native MIDI service is not running. Retrying later may succeed.
    #[error("MIDI driver unavailable: {0}")]
    Unavailable(String),
    /// The backend has no notion of this operation.
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    /// The encoder rejected the bytes it was given.
    #[error("malformed MIDI data: {reason}")]
    Malformed { reason: String },
    /// The bytes end before the current event is complete.
    #[error("incomplete MIDI message")]
    Incomplete,
    /// A handle or port id does not name a live port.
    #[error("unknown MIDI port")]
    UnknownPort,
    /// Native call failed for a backend specific reason.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Which backend an endpoint is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Api {
    Loopback,
    CoreMidi,
    Midir,
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Api::Loopback => "loopback",
            Api::CoreMidi => "coremidi",
            Api::Midir => "midir",
        };
        f.write_str(name)
    }
}

/// Direction of a port, seen from the client that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receives MIDI (an input endpoint's port).
    Input,
    /// Emits MIDI (an output endpoint's port).
    Output,
}

impl Direction {
    /// The direction of the ports this one may connect to.
    pub fn peer(self) -> Self {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }
}

/// How a port is published. Backends that make no distinction treat both alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// A port meant to be connected to an enumerated peer.
    Connectable,
    /// A port other applications connect to.
    Virtual,
}

/// Native client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientHandle(pub u32);

/// Native handle of a port registered by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortHandle(pub u32);

/// Identifier of an enumerated port, as understood by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortId(pub String);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of [`Driver::enumerate_ports`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub id: PortId,
}

/// A raw MIDI fragment as delivered by the native driver.
///
/// A fragment may be a whole message, part of a SysEx, or (from misbehaving
/// drivers) empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent<'a> {
    pub data: &'a [u8],
}

impl<'a> RawEvent<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

/// Handler the driver invokes on its own thread with each batch of events
/// received on one of the client's input ports.
///
/// The driver never runs two invocations for the same client at once, and
/// never runs one while a port of that client is being (un)registered.
pub type EventHandler = Box<dyn FnMut(PortHandle, &[RawEvent<'_>]) + Send>;

/// A handler the driver refused, handed back so it can be installed later.
pub struct HandlerRejected {
    pub error: DriverError,
    pub handler: EventHandler,
}

impl fmt::Debug for HandlerRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// The native subsystem's primitives.
///
/// Methods take `&self`: drivers are shared by several endpoints and keep
/// their own interior locking, off the real-time path.
pub trait Driver: Send + Sync + 'static {
    /// Which backend this is.
    fn api(&self) -> Api;

    /// Longest `client:port` name the backend accepts, if it has a limit.
    fn max_port_name_len(&self) -> Option<usize> {
        None
    }

    /// Establish a native client.
    fn open_client(&self, name: &str) -> Result<ClientHandle, DriverError>;

    /// Release a client and every port it still owns.
    fn close_client(&self, client: ClientHandle);

    /// Install the callback invoked with incoming batches for `client`.
    fn set_event_handler(&self, client: ClientHandle, handler: EventHandler)
        -> Result<(), HandlerRejected>;

    /// Rename the native client.
    fn rename_client(&self, _client: ClientHandle, _name: &str) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("renaming a client"))
    }

    fn register_port(
        &self,
        client: ClientHandle,
        name: &str,
        direction: Direction,
        kind: PortKind,
    ) -> Result<PortHandle, DriverError>;

    fn unregister_port(&self, client: ClientHandle, port: PortHandle);

    /// Rename a registered port.
    fn rename_port(
        &self,
        _client: ClientHandle,
        _port: PortHandle,
        _name: &str,
    ) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("renaming a port"))
    }

    /// Ports a `direction` port of ours could connect to. Order is the
    /// driver's and may change between calls.
    fn enumerate_ports(&self, direction: Direction) -> Vec<PortInfo>;

    /// Connect our `port` to the enumerated `peer`.
    fn connect(&self, client: ClientHandle, port: PortHandle, peer: &PortId)
        -> Result<(), DriverError>;

    /// Drop every connection of `port`, keeping it registered.
    fn disconnect(&self, client: ClientHandle, port: PortHandle);

    /// Encode the first event of `bytes` with `buffer` and queue it on `port`.
    /// Returns how many bytes of `bytes` were consumed.
    fn encode_and_transmit(
        &self,
        client: ClientHandle,
        port: PortHandle,
        bytes: &[u8],
        buffer: &mut EncoderBuffer,
    ) -> Result<usize, DriverError>;

    /// Flush everything queued by `encode_and_transmit`.
    fn drain_output(&self, client: ClientHandle) -> Result<(), DriverError>;
}
