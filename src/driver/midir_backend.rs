// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Backend implemented using the `midir` crate.
//!
//! midir has no separate port registration step: a native port only exists
//! while a connection is open. A registered port is therefore held as a
//! name until it is connected, and falls back to that when disconnected.
//! Virtual ports are created at registration (not available on Windows).

use std::collections::HashMap;
use std::sync::Arc;

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::debug;

use super::{
    Api, ClientHandle, Direction, Driver, DriverError, EncoderBuffer, EventHandler,
    HandlerRejected, PortHandle, PortId, PortInfo, PortKind, RawEvent,
};

type SharedHandler = Arc<Mutex<Option<EventHandler>>>;

enum Connection {
    /// Registered, not connected.
    Idle,
    Input(MidiInputConnection<()>),
    Output(MidiOutputConnection),
}

struct PortEntry {
    name: String,
    direction: Direction,
    connection: Connection,
}

struct ClientEntry {
    name: String,
    handler: SharedHandler,
    ports: HashMap<PortHandle, PortEntry>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    clients: HashMap<ClientHandle, ClientEntry>,
}

impl State {
    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn port(
        &mut self,
        client: ClientHandle,
        port: PortHandle,
    ) -> Result<&mut PortEntry, DriverError> {
        self.clients
            .get_mut(&client)
            .and_then(|entry| entry.ports.get_mut(&port))
            .ok_or(DriverError::UnknownPort)
    }
}

/// midir implementation of [`Driver`].
#[derive(Default)]
pub struct MidirDriver {
    state: Mutex<State>,
}

impl MidirDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_input(name: &str) -> Result<MidiInput, DriverError> {
    let mut input = MidiInput::new(name).map_err(|e| DriverError::Unavailable(e.to_string()))?;
    // Filtering happens in the reconstructor.
    input.ignore(Ignore::None);
    Ok(input)
}

fn new_output(name: &str) -> Result<MidiOutput, DriverError> {
    MidiOutput::new(name).map_err(|e| DriverError::Unavailable(e.to_string()))
}

fn parse_index(id: &PortId) -> Result<usize, DriverError> {
    id.0.parse().map_err(|_| DriverError::UnknownPort)
}

fn forwarder(
    handler: SharedHandler,
    port: PortHandle,
) -> impl FnMut(u64, &[u8], &mut ()) + Send + 'static {
    move |_timestamp, message, _| {
        if let Some(handler) = handler.lock().as_mut() {
            handler(port, &[RawEvent::new(message)]);
        }
    }
}

#[cfg(unix)]
fn create_virtual(
    client_name: &str,
    port_name: &str,
    direction: Direction,
    handler: SharedHandler,
    port: PortHandle,
) -> Result<Connection, DriverError> {
    use midir::os::unix::{VirtualInput, VirtualOutput};

    match direction {
        Direction::Input => new_input(client_name)?
            .create_virtual(port_name, forwarder(handler, port), ())
            .map(Connection::Input)
            .map_err(|e| DriverError::Backend(e.to_string())),
        Direction::Output => new_output(client_name)?
            .create_virtual(port_name)
            .map(Connection::Output)
            .map_err(|e| DriverError::Backend(e.to_string())),
    }
}

#[cfg(not(unix))]
fn create_virtual(
    _client_name: &str,
    _port_name: &str,
    _direction: Direction,
    _handler: SharedHandler,
    _port: PortHandle,
) -> Result<Connection, DriverError> {
    Err(DriverError::Unsupported("creating a virtual port"))
}

impl Driver for MidirDriver {
    fn api(&self) -> Api {
        Api::Midir
    }

    fn open_client(&self, name: &str) -> Result<ClientHandle, DriverError> {
        // Probe the native service so an offline one is reported here.
        new_input(name)?;
        let mut state = self.state.lock();
        let handle = ClientHandle(state.allocate_id());
        state.clients.insert(
            handle,
            ClientEntry {
                name: name.to_string(),
                handler: Arc::new(Mutex::new(None)),
                ports: HashMap::new(),
            },
        );
        debug!(client = handle.0, name, "midir client opened");
        Ok(handle)
    }

    fn close_client(&self, client: ClientHandle) {
        let entry = self.state.lock().clients.remove(&client);
        if let Some(entry) = entry {
            drop(entry.ports);
            entry.handler.lock().take();
        }
    }

    fn set_event_handler(
        &self,
        client: ClientHandle,
        handler: EventHandler,
    ) -> Result<(), HandlerRejected> {
        let mut state = self.state.lock();
        match state.clients.get_mut(&client) {
            Some(entry) => {
                *entry.handler.lock() = Some(handler);
                Ok(())
            }
            None => Err(HandlerRejected {
                error: DriverError::Backend(format!("unknown client {}", client.0)),
                handler,
            }),
        }
    }

    fn register_port(
        &self,
        client: ClientHandle,
        name: &str,
        direction: Direction,
        kind: PortKind,
    ) -> Result<PortHandle, DriverError> {
        let mut state = self.state.lock();
        let handle = PortHandle(state.allocate_id());
        let entry = state
            .clients
            .get_mut(&client)
            .ok_or_else(|| DriverError::Backend(format!("unknown client {}", client.0)))?;

        let connection = match kind {
            PortKind::Connectable => Connection::Idle,
            PortKind::Virtual => {
                create_virtual(&entry.name, name, direction, Arc::clone(&entry.handler), handle)?
            }
        };
        entry.ports.insert(
            handle,
            PortEntry {
                name: name.to_string(),
                direction,
                connection,
            },
        );
        debug!(client = client.0, port = handle.0, name, ?kind, "midir port registered");
        Ok(handle)
    }

    fn unregister_port(&self, client: ClientHandle, port: PortHandle) {
        let removed = self
            .state
            .lock()
            .clients
            .get_mut(&client)
            .and_then(|entry| entry.ports.remove(&port));
        // Closing an input connection joins its callback.
        drop(removed);
    }

    fn enumerate_ports(&self, direction: Direction) -> Vec<PortInfo> {
        let named = |i: usize, name: Result<String, midir::PortInfoError>| PortInfo {
            name: name.unwrap_or_else(|_| format!("Port {i}")),
            id: PortId(i.to_string()),
        };
        match direction {
            Direction::Input => match new_input("midilink enumerate") {
                Ok(input) => input
                    .ports()
                    .iter()
                    .enumerate()
                    .map(|(i, port)| named(i, input.port_name(port)))
                    .collect(),
                Err(_) => Vec::new(),
            },
            Direction::Output => match new_output("midilink enumerate") {
                Ok(output) => output
                    .ports()
                    .iter()
                    .enumerate()
                    .map(|(i, port)| named(i, output.port_name(port)))
                    .collect(),
                Err(_) => Vec::new(),
            },
        }
    }

    fn connect(
        &self,
        client: ClientHandle,
        port: PortHandle,
        peer: &PortId,
    ) -> Result<(), DriverError> {
        let index = parse_index(peer)?;
        let mut state = self.state.lock();
        let (client_name, handler) = match state.clients.get(&client) {
            Some(entry) => (entry.name.clone(), Arc::clone(&entry.handler)),
            None => return Err(DriverError::UnknownPort),
        };
        let entry = state.port(client, port)?;
        if !matches!(entry.connection, Connection::Idle) {
            return Err(DriverError::Backend("port is already connected".into()));
        }

        entry.connection = match entry.direction {
            Direction::Input => {
                let input = new_input(&client_name)?;
                let ports = input.ports();
                let target = ports.get(index).ok_or(DriverError::UnknownPort)?;
                input
                    .connect(target, &entry.name, forwarder(handler, port), ())
                    .map(Connection::Input)
                    .map_err(|e| DriverError::Backend(e.to_string()))?
            }
            Direction::Output => {
                let output = new_output(&client_name)?;
                let ports = output.ports();
                let target = ports.get(index).ok_or(DriverError::UnknownPort)?;
                output
                    .connect(target, &entry.name)
                    .map(Connection::Output)
                    .map_err(|e| DriverError::Backend(e.to_string()))?
            }
        };
        Ok(())
    }

    fn disconnect(&self, client: ClientHandle, port: PortHandle) {
        let previous = self
            .state
            .lock()
            .port(client, port)
            .map(|entry| std::mem::replace(&mut entry.connection, Connection::Idle));
        drop(previous);
    }

    fn encode_and_transmit(
        &self,
        client: ClientHandle,
        port: PortHandle,
        bytes: &[u8],
        buffer: &mut EncoderBuffer,
    ) -> Result<usize, DriverError> {
        let mut state = self.state.lock();
        let entry = state.port(client, port)?;
        let Connection::Output(connection) = &mut entry.connection else {
            return Err(DriverError::Backend("output port is not connected".into()));
        };
        let consumed = buffer.encode(bytes)?;
        connection
            .send(buffer.event())
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        Ok(consumed)
    }

    fn drain_output(&self, _client: ClientHandle) -> Result<(), DriverError> {
        Ok(())
    }
}
