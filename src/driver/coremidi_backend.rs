// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Core MIDI backend for macOS.
//!
//! Core MIDI calls our input port callbacks on its own high-priority thread,
//! one packet list at a time. Each packet becomes one raw event of the batch.
//! Output is sent immediately, so draining is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use coremidi::{
    Client, Destination, Destinations, InputPort, OutputPort, PacketBuffer, PacketList, Source,
    Sources, VirtualDestination, VirtualSource,
};
use parking_lot::Mutex;
use tracing::debug;

use super::{
    Api, ClientHandle, Direction, Driver, DriverError, EncoderBuffer, EventHandler,
    HandlerRejected, PortHandle, PortId, PortInfo, PortKind, RawEvent,
};

type SharedHandler = Arc<Mutex<Option<EventHandler>>>;

enum NativePort {
    Input {
        port: InputPort,
        source: Option<Source>,
    },
    VirtualInput(VirtualDestination),
    Output {
        port: OutputPort,
        destination: Option<Destination>,
    },
    VirtualOutput(VirtualSource),
}

/// Where an encoded event goes.
enum Target<'a> {
    Port(&'a OutputPort, &'a Destination),
    Virtual(&'a VirtualSource),
}

struct ClientEntry {
    client: Client,
    handler: SharedHandler,
    ports: HashMap<PortHandle, NativePort>,
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

    fn client(&mut self, client: ClientHandle) -> Result<&mut ClientEntry, DriverError> {
        self.clients
            .get_mut(&client)
            .ok_or_else(|| DriverError::Backend(format!("unknown client {}", client.0)))
    }
}

/// Core MIDI implementation of [`Driver`].
#[derive(Default)]
pub struct CoreMidiDriver {
    state: Mutex<State>,
}

impl CoreMidiDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

fn os_error(what: &str, status: i32) -> DriverError {
    DriverError::Backend(format!("{what} failed (OSStatus {status})"))
}

fn parse_index(id: &PortId) -> Result<usize, DriverError> {
    id.0.parse().map_err(|_| DriverError::UnknownPort)
}

/// Input callback forwarding each packet list as one batch.
fn forwarder(
    handler: SharedHandler,
    port: PortHandle,
) -> impl FnMut(&PacketList) + Send + 'static {
    move |packets: &PacketList| {
        let events: Vec<RawEvent<'_>> = packets.iter().map(|p| RawEvent::new(p.data())).collect();
        if let Some(handler) = handler.lock().as_mut() {
            handler(port, &events);
        }
    }
}

impl Driver for CoreMidiDriver {
    fn api(&self) -> Api {
        Api::CoreMidi
    }

    fn open_client(&self, name: &str) -> Result<ClientHandle, DriverError> {
        let client = Client::new(name).map_err(|status| {
            DriverError::Unavailable(format!("MIDIClientCreate failed (OSStatus {status})"))
        })?;
        let mut state = self.state.lock();
        let handle = ClientHandle(state.allocate_id());
        state.clients.insert(
            handle,
            ClientEntry {
                client,
                handler: Arc::new(Mutex::new(None)),
                ports: HashMap::new(),
            },
        );
        debug!(client = handle.0, name, "Core MIDI client created");
        Ok(handle)
    }

    fn close_client(&self, client: ClientHandle) {
        let entry = self.state.lock().clients.remove(&client);
        if let Some(entry) = entry {
            // Ports must go before the client that owns them.
            drop(entry.ports);
            entry.handler.lock().take();
            drop(entry.client);
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
        let entry = state.client(client)?;
        let handler = Arc::clone(&entry.handler);

        let native = match (direction, kind) {
            (Direction::Input, PortKind::Connectable) => NativePort::Input {
                port: entry
                    .client
                    .input_port(name, forwarder(handler, handle))
                    .map_err(|s| os_error("MIDIInputPortCreate", s))?,
                source: None,
            },
            (Direction::Input, PortKind::Virtual) => NativePort::VirtualInput(
                entry
                    .client
                    .virtual_destination(name, forwarder(handler, handle))
                    .map_err(|s| os_error("MIDIDestinationCreate", s))?,
            ),
            (Direction::Output, PortKind::Connectable) => NativePort::Output {
                port: entry
                    .client
                    .output_port(name)
                    .map_err(|s| os_error("MIDIOutputPortCreate", s))?,
                destination: None,
            },
            (Direction::Output, PortKind::Virtual) => NativePort::VirtualOutput(
                entry
                    .client
                    .virtual_source(name)
                    .map_err(|s| os_error("MIDISourceCreate", s))?,
            ),
        };

        entry.ports.insert(handle, native);
        debug!(client = client.0, port = handle.0, name, ?kind, "Core MIDI port created");
        Ok(handle)
    }

    fn unregister_port(&self, client: ClientHandle, port: PortHandle) {
        let removed = self
            .state
            .lock()
            .client(client)
            .ok()
            .and_then(|entry| entry.ports.remove(&port));
        if let Some(NativePort::Input {
            port,
            source: Some(source),
        }) = &removed
        {
            let _ = port.disconnect_source(source);
        }
        // Disposing the native port waits for its callback to return.
        drop(removed);
    }

    fn enumerate_ports(&self, direction: Direction) -> Vec<PortInfo> {
        let named = |i: usize, name: Option<String>| PortInfo {
            name: name.unwrap_or_else(|| format!("Unknown {}", i)),
            id: PortId(i.to_string()),
        };
        match direction {
            Direction::Input => Sources
                .into_iter()
                .enumerate()
                .map(|(i, source)| named(i, source.display_name()))
                .collect(),
            Direction::Output => Destinations
                .into_iter()
                .enumerate()
                .map(|(i, dest)| named(i, dest.display_name()))
                .collect(),
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
        let entry = state.client(client)?;
        match entry.ports.get_mut(&port) {
            Some(NativePort::Input { port, source }) => {
                let found = Source::from_index(index).ok_or(DriverError::UnknownPort)?;
                port.connect_source(&found)
                    .map_err(|s| os_error("MIDIPortConnectSource", s))?;
                *source = Some(found);
                Ok(())
            }
            Some(NativePort::Output { destination, .. }) => {
                let found = Destination::from_index(index).ok_or(DriverError::UnknownPort)?;
                *destination = Some(found);
                Ok(())
            }
            Some(_) => Err(DriverError::Unsupported("connecting a virtual port")),
            None => Err(DriverError::UnknownPort),
        }
    }

    fn disconnect(&self, client: ClientHandle, port: PortHandle) {
        let mut state = self.state.lock();
        let Ok(entry) = state.client(client) else {
            return;
        };
        match entry.ports.get_mut(&port) {
            Some(NativePort::Input { port, source }) => {
                if let Some(source) = source.take() {
                    let _ = port.disconnect_source(&source);
                }
            }
            Some(NativePort::Output { destination, .. }) => {
                destination.take();
            }
            _ => {}
        }
    }

    fn encode_and_transmit(
        &self,
        client: ClientHandle,
        port: PortHandle,
        bytes: &[u8],
        buffer: &mut EncoderBuffer,
    ) -> Result<usize, DriverError> {
        let mut state = self.state.lock();
        let entry = state.client(client)?;
        let target = match entry.ports.get(&port) {
            Some(NativePort::Output {
                port,
                destination: Some(destination),
            }) => Target::Port(port, destination),
            Some(NativePort::Output {
                destination: None, ..
            }) => return Err(DriverError::Backend("output port is not connected".into())),
            Some(NativePort::VirtualOutput(source)) => Target::Virtual(source),
            Some(_) => return Err(DriverError::Backend("port is not an output".into())),
            None => return Err(DriverError::UnknownPort),
        };

        let consumed = buffer.encode(bytes)?;
        let packets = PacketBuffer::new(0, buffer.event());
        match target {
            Target::Port(port, destination) => port
                .send(destination, &packets)
                .map_err(|s| os_error("MIDISend", s))?,
            Target::Virtual(source) => source
                .received(&packets)
                .map_err(|s| os_error("MIDIReceived", s))?,
        }
        Ok(consumed)
    }

    fn drain_output(&self, _client: ClientHandle) -> Result<(), DriverError> {
        Ok(())
    }
}
