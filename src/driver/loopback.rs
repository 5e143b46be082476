// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! In-process loopback MIDI bus.
//!
//! Behaves like a small sequencer daemon: clients register ports, ports are
//! subscribed to each other, output is queued until drained, and incoming
//! batches are delivered to each client's handler on a dispatcher thread the
//! driver owns. It also hosts "hardware" ports (see [`LoopbackDriver::add_source`]
//! and [`LoopbackDriver::add_destination`]) so tests can feed raw fragments
//! and inspect what an output endpoint actually transmitted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use super::{
    Api, ClientHandle, Direction, Driver, DriverError, EncoderBuffer, EventHandler,
    HandlerRejected, PortHandle, PortId, PortInfo, PortKind, RawEvent,
};

/// Full `client:port` name limit, matching the usual JACK port name size.
pub const DEFAULT_MAX_PORT_NAME_LEN: usize = 256;

const SYSTEM_CLIENT: ClientHandle = ClientHandle(0);
const SYSTEM_CLIENT_NAME: &str = "Loopback";

/// Knobs for the loopback bus.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Longest accepted `client:port` name.
    pub max_port_name_len: usize,
    /// Whether registered ports may be renamed.
    pub supports_port_rename: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            max_port_name_len: DEFAULT_MAX_PORT_NAME_LEN,
            supports_port_rename: true,
        }
    }
}

struct PortEntry {
    client: ClientHandle,
    name: String,
    direction: Direction,
}

struct Bus {
    available: bool,
    next_id: u32,
    clients: BTreeMap<ClientHandle, String>,
    ports: BTreeMap<PortHandle, PortEntry>,
    /// (source output port, destination input port)
    subscriptions: Vec<(PortHandle, PortHandle)>,
    outbox: HashMap<ClientHandle, Vec<(PortHandle, Vec<u8>)>>,
    captured: HashMap<PortHandle, Vec<Vec<u8>>>,
}

impl Bus {
    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn owned_port(
        &self,
        client: ClientHandle,
        port: PortHandle,
    ) -> Result<&PortEntry, DriverError> {
        match self.ports.get(&port) {
            Some(entry) if entry.client == client => Ok(entry),
            _ => Err(DriverError::UnknownPort),
        }
    }

    fn full_name(&self, entry: &PortEntry) -> String {
        let client = self.clients.get(&entry.client).map(String::as_str).unwrap_or("?");
        format!("{}:{}", client, entry.name)
    }

    fn destinations(&self, source: PortHandle) -> impl Iterator<Item = PortHandle> + '_ {
        self.subscriptions
            .iter()
            .filter(move |(src, _)| *src == source)
            .map(|(_, dst)| *dst)
    }

    fn remove_port(&mut self, port: PortHandle) {
        self.ports.remove(&port);
        self.subscriptions
            .retain(|(src, dst)| *src != port && *dst != port);
        self.captured.remove(&port);
    }
}

enum Dispatch {
    Batch {
        client: ClientHandle,
        port: PortHandle,
        events: Vec<Vec<u8>>,
    },
    Barrier(Sender<()>),
}

struct Shared {
    // Lock order: handlers before bus.
    handlers: Mutex<HashMap<ClientHandle, EventHandler>>,
    bus: Mutex<Bus>,
}

/// A virtual MIDI bus living inside this process.
pub struct LoopbackDriver {
    shared: Arc<Shared>,
    dispatch: Sender<Dispatch>,
    config: LoopbackConfig,
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self::with_config(LoopbackConfig::default())
    }

    pub fn with_config(config: LoopbackConfig) -> Self {
        let mut clients = BTreeMap::new();
        clients.insert(SYSTEM_CLIENT, SYSTEM_CLIENT_NAME.to_string());

        let shared = Arc::new(Shared {
            handlers: Mutex::new(HashMap::new()),
            bus: Mutex::new(Bus {
                available: true,
                next_id: 1,
                clients,
                ports: BTreeMap::new(),
                subscriptions: Vec::new(),
                outbox: HashMap::new(),
                captured: HashMap::new(),
            }),
        });

        let (tx, rx) = unbounded();
        let dispatcher_shared = Arc::clone(&shared);
        thread::spawn(move || run_dispatcher(dispatcher_shared, rx));

        Self {
            shared,
            dispatch: tx,
            config,
        }
    }

    /// Take the bus offline (new clients fail with `Unavailable`) or back online.
    pub fn set_available(&self, available: bool) {
        self.shared.bus.lock().available = available;
    }

    pub fn is_available(&self) -> bool {
        self.shared.bus.lock().available
    }

    /// Register a hardware-like source other clients can read from.
    pub fn add_source(&self, name: &str) -> PortId {
        self.add_system_port(name, Direction::Output)
    }

    /// Register a hardware-like destination that records what it receives.
    pub fn add_destination(&self, name: &str) -> PortId {
        self.add_system_port(name, Direction::Input)
    }

    /// Remove a port added with `add_source`/`add_destination`.
    pub fn remove_system_port(&self, id: &PortId) {
        let Some(port) = parse_port_id(id) else {
            return;
        };
        let _handlers = self.shared.handlers.lock();
        let mut bus = self.shared.bus.lock();
        if bus.ports.get(&port).map(|p| p.client) == Some(SYSTEM_CLIENT) {
            bus.remove_port(port);
        }
    }

    /// Emit one batch of raw fragments from a source added with `add_source`.
    pub fn inject(&self, source: &PortId, events: &[&[u8]]) -> Result<(), DriverError> {
        let port = parse_port_id(source).ok_or(DriverError::UnknownPort)?;
        let bus = self.shared.bus.lock();
        bus.owned_port(SYSTEM_CLIENT, port)?;
        for dst in bus.destinations(port) {
            let Some(entry) = bus.ports.get(&dst) else {
                continue;
            };
            self.dispatch
                .send(Dispatch::Batch {
                    client: entry.client,
                    port: dst,
                    events: events.iter().map(|e| e.to_vec()).collect(),
                })
                .map_err(|_| dispatcher_gone())?;
        }
        Ok(())
    }

    /// Everything a destination added with `add_destination` has received,
    /// one entry per transmitted event.
    pub fn received(&self, destination: &PortId) -> Vec<Vec<u8>> {
        let Some(port) = parse_port_id(destination) else {
            return Vec::new();
        };
        self.shared
            .bus
            .lock()
            .captured
            .get(&port)
            .cloned()
            .unwrap_or_default()
    }

    /// Block until every batch queued so far has been delivered.
    pub fn sync(&self) {
        let (tx, rx) = bounded(1);
        if self.dispatch.send(Dispatch::Barrier(tx)).is_ok() {
            let _ = rx.recv_timeout(Duration::from_secs(5));
        }
    }

    fn add_system_port(&self, name: &str, direction: Direction) -> PortId {
        let mut bus = self.shared.bus.lock();
        let port = PortHandle(bus.allocate_id());
        bus.ports.insert(
            port,
            PortEntry {
                client: SYSTEM_CLIENT,
                name: name.to_string(),
                direction,
            },
        );
        port_id(port)
    }
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for LoopbackDriver {
    fn api(&self) -> Api {
        Api::Loopback
    }

    fn max_port_name_len(&self) -> Option<usize> {
        Some(self.config.max_port_name_len)
    }

    fn open_client(&self, name: &str) -> Result<ClientHandle, DriverError> {
        let mut bus = self.shared.bus.lock();
        if !bus.available {
            return Err(DriverError::Unavailable("loopback bus is offline".into()));
        }
        let client = ClientHandle(bus.allocate_id());
        bus.clients.insert(client, name.to_string());
        debug!(client = client.0, name, "loopback client opened");
        Ok(client)
    }

    fn close_client(&self, client: ClientHandle) {
        if client == SYSTEM_CLIENT {
            return;
        }
        let mut handlers = self.shared.handlers.lock();
        handlers.remove(&client);
        let mut bus = self.shared.bus.lock();
        let owned: Vec<PortHandle> = bus
            .ports
            .iter()
            .filter(|(_, entry)| entry.client == client)
            .map(|(port, _)| *port)
            .collect();
        for port in owned {
            bus.remove_port(port);
        }
        bus.outbox.remove(&client);
        bus.clients.remove(&client);
        debug!(client = client.0, "loopback client closed");
    }

    fn set_event_handler(
        &self,
        client: ClientHandle,
        handler: EventHandler,
    ) -> Result<(), HandlerRejected> {
        let mut handlers = self.shared.handlers.lock();
        if !self.shared.bus.lock().clients.contains_key(&client) {
            return Err(HandlerRejected {
                error: DriverError::Backend(format!("unknown client {}", client.0)),
                handler,
            });
        }
        handlers.insert(client, handler);
        Ok(())
    }

    fn register_port(
        &self,
        client: ClientHandle,
        name: &str,
        direction: Direction,
        kind: PortKind,
    ) -> Result<PortHandle, DriverError> {
        let _handlers = self.shared.handlers.lock();
        let mut bus = self.shared.bus.lock();
        if !bus.clients.contains_key(&client) {
            return Err(DriverError::Backend(format!("unknown client {}", client.0)));
        }
        let port = PortHandle(bus.allocate_id());
        bus.ports.insert(
            port,
            PortEntry {
                client,
                name: name.to_string(),
                direction,
            },
        );
        debug!(client = client.0, port = port.0, name, ?kind, "loopback port registered");
        Ok(port)
    }

    fn unregister_port(&self, client: ClientHandle, port: PortHandle) {
        // Holding the handler lock waits out any callback in flight.
        let _handlers = self.shared.handlers.lock();
        let mut bus = self.shared.bus.lock();
        if bus.owned_port(client, port).is_ok() {
            bus.remove_port(port);
        }
    }

    fn rename_port(
        &self,
        client: ClientHandle,
        port: PortHandle,
        name: &str,
    ) -> Result<(), DriverError> {
        if !self.config.supports_port_rename {
            return Err(DriverError::Unsupported("renaming a port"));
        }
        let mut bus = self.shared.bus.lock();
        bus.owned_port(client, port)?;
        if let Some(entry) = bus.ports.get_mut(&port) {
            entry.name = name.to_string();
        }
        Ok(())
    }

    fn enumerate_ports(&self, direction: Direction) -> Vec<PortInfo> {
        let bus = self.shared.bus.lock();
        let wanted = direction.peer();
        bus.ports
            .iter()
            .filter(|(_, entry)| entry.direction == wanted)
            .map(|(port, entry)| PortInfo {
                name: bus.full_name(entry),
                id: port_id(*port),
            })
            .collect()
    }

    fn connect(
        &self,
        client: ClientHandle,
        port: PortHandle,
        peer: &PortId,
    ) -> Result<(), DriverError> {
        let peer = parse_port_id(peer).ok_or(DriverError::UnknownPort)?;
        let mut bus = self.shared.bus.lock();
        let direction = bus.owned_port(client, port)?.direction;
        match bus.ports.get(&peer) {
            Some(entry) if entry.direction == direction.peer() => {}
            Some(_) => {
                return Err(DriverError::Backend(
                    "cannot connect two ports of the same direction".into(),
                ))
            }
            None => return Err(DriverError::UnknownPort),
        }
        let subscription = match direction {
            Direction::Input => (peer, port),
            Direction::Output => (port, peer),
        };
        if !bus.subscriptions.contains(&subscription) {
            bus.subscriptions.push(subscription);
        }
        Ok(())
    }

    fn disconnect(&self, client: ClientHandle, port: PortHandle) {
        let mut bus = self.shared.bus.lock();
        if bus.owned_port(client, port).is_ok() {
            bus.subscriptions
                .retain(|(src, dst)| *src != port && *dst != port);
        }
    }

    fn encode_and_transmit(
        &self,
        client: ClientHandle,
        port: PortHandle,
        bytes: &[u8],
        buffer: &mut EncoderBuffer,
    ) -> Result<usize, DriverError> {
        let mut bus = self.shared.bus.lock();
        if bus.owned_port(client, port)?.direction != Direction::Output {
            return Err(DriverError::Backend("port is not an output".into()));
        }
        let consumed = buffer.encode(bytes)?;
        let destinations: Vec<PortHandle> = bus.destinations(port).collect();
        let queue = bus.outbox.entry(client).or_default();
        for dst in destinations {
            queue.push((dst, buffer.event().to_vec()));
        }
        Ok(consumed)
    }

    fn drain_output(&self, client: ClientHandle) -> Result<(), DriverError> {
        let mut bus = self.shared.bus.lock();
        let pending = bus.outbox.remove(&client).unwrap_or_default();

        let mut batches: Vec<(PortHandle, Vec<Vec<u8>>)> = Vec::new();
        for (dst, event) in pending {
            match batches.last_mut() {
                Some((port, events)) if *port == dst => events.push(event),
                _ => batches.push((dst, vec![event])),
            }
        }

        for (port, events) in batches {
            let Some(entry) = bus.ports.get(&port) else {
                continue;
            };
            self.dispatch
                .send(Dispatch::Batch {
                    client: entry.client,
                    port,
                    events,
                })
                .map_err(|_| dispatcher_gone())?;
        }
        Ok(())
    }
}

fn run_dispatcher(shared: Arc<Shared>, rx: Receiver<Dispatch>) {
    for message in rx.iter() {
        match message {
            Dispatch::Batch {
                client,
                port,
                events,
            } => {
                let mut handlers = shared.handlers.lock();
                {
                    let mut bus = shared.bus.lock();
                    let Some(entry) = bus.ports.get(&port) else {
                        continue;
                    };
                    if entry.client == SYSTEM_CLIENT {
                        bus.captured.entry(port).or_default().extend(events);
                        continue;
                    }
                }
                if let Some(handler) = handlers.get_mut(&client) {
                    let raw: Vec<RawEvent<'_>> = events.iter().map(|e| RawEvent::new(e)).collect();
                    handler(port, &raw);
                }
            }
            Dispatch::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn port_id(port: PortHandle) -> PortId {
    PortId(port.0.to_string())
}

fn parse_port_id(id: &PortId) -> Option<PortHandle> {
    id.0.parse().ok().map(PortHandle)
}

fn dispatcher_gone() -> DriverError {
    DriverError::Backend("loopback dispatcher thread has stopped".into())
}
