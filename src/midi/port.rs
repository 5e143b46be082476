// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Port lifecycle shared by input and output endpoints.
//!
//! An endpoint owns at most one native client and one registered port.
//! Opening by index and opening a virtual port share that single slot: the
//! port is created if absent and reused otherwise. Closing unregisters the
//! port but keeps the client, so the endpoint falls back to `ClientOpen`.

use std::sync::Arc;

use tracing::{debug, warn};

use super::error::PortError;
use crate::driver::{
    Api, ClientHandle, Direction, Driver, DriverError, EventHandler, HandlerRejected, PortHandle,
    PortId, PortInfo, PortKind,
};

/// Where an endpoint stands with the native driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No native client.
    Disconnected,
    /// Client established, no port registered.
    ClientOpen,
    /// A port is registered (connected, virtual, or left dangling by a
    /// failed connection attempt).
    PortOpen,
}

/// Client/port bookkeeping for one endpoint.
///
/// All methods run on the client thread.
pub struct PortLifecycle<D: Driver> {
    driver: Arc<D>,
    direction: Direction,
    client_name: String,
    client: Option<ClientHandle>,
    port: Option<PortHandle>,
    peer: Option<PortId>,
    /// Installed on the client as soon as one is open.
    handler: Option<EventHandler>,
}

impl<D: Driver> PortLifecycle<D> {
    pub fn new(driver: Arc<D>, client_name: impl Into<String>, direction: Direction) -> Self {
        Self {
            driver,
            direction,
            client_name: client_name.into(),
            client: None,
            port: None,
            peer: None,
            handler: None,
        }
    }

    /// Callback to install on the native client once it exists.
    pub fn with_handler(mut self, handler: EventHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn state(&self) -> ConnectionState {
        match (self.client, self.port) {
            (None, _) => ConnectionState::Disconnected,
            (Some(_), None) => ConnectionState::ClientOpen,
            (Some(_), Some(_)) => ConnectionState::PortOpen,
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn api(&self) -> Api {
        self.driver.api()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn client(&self) -> Option<ClientHandle> {
        self.client
    }

    pub fn port(&self) -> Option<PortHandle> {
        self.port
    }

    /// Whether the port is connected to an enumerated peer.
    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    /// Establish the native client if there is none yet.
    ///
    /// `DriverUnavailable` leaves the endpoint `Disconnected`; calling again
    /// later retries.
    pub fn ensure_client_open(&mut self) -> Result<ClientHandle, PortError> {
        if let Some(client) = self.client {
            return Ok(client);
        }

        let client = match self.driver.open_client(&self.client_name) {
            Ok(client) => client,
            Err(DriverError::Unavailable(reason)) => {
                warn!(
                    client = %self.client_name,
                    api = %self.api(),
                    %reason,
                    "MIDI driver not running?"
                );
                return Err(PortError::DriverUnavailable);
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(handler) = self.handler.take() {
            if let Err(HandlerRejected { error, handler }) =
                self.driver.set_event_handler(client, handler)
            {
                self.handler = Some(handler);
                self.driver.close_client(client);
                return Err(error.into());
            }
        }

        debug!(client = %self.client_name, api = %self.api(), "MIDI client opened");
        self.client = Some(client);
        Ok(client)
    }

    /// Register a port (if needed) and connect it to the peer at `index`.
    ///
    /// An out-of-range index reports `InvalidPortIndex` and leaves the
    /// freshly registered port in place, unconnected.
    pub fn open_port(&mut self, index: usize, name: &str) -> Result<(), PortError> {
        self.register(name, PortKind::Connectable)?;
        self.connect_port(index)
    }

    /// Register a port other applications can connect to.
    pub fn open_virtual_port(&mut self, name: &str) -> Result<(), PortError> {
        self.register(name, PortKind::Virtual)?;
        debug!(client = %self.client_name, port = name, "virtual MIDI port open");
        Ok(())
    }

    /// Check `name`, open the client if needed and register a port if there
    /// is none. An existing port is returned as is.
    pub fn register(&mut self, name: &str, kind: PortKind) -> Result<PortHandle, PortError> {
        self.check_port_name(name)?;
        let client = self.ensure_client_open()?;
        self.ensure_port(client, name, kind)
    }

    /// Connect the registered port to the peer at `index`. The driver may
    /// start delivering batches before this returns.
    pub fn connect_port(&mut self, index: usize) -> Result<(), PortError> {
        let (Some(client), Some(port)) = (self.client, self.port) else {
            return Err(PortError::NotOpen);
        };
        if self.peer.is_some() {
            warn!(client = %self.client_name, "a valid connection already exists");
            return Ok(());
        }

        let peers = self.driver.enumerate_ports(self.direction);
        if peers.is_empty() {
            warn!(client = %self.client_name, direction = ?self.direction, "no MIDI ports found");
        }
        let Some(peer) = peers.get(index) else {
            return Err(PortError::InvalidPortIndex {
                index,
                count: peers.len(),
            });
        };

        self.driver.connect(client, port, &peer.id)?;
        debug!(
            client = %self.client_name,
            port = port.0,
            peer = %peer.name,
            "MIDI port connected"
        );
        self.peer = Some(peer.id.clone());
        Ok(())
    }

    /// Unregister the port. Does nothing when no port is registered.
    pub fn close_port(&mut self) {
        let (Some(client), Some(port)) = (self.client, self.port.take()) else {
            return;
        };
        if self.peer.take().is_some() {
            self.driver.disconnect(client, port);
        }
        self.driver.unregister_port(client, port);
        debug!(client = %self.client_name, "MIDI port closed");
    }

    /// Rename the registered port.
    pub fn set_port_name(&mut self, name: &str) -> Result<(), PortError> {
        let (Some(client), Some(port)) = (self.client, self.port) else {
            return Err(PortError::NotOpen);
        };
        self.check_port_name(name)?;
        self.driver
            .rename_port(client, port, name)
            .map_err(|err| self.unsupported_warning(err, "set_port_name"))
    }

    /// Rename the client. Before the client exists this only changes the
    /// name it will be created with.
    pub fn set_client_name(&mut self, name: &str) -> Result<(), PortError> {
        let Some(client) = self.client else {
            self.client_name = name.to_string();
            return Ok(());
        };
        self.driver
            .rename_client(client, name)
            .map_err(|err| self.unsupported_warning(err, "set_client_name"))?;
        self.client_name = name.to_string();
        Ok(())
    }

    /// Ports this endpoint could connect to, in driver order.
    pub fn ports(&self) -> Vec<PortInfo> {
        self.driver.enumerate_ports(self.direction)
    }

    pub fn get_port_count(&self) -> usize {
        self.ports().len()
    }

    pub fn get_port_name(&self, index: usize) -> Result<String, PortError> {
        let ports = self.ports();
        let count = ports.len();
        ports
            .into_iter()
            .nth(index)
            .map(|info| info.name)
            .ok_or(PortError::InvalidPortIndex { index, count })
    }

    /// Close the port and release the client.
    pub fn shutdown(&mut self) {
        self.close_port();
        if let Some(client) = self.client.take() {
            self.driver.close_client(client);
            debug!(client = %self.client_name, "MIDI client closed");
        }
    }

    fn ensure_port(
        &mut self,
        client: ClientHandle,
        name: &str,
        kind: PortKind,
    ) -> Result<PortHandle, PortError> {
        if let Some(port) = self.port {
            return Ok(port);
        }
        let port = self
            .driver
            .register_port(client, name, self.direction, kind)?;
        self.port = Some(port);
        Ok(port)
    }

    fn check_port_name(&self, name: &str) -> Result<(), PortError> {
        let Some(max) = self.driver.max_port_name_len() else {
            return Ok(());
        };
        if self.client_name.len() + 1 + name.len() > max {
            return Err(PortError::InvalidName {
                name: name.to_string(),
                max,
            });
        }
        Ok(())
    }

    fn unsupported_warning(&self, err: DriverError, operation: &str) -> PortError {
        if let DriverError::Unsupported(what) = &err {
            warn!(api = %self.api(), operation, "{what} is not implemented for this backend");
        }
        err.into()
    }
}

impl<D: Driver> Drop for PortLifecycle<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
