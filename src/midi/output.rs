// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI output: chunked encode-and-send and the output endpoint.

use std::sync::Arc;

use super::error::{PortError, SendError};
use super::port::{ConnectionState, PortLifecycle};
use crate::config::OutputConfig;
use crate::driver::{
    Api, ClientHandle, Direction, Driver, DriverError, EncoderBuffer, PortHandle, PortInfo,
};

/// Splits outbound bytes into single events and hands them to the driver.
///
/// Not reentrant: one `send` at a time per encoder.
#[derive(Debug, Clone)]
pub struct OutputEncoder {
    buffer: EncoderBuffer,
}

impl OutputEncoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: EncoderBuffer::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Encode and transmit all of `bytes`, then drain the driver's output
    /// queue once. Returns the number of events transmitted.
    ///
    /// On failure the events already transmitted stay transmitted.
    pub fn send<D: Driver + ?Sized>(
        &mut self,
        driver: &D,
        client: ClientHandle,
        port: PortHandle,
        bytes: &[u8],
    ) -> Result<usize, SendError> {
        if bytes.is_empty() {
            return Ok(0);
        }

        self.buffer
            .reserve(bytes.len())
            .map_err(|_| SendError::Resize {
                required: bytes.len(),
            })?;

        let mut offset = 0;
        let mut events = 0;
        while offset < bytes.len() {
            let consumed = driver
                .encode_and_transmit(client, port, &bytes[offset..], &mut self.buffer)
                .map_err(|source| self.classify(offset, source))?;
            if consumed == 0 {
                self.buffer.reset();
                return Err(SendError::Stalled { offset });
            }
            offset += consumed;
            events += 1;
        }

        driver.drain_output(client).map_err(SendError::Drain)?;
        Ok(events)
    }

    /// Any failure leaves the encoder with no running status or open SysEx,
    /// since the event that set them may never have gone out.
    fn classify(&mut self, offset: usize, source: DriverError) -> SendError {
        self.buffer.reset();
        match source {
            DriverError::Malformed { .. } | DriverError::Incomplete => {
                SendError::Encode { offset, source }
            }
            source => SendError::Transmit { offset, source },
        }
    }
}

impl Default for OutputEncoder {
    fn default() -> Self {
        Self {
            buffer: EncoderBuffer::default(),
        }
    }
}

/// A MIDI output endpoint on driver `D`.
pub struct MidiOutput<D: Driver> {
    lifecycle: PortLifecycle<D>,
    encoder: OutputEncoder,
    config: OutputConfig,
}

impl<D: Driver> MidiOutput<D> {
    pub fn new(driver: Arc<D>, config: OutputConfig) -> Self {
        let lifecycle = PortLifecycle::new(driver, config.client_name.clone(), Direction::Output);
        Self {
            lifecycle,
            encoder: OutputEncoder::new(config.encoder_capacity),
            config,
        }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn get_current_api(&self) -> Api {
        self.lifecycle.api()
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn is_port_open(&self) -> bool {
        self.lifecycle.state() == ConnectionState::PortOpen
    }

    pub fn is_port_connected(&self) -> bool {
        self.lifecycle.is_connected()
    }

    /// Connect to the destination at `index` through a port called `name`.
    pub fn open_port(&mut self, index: usize, name: &str) -> Result<(), PortError> {
        self.lifecycle.open_port(index, name)
    }

    /// Publish a port other applications can read from.
    pub fn open_virtual_port(&mut self, name: &str) -> Result<(), PortError> {
        self.lifecycle.open_virtual_port(name)
    }

    pub fn close_port(&mut self) {
        self.lifecycle.close_port();
    }

    pub fn set_port_name(&mut self, name: &str) -> Result<(), PortError> {
        self.lifecycle.set_port_name(name)
    }

    pub fn set_client_name(&mut self, name: &str) -> Result<(), PortError> {
        self.lifecycle.set_client_name(name)
    }

    pub fn ports(&self) -> Vec<PortInfo> {
        self.lifecycle.ports()
    }

    pub fn get_port_count(&self) -> usize {
        self.lifecycle.get_port_count()
    }

    pub fn get_port_name(&self, index: usize) -> Result<String, PortError> {
        self.lifecycle.get_port_name(index)
    }

    /// Current encoder capacity. Grows to fit the largest message sent.
    pub fn encoder_capacity(&self) -> usize {
        self.encoder.capacity()
    }

    /// Send one or more MIDI messages. A SysEx may also be split over
    /// several calls.
    pub fn send_message(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        let (Some(client), Some(port)) = (self.lifecycle.client(), self.lifecycle.port()) else {
            return Err(SendError::PortClosed);
        };
        let driver = Arc::clone(self.lifecycle.driver());
        self.encoder.send(driver.as_ref(), client, port, bytes)?;
        Ok(())
    }
}
