// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Integration tests for midilink
//!
//! These drive input and output endpoints end to end over the loopback bus,
//! with batches delivered on the bus's own dispatcher thread.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use midilink::config::{InputConfig, MidilinkConfig, OutputConfig};
use midilink::driver::{LoopbackDriver, PortId};
use midilink::midi::{
    ConnectionState, Delivery, FilterConfig, MidiInput, MidiMessage, MidiOutput, PortError,
};

const WAIT: Duration = Duration::from_secs(2);

fn input_config(filter: FilterConfig) -> InputConfig {
    InputConfig {
        filter,
        ..InputConfig::default()
    }
}

/// An input endpoint connected to a fresh loopback source.
fn connected_input(
    filter: FilterConfig,
) -> (Arc<LoopbackDriver>, PortId, MidiInput<LoopbackDriver>) {
    let driver = Arc::new(LoopbackDriver::new());
    let source = driver.add_source("Keys");
    let mut input = MidiInput::new(Arc::clone(&driver), input_config(filter), Delivery::Queue);
    input.open_port(0, "in").unwrap();
    (driver, source, input)
}

/// Note On sent by an output arrives intact at an input on the same bus.
#[test]
fn test_round_trip_note_on() {
    let driver = Arc::new(LoopbackDriver::new());

    let mut output = MidiOutput::new(Arc::clone(&driver), OutputConfig::default());
    output.open_virtual_port("out").unwrap();

    let mut input = MidiInput::new(
        Arc::clone(&driver),
        InputConfig::default(),
        Delivery::Queue,
    );
    assert_eq!(input.get_port_count(), 1);
    input.open_port(0, "in").unwrap();
    assert!(input.is_port_connected());

    output.send_message(&[0x90, 0x40, 0x7F]).unwrap();

    let message = input.recv_timeout(WAIT).expect("no message received");
    assert_eq!(message.bytes, vec![0x90, 0x40, 0x7F]);
    assert!(message.timestamp >= 0.0);
}

/// Round trip with the input side virtual and callback delivery.
#[test]
fn test_round_trip_into_virtual_input() {
    let driver = Arc::new(LoopbackDriver::new());
    let seen: Arc<Mutex<Vec<MidiMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut input = MidiInput::new(
        Arc::clone(&driver),
        InputConfig::default(),
        Delivery::callback(move |m| sink.lock().unwrap().push(m)),
    );
    input.open_virtual_port("in").unwrap();
    assert!(!input.is_port_connected());

    let mut output = MidiOutput::new(Arc::clone(&driver), OutputConfig::default());
    output.open_port(0, "out").unwrap();
    output.send_message(&[0xB0, 7, 100, 0xC0, 5]).unwrap();
    driver.sync();

    let seen = seen.lock().unwrap();
    let bytes: Vec<&[u8]> = seen.iter().map(|m| m.bytes.as_slice()).collect();
    assert_eq!(bytes, vec![&[0xB0, 7, 100][..], &[0xC0, 5][..]]);
    assert_eq!(seen[0].timestamp, 0.0);
    // Callback delivery leaves nothing to poll.
    assert!(input.try_recv().is_none());
}

/// A SysEx split over two driver batches comes out as one message.
#[test]
fn test_fragmented_sysex_is_reassembled() {
    let (driver, source, input) = connected_input(FilterConfig::NONE);

    driver.inject(&source, &[&[0xF0, 0x41, 0x10]]).unwrap();
    driver.inject(&source, &[&[0x42, 0x12, 0xF7]]).unwrap();
    driver.sync();

    let messages = input.recv_all();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].bytes, vec![0xF0, 0x41, 0x10, 0x42, 0x12, 0xF7]);
}

/// Large SysEx sent in one call reaches the input whole.
#[test]
fn test_large_sysex_round_trip() {
    let driver = Arc::new(LoopbackDriver::new());
    let mut output = MidiOutput::new(Arc::clone(&driver), OutputConfig::default());
    output.open_virtual_port("out").unwrap();

    let mut input = MidiInput::new(
        Arc::clone(&driver),
        input_config(FilterConfig::NONE),
        Delivery::Queue,
    );
    input.open_port(0, "in").unwrap();

    let mut sysex = vec![0xF0];
    sysex.extend((0..1000).map(|i| (i % 128) as u8));
    sysex.push(0xF7);
    output.send_message(&sysex).unwrap();
    assert!(output.encoder_capacity() >= sysex.len());

    let message = input.recv_timeout(WAIT).expect("no SysEx received");
    assert_eq!(message.bytes, sysex);
}

/// With SysEx ignored, the message after the SysEx is not mistaken for a
/// continuation.
#[test]
fn test_ignored_sysex_does_not_swallow_next_message() {
    let (driver, source, input) = connected_input(FilterConfig::ALL);

    driver.inject(&source, &[&[0xF0, 0x01, 0x02]]).unwrap();
    driver.inject(&source, &[&[0x03, 0xF7]]).unwrap();
    driver.inject(&source, &[&[0x90, 0x3C, 0x40]]).unwrap();
    driver.sync();

    let messages = input.recv_all();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].bytes, vec![0x90, 0x3C, 0x40]);
    assert_eq!(messages[0].timestamp, 0.0);
    assert_eq!(input.stats().suppressed, 2);
}

#[test]
fn test_timing_and_sensing_filters() {
    let (driver, source, input) = connected_input(FilterConfig {
        ignore_sysex: true,
        ignore_timing: true,
        ignore_sensing: false,
    });

    driver
        .inject(&source, &[&[0xF8], &[0xF1, 0x21], &[0xFE], &[0xFA]])
        .unwrap();
    driver.sync();

    let bytes: Vec<Vec<u8>> = input.recv_all().into_iter().map(|m| m.bytes).collect();
    assert_eq!(bytes, vec![vec![0xFE], vec![0xFA]]);
}

/// Delta timestamps between batches follow the wall clock.
#[test]
fn test_second_message_timestamp() {
    let (driver, source, input) = connected_input(FilterConfig::ALL);

    driver.inject(&source, &[&[0x90, 60, 100]]).unwrap();
    driver.sync();
    std::thread::sleep(Duration::from_millis(20));
    driver.inject(&source, &[&[0x80, 60, 0]]).unwrap();
    driver.sync();

    let first = input.get_message().unwrap();
    let second = input.get_message().unwrap();
    assert_eq!(first.0, 0.0);
    assert!(second.0 >= 0.015, "delta was {}", second.0);
}

#[test]
fn test_lifecycle_idempotence() {
    let driver = Arc::new(LoopbackDriver::new());
    driver.add_source("Keys");
    let mut input = MidiInput::new(Arc::clone(&driver), InputConfig::default(), Delivery::Queue);

    input.close_port();
    assert_eq!(input.state(), ConnectionState::Disconnected);

    input.open_port(0, "in").unwrap();
    input.open_port(0, "in").unwrap();
    assert_eq!(input.state(), ConnectionState::PortOpen);

    input.close_port();
    assert_eq!(input.state(), ConnectionState::ClientOpen);
    input.close_port();
    assert_eq!(input.state(), ConnectionState::ClientOpen);
}

#[test]
fn test_closed_port_receives_nothing() {
    let (driver, source, mut input) = connected_input(FilterConfig::ALL);

    input.close_port();
    driver.inject(&source, &[&[0x90, 60, 100]]).unwrap();
    driver.sync();
    assert!(input.try_recv().is_none());

    input.open_port(0, "in").unwrap();
    driver.inject(&source, &[&[0x90, 61, 100]]).unwrap();
    driver.sync();
    assert_eq!(input.try_recv().unwrap().bytes, vec![0x90, 61, 100]);
}

/// A SysEx left open before a reopen does not bleed into the next message.
#[test]
fn test_reopen_discards_partial_sysex() {
    let (driver, source, mut input) = connected_input(FilterConfig::NONE);

    driver.inject(&source, &[&[0xF0, 0x01, 0x02]]).unwrap();
    driver.sync();
    input.close_port();
    input.open_port(0, "in").unwrap();

    driver.inject(&source, &[&[0x90, 60, 100]]).unwrap();
    driver.sync();
    let messages = input.recv_all();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].bytes, vec![0x90, 60, 100]);
}

#[test]
fn test_driver_unavailable_then_retry() {
    let driver = Arc::new(LoopbackDriver::new());
    let synth = driver.add_destination("Synth");
    driver.set_available(false);

    let mut output = MidiOutput::new(Arc::clone(&driver), OutputConfig::default());
    assert_eq!(output.open_port(0, "out"), Err(PortError::DriverUnavailable));
    assert_eq!(output.state(), ConnectionState::Disconnected);

    driver.set_available(true);
    output.open_port(0, "out").unwrap();
    output.send_message(&[0x90, 60, 100]).unwrap();
    driver.sync();
    assert_eq!(driver.received(&synth), vec![vec![0x90, 60, 100]]);
}

#[test]
fn test_invalid_index_with_no_ports() {
    let driver = Arc::new(LoopbackDriver::new());
    let mut input = MidiInput::new(Arc::clone(&driver), InputConfig::default(), Delivery::Queue);

    assert_eq!(
        input.open_port(0, "in"),
        Err(PortError::InvalidPortIndex { index: 0, count: 0 })
    );
    assert_eq!(input.state(), ConnectionState::PortOpen);
    assert!(!input.is_port_connected());
}

#[test]
fn test_small_queue_overflows_without_blocking() {
    let driver = Arc::new(LoopbackDriver::new());
    let source = driver.add_source("Keys");
    let config = InputConfig {
        queue_capacity: 2,
        ..InputConfig::default()
    };
    let mut input = MidiInput::new(Arc::clone(&driver), config, Delivery::Queue);
    input.open_port(0, "in").unwrap();

    driver
        .inject(&source, &[&[0x90, 60, 1], &[0x90, 61, 1], &[0x90, 62, 1]])
        .unwrap();
    driver.sync();

    assert_eq!(input.recv_all().len(), 2);
    assert_eq!(input.stats().queue_overflows, 1);
}

/// Endpoints built from a configuration file.
#[test]
fn test_endpoints_from_config() {
    let yaml = r#"
input:
  client_name: "from config"
  ignore_timing: false
output:
  encoder_capacity: 8
"#;
    let config = MidilinkConfig::from_yaml(yaml).unwrap();
    let driver = Arc::new(LoopbackDriver::new());

    let output = MidiOutput::new(Arc::clone(&driver), config.output.clone());
    assert_eq!(output.encoder_capacity(), 8);

    let input = MidiInput::new(Arc::clone(&driver), config.input.clone(), Delivery::Queue);
    assert!(!input.filter().ignore_timing);
    assert!(input.filter().ignore_sysex);
    assert_eq!(input.config().client_name, "from config");
}
