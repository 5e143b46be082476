// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::EnvFilter;

use midilink::config::MidilinkConfig;
use midilink::driver::{Api, Driver, LoopbackDriver};
use midilink::midi::{messages, Delivery, MidiInput, MidiOutput};

#[cfg(target_os = "macos")]
use midilink::driver::CoreMidiDriver;
#[cfg(feature = "midir")]
use midilink::driver::MidirDriver;

const MONITOR_DURATION: Duration = Duration::from_secs(30);

fn print_usage() {
    println!("midilink - backend-agnostic MIDI I/O");
    println!();
    println!("Usage: midilink [--config <FILE>] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  --list-sources            List ports an input can connect to");
    println!("  --list-destinations       List ports an output can connect to");
    println!("  --monitor <N>             Print messages from source N");
    println!("  --monitor-virtual <NAME>  Open a virtual input port and print what arrives");
    println!("  --send <N> <HEX>...       Send raw bytes (e.g. 90 40 7F) to destination N");
    println!("  --test-note <N>           Send a test note to destination N");
    println!("  --self-test               Round trip a few messages over the loopback bus");
    println!("  --help                    Show this help message");
    println!();
    println!("RUST_LOG overrides the configured log level.");
}

/// What the command line asked for.
enum Command {
    ListSources,
    ListDestinations,
    Monitor(usize),
    MonitorVirtual(String),
    Send(usize, Vec<u8>),
    TestNote(usize),
    SelfTest,
    Help,
}

fn parse_index(arg: Option<&String>, flag: &str, what: &str) -> Result<usize> {
    let arg = arg.ok_or_else(|| anyhow!("{flag} requires a {what} number"))?;
    arg.parse()
        .map_err(|_| anyhow!("Invalid {what} number: {arg}"))
}

fn parse_hex_bytes(args: &[String]) -> Result<Vec<u8>> {
    if args.is_empty() {
        bail!("--send requires at least one byte");
    }
    args.iter()
        .map(|arg| {
            let digits = arg.trim_start_matches("0x").trim_start_matches("0X");
            u8::from_str_radix(digits, 16).map_err(|_| anyhow!("Invalid hex byte: {arg}"))
        })
        .collect()
}

fn parse_command(args: &[String]) -> Result<Command> {
    let Some(flag) = args.first() else {
        return Ok(Command::Help);
    };
    let command = match flag.as_str() {
        "--list-sources" => Command::ListSources,
        "--list-destinations" => Command::ListDestinations,
        "--monitor" => Command::Monitor(parse_index(args.get(1), flag, "source")?),
        "--monitor-virtual" => Command::MonitorVirtual(
            args.get(1)
                .cloned()
                .ok_or_else(|| anyhow!("--monitor-virtual requires a port name"))?,
        ),
        "--send" => Command::Send(
            parse_index(args.get(1), flag, "destination")?,
            parse_hex_bytes(args.get(2..).unwrap_or_default())?,
        ),
        "--test-note" => Command::TestNote(parse_index(args.get(1), flag, "destination")?),
        "--self-test" => Command::SelfTest,
        "--help" | "-h" => Command::Help,
        other => bail!("Unknown option: {other}"),
    };
    Ok(command)
}

fn list_sources<D: Driver>(driver: Arc<D>, config: &MidilinkConfig) {
    let input = MidiInput::new(driver, config.input.clone(), Delivery::Queue);
    let ports = input.ports();
    if ports.is_empty() {
        println!("No MIDI sources found.");
    } else {
        println!("Available MIDI sources ({}):", input.get_current_api());
        for (i, port) in ports.iter().enumerate() {
            println!("  {}: {}", i, port.name);
        }
    }
}

fn list_destinations<D: Driver>(driver: Arc<D>, config: &MidilinkConfig) {
    let output = MidiOutput::new(driver, config.output.clone());
    let ports = output.ports();
    if ports.is_empty() {
        println!("No MIDI destinations found.");
    } else {
        println!("Available MIDI destinations ({}):", output.get_current_api());
        for (i, port) in ports.iter().enumerate() {
            println!("  {}: {}", i, port.name);
        }
    }
}

fn print_messages<D: Driver>(input: &MidiInput<D>) {
    let start_time = Instant::now();
    while start_time.elapsed() < MONITOR_DURATION {
        if let Some(message) = input.recv_timeout(Duration::from_millis(100)) {
            match message.kind() {
                Some(kind) => println!("{}  {:?}", message, kind),
                None => println!("{}", message),
            }
        }
    }

    let stats = input.stats();
    println!();
    println!(
        "Monitor complete: {} delivered, {} filtered, {} dropped",
        stats.delivered,
        stats.suppressed,
        stats.dropped_events + stats.queue_overflows
    );
}

fn monitor<D: Driver>(driver: Arc<D>, config: &MidilinkConfig, source: usize) -> Result<()> {
    let mut input = MidiInput::new(driver, config.input.clone(), Delivery::Queue);
    let name = input.get_port_name(source).unwrap_or_default();
    println!("Connecting to MIDI source {} {}...", source, name);
    input
        .open_port(source, &config.input.port_name)
        .with_context(|| format!("Failed to open MIDI source {source}"))?;

    println!("Monitoring MIDI input for {}s...", MONITOR_DURATION.as_secs());
    print_messages(&input);
    Ok(())
}

fn monitor_virtual<D: Driver>(driver: Arc<D>, config: &MidilinkConfig, name: &str) -> Result<()> {
    let mut input = MidiInput::new(driver, config.input.clone(), Delivery::Queue);
    input
        .open_virtual_port(name)
        .with_context(|| format!("Failed to open virtual port {name}"))?;

    println!("Virtual port '{}' open, monitoring for {}s...", name, MONITOR_DURATION.as_secs());
    print_messages(&input);
    Ok(())
}

fn open_output<D: Driver>(
    driver: Arc<D>,
    config: &MidilinkConfig,
    destination: usize,
) -> Result<MidiOutput<D>> {
    let mut output = MidiOutput::new(driver, config.output.clone());
    println!("Connecting to MIDI destination {}...", destination);
    output
        .open_port(destination, &config.output.port_name)
        .with_context(|| format!("Failed to open MIDI destination {destination}"))?;
    Ok(output)
}

fn send_bytes<D: Driver>(
    driver: Arc<D>,
    config: &MidilinkConfig,
    destination: usize,
    bytes: &[u8],
) -> Result<()> {
    let mut output = open_output(driver, config, destination)?;
    output.send_message(bytes).context("Failed to send MIDI data")?;
    println!("Sent {} bytes", bytes.len());
    Ok(())
}

fn send_test_note<D: Driver>(
    driver: Arc<D>,
    config: &MidilinkConfig,
    destination: usize,
) -> Result<()> {
    let mut output = open_output(driver, config, destination)?;

    let channel = 0; // MIDI channel 1
    let note = 60; // Middle C
    let velocity = 100;

    println!("Sending test note (Middle C, velocity {})...", velocity);
    output.send_message(&[messages::NOTE_ON | channel, note, velocity])?;
    println!("Note On sent");

    thread::sleep(Duration::from_millis(500));

    output.send_message(&[messages::NOTE_OFF | channel, note, 0])?;
    println!("Note Off sent");

    println!("Test complete!");
    Ok(())
}

/// Send a few messages from a virtual output to an input over the loopback
/// bus and check they come back intact.
fn self_test(config: &MidilinkConfig) -> Result<()> {
    let driver = Arc::new(LoopbackDriver::new());

    let mut output = MidiOutput::new(Arc::clone(&driver), config.output.clone());
    output.open_virtual_port(&config.output.port_name)?;

    let mut input_config = config.input.clone();
    input_config.filter.ignore_sysex = false;
    let mut input = MidiInput::new(Arc::clone(&driver), input_config, Delivery::Queue);
    input.open_port(0, &config.input.port_name)?;

    let sent: Vec<Vec<u8>> = vec![
        vec![messages::NOTE_ON, 0x40, 0x7F],
        vec![messages::SYSEX_START, 0x7E, 0x7F, 0x06, 0x01, messages::SYSEX_END],
        vec![messages::NOTE_OFF, 0x40, 0x00],
    ];
    for bytes in &sent {
        output.send_message(bytes)?;
    }

    let mut received = Vec::new();
    while received.len() < sent.len() {
        let message = input.recv_timeout(Duration::from_secs(1)).ok_or_else(|| {
            anyhow!("Timed out after {} of {} messages", received.len(), sent.len())
        })?;
        println!("  {}", message);
        received.push(message.bytes);
    }

    if received != sent {
        bail!("Round trip mismatch: sent {:02X?}, received {:02X?}", sent, received);
    }
    println!("Self test passed: {} messages round tripped", sent.len());
    Ok(())
}

fn run<D: Driver>(driver: Arc<D>, config: &MidilinkConfig, command: Command) -> Result<()> {
    match command {
        Command::ListSources => list_sources(driver, config),
        Command::ListDestinations => list_destinations(driver, config),
        Command::Monitor(source) => monitor(driver, config, source)?,
        Command::MonitorVirtual(name) => monitor_virtual(driver, config, &name)?,
        Command::Send(destination, bytes) => send_bytes(driver, config, destination, &bytes)?,
        Command::TestNote(destination) => send_test_note(driver, config, destination)?,
        Command::SelfTest => self_test(config)?,
        Command::Help => print_usage(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let config = if args.first().map(String::as_str) == Some("--config") {
        let path = args
            .get(1)
            .cloned()
            .ok_or_else(|| anyhow!("--config requires a file path"))?;
        args.drain(..2);
        MidilinkConfig::load(&path)?
    } else {
        MidilinkConfig::default()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().ok();

    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("Error: {err}");
            print_usage();
            std::process::exit(1);
        }
    };

    match config.backend {
        Api::Loopback => run(Arc::new(LoopbackDriver::new()), &config, command),
        #[cfg(target_os = "macos")]
        Api::CoreMidi => run(Arc::new(CoreMidiDriver::new()), &config, command),
        #[cfg(feature = "midir")]
        Api::Midir => run(Arc::new(MidirDriver::new()), &config, command),
        #[allow(unreachable_patterns)]
        other => bail!("The {other} backend is not available in this build"),
    }
}
