// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI input: message reconstruction and the input endpoint.
//!
//! The driver calls into [`InputReconstructor`] on its own thread with
//! batches of raw fragments. Each fragment is stamped, classified by the
//! [`FilterPolicy`] and accumulated until a whole message is ready, which is
//! then moved into the configured [`MessageSink`].
//!
//! Nothing on that path logs, locks or returns errors. Conditions worth
//! knowing about are counted in [`InputStats`] instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::error::PortError;
use super::filter::{EventClass, FilterConfig, FilterPolicy, SysexState};
use super::message::{MessageBuffer, MidiMessage};
use super::port::{ConnectionState, PortLifecycle};
use crate::config::InputConfig;
use crate::driver::{
    Api, Direction, Driver, EventHandler, PortHandle, PortInfo, PortKind, RawEvent,
};
use crate::timing::{MonotonicClock, SystemClock, TimestampClock};

/// Initial size of the reassembly buffer. Large SysEx grows it.
const BUFFER_CAPACITY: usize = 64;

/// Counters recorded by the callback thread.
#[derive(Debug, Default)]
pub struct InputStats {
    delivered: AtomicU64,
    suppressed: AtomicU64,
    dropped_events: AtomicU64,
    queue_overflows: AtomicU64,
    restarted_sysex: AtomicU64,
    inactive_batches: AtomicU64,
}

/// Point-in-time copy of [`InputStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputStatsSnapshot {
    /// Messages handed to the sink.
    pub delivered: u64,
    /// Fragments dropped by the filter.
    pub suppressed: u64,
    /// Empty fragments from the driver.
    pub dropped_events: u64,
    /// Messages lost to a full queue.
    pub queue_overflows: u64,
    /// `F0` fragments that arrived while a SysEx was still continuing.
    pub restarted_sysex: u64,
    /// Batches that arrived while no port was active.
    pub inactive_batches: u64,
}

impl InputStats {
    pub fn snapshot(&self) -> InputStatsSnapshot {
        InputStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            restarted_sysex: self.restarted_sysex.load(Ordering::Relaxed),
            inactive_batches: self.inactive_batches.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State the client thread publishes to the callback thread.
#[derive(Debug, Default)]
pub(crate) struct InputShared {
    /// Active port handle plus one; zero when no port is active.
    active_port: AtomicU64,
    /// Bumped on every successful open. The callback resets its SysEx state
    /// when it sees a new value.
    generation: AtomicU64,
    stats: InputStats,
}

impl InputShared {
    fn activate(&self, port: PortHandle) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.active_port
            .store(u64::from(port.0) + 1, Ordering::Release);
    }

    fn deactivate(&self) {
        self.active_port.store(0, Ordering::Release);
    }

    fn is_active(&self, port: PortHandle) -> bool {
        self.active_port.load(Ordering::Acquire) == u64::from(port.0) + 1
    }
}

/// Where completed messages go.
///
/// `Callback` runs inline on the driver thread; it must return quickly.
/// `Queue` never blocks: when the queue is full the message is dropped and
/// counted as an overflow.
pub enum MessageSink {
    Callback(Box<dyn FnMut(MidiMessage) + Send>),
    Queue(Sender<MidiMessage>),
}

impl MessageSink {
    /// Returns false if the message could not be handed over.
    fn deliver(&mut self, message: MidiMessage) -> bool {
        match self {
            MessageSink::Callback(callback) => {
                callback(message);
                true
            }
            MessageSink::Queue(tx) => tx.try_send(message).is_ok(),
        }
    }
}

/// How an input endpoint hands messages to client code.
pub enum Delivery {
    /// Invoke the closure inline on the driver callback thread.
    Callback(Box<dyn FnMut(MidiMessage) + Send>),
    /// Buffer up to `InputConfig::queue_capacity` messages for polling.
    Queue,
}

impl Delivery {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(MidiMessage) + Send + 'static,
    {
        Delivery::Callback(Box::new(f))
    }
}

/// Turns raw driver fragments into filtered, timestamped messages.
///
/// Owned by the driver callback once the endpoint is built. Not reentrant.
pub struct InputReconstructor<C: MonotonicClock = SystemClock> {
    buffer: MessageBuffer,
    clock: TimestampClock<C>,
    policy: FilterPolicy,
    sysex: SysexState,
    sink: MessageSink,
    shared: Arc<InputShared>,
    generation: u64,
}

impl<C: MonotonicClock> InputReconstructor<C> {
    /// A reconstructor that is not tied to an endpoint. Feed it with
    /// [`process_events`](Self::process_events).
    pub fn new(filter: FilterConfig, clock: C, sink: MessageSink) -> Self {
        Self::with_shared(filter, clock, sink, Arc::new(InputShared::default()))
    }

    pub(crate) fn with_shared(
        filter: FilterConfig,
        clock: C,
        sink: MessageSink,
        shared: Arc<InputShared>,
    ) -> Self {
        let generation = shared.generation.load(Ordering::Acquire);
        Self {
            buffer: MessageBuffer::with_capacity(BUFFER_CAPACITY),
            clock: TimestampClock::new(clock),
            policy: FilterPolicy::new(filter),
            sysex: SysexState::default(),
            sink,
            shared,
            generation,
        }
    }

    pub fn stats(&self) -> InputStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn sysex_state(&self) -> SysexState {
        self.sysex
    }

    /// Driver entry point for endpoint-owned reconstructors. Batches for a
    /// port other than the active one are ignored.
    pub fn process_batch(&mut self, port: PortHandle, events: &[RawEvent<'_>]) {
        if !self.shared.is_active(port) {
            InputStats::bump(&self.shared.stats.inactive_batches);
            return;
        }
        self.process_events(events);
    }

    /// Process one batch, in order.
    pub fn process_events(&mut self, events: &[RawEvent<'_>]) {
        let generation = self.shared.generation.load(Ordering::Acquire);
        if generation != self.generation {
            self.generation = generation;
            self.sysex.reset();
            self.buffer.clear();
        }

        for event in events {
            self.process_event(event.data);
        }
    }

    fn process_event(&mut self, data: &[u8]) {
        let timestamp = self.clock.stamp();
        let stats = &self.shared.stats;

        if data.is_empty() {
            InputStats::bump(&stats.dropped_events);
            return;
        }

        let was_continuing = self.sysex.continuing;
        if !was_continuing {
            self.buffer.clear();
        }

        let decision = self.policy.apply(data, &mut self.sysex);
        if decision.is_suppressed() {
            InputStats::bump(&stats.suppressed);
        }

        // The pending bytes are kept; the new start joins them.
        if was_continuing && decision.class == EventClass::SysexStart {
            InputStats::bump(&stats.restarted_sysex);
        }

        if decision.accumulate {
            self.buffer.append(data);
        }
        if decision.deliver {
            let message = self.buffer.take(timestamp);
            self.emit(message);
        }
    }

    fn emit(&mut self, message: MidiMessage) {
        self.clock.mark_delivered();
        let stats = &self.shared.stats;
        if self.sink.deliver(message) {
            InputStats::bump(&stats.delivered);
        } else {
            InputStats::bump(&stats.queue_overflows);
        }
    }
}

/// A MIDI input endpoint on driver `D`.
pub struct MidiInput<D: Driver> {
    lifecycle: PortLifecycle<D>,
    shared: Arc<InputShared>,
    queue: Option<Receiver<MidiMessage>>,
    config: InputConfig,
}

impl<D: Driver> MidiInput<D> {
    pub fn new(driver: Arc<D>, config: InputConfig, delivery: Delivery) -> Self {
        Self::with_clock(driver, config, delivery, SystemClock::new())
    }

    /// Build an endpoint whose timestamps come from `clock`.
    pub fn with_clock<C>(driver: Arc<D>, config: InputConfig, delivery: Delivery, clock: C) -> Self
    where
        C: MonotonicClock + 'static,
    {
        let (sink, queue) = match delivery {
            Delivery::Callback(callback) => (MessageSink::Callback(callback), None),
            Delivery::Queue => {
                let (tx, rx) = bounded(config.queue_capacity.max(1));
                (MessageSink::Queue(tx), Some(rx))
            }
        };

        let shared = Arc::new(InputShared::default());
        let mut reconstructor =
            InputReconstructor::with_shared(config.filter, clock, sink, Arc::clone(&shared));
        let handler: EventHandler = Box::new(move |port: PortHandle, events: &[RawEvent<'_>]| {
            reconstructor.process_batch(port, events)
        });

        let lifecycle = PortLifecycle::new(driver, config.client_name.clone(), Direction::Input)
            .with_handler(handler);

        Self {
            lifecycle,
            shared,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    pub fn filter(&self) -> FilterConfig {
        self.config.filter
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

    /// Connect to the source at `index` through a port called `name`.
    ///
    /// The port is made active before it is connected, so batches the driver
    /// delivers while `connect` is still running are kept.
    pub fn open_port(&mut self, index: usize, name: &str) -> Result<(), PortError> {
        if self.lifecycle.is_connected() {
            return self.lifecycle.open_port(index, name);
        }
        let port = self.lifecycle.register(name, PortKind::Connectable)?;
        self.shared.activate(port);
        self.lifecycle.connect_port(index)
    }

    /// Publish a port other applications can send to.
    pub fn open_virtual_port(&mut self, name: &str) -> Result<(), PortError> {
        self.lifecycle.open_virtual_port(name)?;
        if let Some(port) = self.lifecycle.port() {
            self.shared.activate(port);
        }
        Ok(())
    }

    pub fn close_port(&mut self) {
        self.shared.deactivate();
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

    /// Next queued message, if any. Always `None` with callback delivery.
    pub fn try_recv(&self) -> Option<MidiMessage> {
        self.queue.as_ref()?.try_recv().ok()
    }

    /// Drain every queued message.
    pub fn recv_all(&self) -> Vec<MidiMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Wait up to `timeout` for the next queued message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<MidiMessage> {
        self.queue.as_ref()?.recv_timeout(timeout).ok()
    }

    /// Poll-style access: the next message's delta time and bytes.
    pub fn get_message(&self) -> Option<(f64, Vec<u8>)> {
        self.try_recv().map(|m| (m.timestamp, m.bytes))
    }

    pub fn stats(&self) -> InputStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl<D: Driver> Drop for MidiInput<D> {
    fn drop(&mut self) {
        self.shared.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ClientHandle, DriverError, EncoderBuffer, HandlerRejected, PortId};
    use crate::timing::ManualClock;
    use std::sync::Mutex;

    fn collecting(
        filter: FilterConfig,
    ) -> (
        InputReconstructor<ManualClock>,
        ManualClock,
        Arc<Mutex<Vec<MidiMessage>>>,
    ) {
        let clock = ManualClock::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reconstructor = InputReconstructor::new(
            filter,
            clock.clone(),
            MessageSink::Callback(Box::new(move |m| sink.lock().unwrap().push(m))),
        );
        (reconstructor, clock, seen)
    }

    fn batch<'a>(fragments: &[&'a [u8]]) -> Vec<RawEvent<'a>> {
        fragments.iter().map(|f| RawEvent::new(f)).collect()
    }

    #[test]
    fn test_sysex_reassembled_across_batches() {
        let (mut rec, _clock, seen) = collecting(FilterConfig::NONE);

        rec.process_events(&batch(&[&[0xF0, 0x01, 0x02]]));
        assert!(seen.lock().unwrap().is_empty());
        assert!(rec.sysex_state().continuing);

        rec.process_events(&batch(&[&[0x03, 0x04, 0xF7]]));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes, vec![0xF0, 0x01, 0x02, 0x03, 0x04, 0xF7]);
        assert!(!rec.sysex_state().continuing);
    }

    #[test]
    fn test_ignored_sysex_then_fresh_message() {
        let (mut rec, _clock, seen) = collecting(FilterConfig {
            ignore_sysex: true,
            ..FilterConfig::NONE
        });

        rec.process_events(&batch(&[&[0xF0, 0x01]]));
        assert!(rec.sysex_state().continuing);
        rec.process_events(&batch(&[&[0x02, 0xF7]]));
        assert!(!rec.sysex_state().continuing);
        rec.process_events(&batch(&[&[0x90, 0x40, 0x7F]]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes, vec![0x90, 0x40, 0x7F]);
        assert_eq!(rec.stats().suppressed, 2);
    }

    #[test]
    fn test_first_message_stamped_zero() {
        let (mut rec, clock, seen) = collecting(FilterConfig::NONE);

        clock.advance(Duration::from_millis(500));
        rec.process_events(&batch(&[&[0x90, 60, 100]]));
        clock.advance(Duration::from_millis(250));
        rec.process_events(&batch(&[&[0x80, 60, 0]]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].timestamp, 0.0);
        assert!((seen[1].timestamp - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_suppressed_events_move_the_baseline() {
        let (mut rec, clock, seen) = collecting(FilterConfig::ALL);

        rec.process_events(&batch(&[&[0x90, 60, 100]]));
        clock.advance(Duration::from_millis(100));
        rec.process_events(&batch(&[&[0xF8]]));
        clock.advance(Duration::from_millis(30));
        rec.process_events(&batch(&[&[0x80, 60, 0]]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!((seen[1].timestamp - 0.030).abs() < 1e-9);
    }

    #[test]
    fn test_suppressed_events_do_not_clear_first_flag() {
        let (mut rec, clock, seen) = collecting(FilterConfig::ALL);

        rec.process_events(&batch(&[&[0xFE]]));
        clock.advance(Duration::from_millis(10));
        rec.process_events(&batch(&[&[0x90, 60, 100]]));

        assert_eq!(seen.lock().unwrap()[0].timestamp, 0.0);
    }

    #[test]
    fn test_clock_inside_sysex_held_until_terminator() {
        let (mut rec, _clock, seen) = collecting(FilterConfig::NONE);

        rec.process_events(&batch(&[&[0xF0, 0x01]]));
        rec.process_events(&batch(&[&[0xF8]]));
        assert!(rec.sysex_state().continuing);
        assert!(seen.lock().unwrap().is_empty());

        rec.process_events(&batch(&[&[0x02, 0xF7]]));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes, vec![0xF0, 0x01, 0xF8, 0x02, 0xF7]);
    }

    #[test]
    fn test_filtered_clock_inside_sysex_is_left_out() {
        let (mut rec, _clock, seen) = collecting(FilterConfig {
            ignore_timing: true,
            ..FilterConfig::NONE
        });

        rec.process_events(&batch(&[&[0xF0, 0x01], &[0xF8], &[0x02, 0xF7]]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes, vec![0xF0, 0x01, 0x02, 0xF7]);
        assert_eq!(rec.stats().suppressed, 1);
    }

    #[test]
    fn test_sysex_start_while_continuing_accumulates() {
        let (mut rec, _clock, seen) = collecting(FilterConfig::NONE);

        rec.process_events(&batch(&[&[0xF0, 0x01], &[0xF0, 0x02, 0xF7]]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes, vec![0xF0, 0x01, 0xF0, 0x02, 0xF7]);
        assert_eq!(rec.stats().restarted_sysex, 1);
    }

    #[test]
    fn test_empty_events_are_dropped() {
        let (mut rec, _clock, seen) = collecting(FilterConfig::NONE);

        rec.process_events(&batch(&[&[], &[0xC0, 5]]));

        assert_eq!(seen.lock().unwrap().len(), 1);
        let stats = rec.stats();
        assert_eq!(stats.dropped_events, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[test]
    fn test_inactive_port_ignores_batch() {
        let clock = ManualClock::new();
        let shared = Arc::new(InputShared::default());
        let (tx, rx) = bounded(4);
        let mut rec = InputReconstructor::with_shared(
            FilterConfig::NONE,
            clock,
            MessageSink::Queue(tx),
            Arc::clone(&shared),
        );

        rec.process_batch(PortHandle(3), &batch(&[&[0x90, 60, 100]]));
        assert!(rx.try_recv().is_err());
        assert_eq!(rec.stats().inactive_batches, 1);

        shared.activate(PortHandle(3));
        rec.process_batch(PortHandle(3), &batch(&[&[0x90, 60, 100]]));
        assert_eq!(rx.try_recv().unwrap().bytes, vec![0x90, 60, 100]);

        // A stale batch for another port is ignored too.
        rec.process_batch(PortHandle(4), &batch(&[&[0x90, 60, 100]]));
        assert_eq!(rec.stats().inactive_batches, 2);
    }

    #[test]
    fn test_reopen_resets_sysex_state() {
        let shared = Arc::new(InputShared::default());
        let (tx, rx) = bounded(4);
        let mut rec = InputReconstructor::with_shared(
            FilterConfig::NONE,
            ManualClock::new(),
            MessageSink::Queue(tx),
            Arc::clone(&shared),
        );

        shared.activate(PortHandle(1));
        rec.process_batch(PortHandle(1), &batch(&[&[0xF0, 0x01]]));
        assert!(rec.sysex_state().continuing);

        shared.deactivate();
        shared.activate(PortHandle(1));
        rec.process_batch(PortHandle(1), &batch(&[&[0x90, 60, 100]]));
        assert!(!rec.sysex_state().continuing);
        assert_eq!(rx.try_recv().unwrap().bytes, vec![0x90, 60, 100]);
    }

    /// Driver whose single source sends a Note On as soon as it is
    /// connected, before `connect` returns.
    #[derive(Default)]
    struct EagerDriver {
        handler: Mutex<Option<EventHandler>>,
    }

    impl Driver for EagerDriver {
        fn api(&self) -> Api {
            Api::Loopback
        }

        fn open_client(&self, _name: &str) -> Result<ClientHandle, DriverError> {
            Ok(ClientHandle(1))
        }

        fn close_client(&self, _client: ClientHandle) {}

        fn set_event_handler(
            &self,
            _client: ClientHandle,
            handler: EventHandler,
        ) -> Result<(), HandlerRejected> {
            *self.handler.lock().unwrap() = Some(handler);
            Ok(())
        }

        fn register_port(
            &self,
            _client: ClientHandle,
            _name: &str,
            _direction: Direction,
            _kind: PortKind,
        ) -> Result<PortHandle, DriverError> {
            Ok(PortHandle(7))
        }

        fn unregister_port(&self, _client: ClientHandle, _port: PortHandle) {}

        fn enumerate_ports(&self, _direction: Direction) -> Vec<PortInfo> {
            vec![PortInfo {
                name: "Keys".into(),
                id: PortId("0".into()),
            }]
        }

        fn connect(
            &self,
            _client: ClientHandle,
            port: PortHandle,
            _peer: &PortId,
        ) -> Result<(), DriverError> {
            if let Some(handler) = self.handler.lock().unwrap().as_mut() {
                handler(port, &[RawEvent::new(&[0x90, 60, 100])]);
            }
            Ok(())
        }

        fn disconnect(&self, _client: ClientHandle, _port: PortHandle) {}

        fn encode_and_transmit(
            &self,
            _client: ClientHandle,
            _port: PortHandle,
            _bytes: &[u8],
            _buffer: &mut EncoderBuffer,
        ) -> Result<usize, DriverError> {
            Err(DriverError::Unsupported("output"))
        }

        fn drain_output(&self, _client: ClientHandle) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[test]
    fn test_batch_during_connect_is_kept() {
        let driver = Arc::new(EagerDriver::default());
        let mut input = MidiInput::new(driver, InputConfig::default(), Delivery::Queue);

        input.open_port(0, "in").unwrap();

        assert_eq!(input.try_recv().unwrap().bytes, vec![0x90, 60, 100]);
        assert_eq!(input.stats().inactive_batches, 0);
    }

    #[test]
    fn test_full_queue_counts_overflow() {
        let (tx, rx) = bounded(1);
        let mut rec =
            InputReconstructor::new(FilterConfig::NONE, ManualClock::new(), MessageSink::Queue(tx));

        rec.process_events(&batch(&[&[0xFA], &[0xFC]]));

        assert_eq!(rx.try_recv().unwrap().bytes, vec![0xFA]);
        assert!(rx.try_recv().is_err());
        let stats = rec.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.queue_overflows, 1);
    }
}
