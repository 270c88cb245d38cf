//! Cycle-driven bus simulator
//!
//! [`BusSimulator`] accepts outbound messages, checks them against the bus
//! configuration and the cycle layout, encodes them and keeps an ordered log.
//! Cycles advance only when the caller asks; there is no timer inside.
//!
//! ```text
//!   Stopped --start()--> Running --stop()--> Stopped
//!      ^                                        |
//!      +--------------- reset() ----------------+
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use flexray_protocol::schedule::{self, CycleLayout, Segment};
use flexray_protocol::{
    BusConfig, FrameCodec, InvalidFrameError, LegalityError, Message,
    CYCLE_COUNT_MODULUS,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::node::VirtualNode;

/// Lifecycle state of a simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimState {
    Stopped,
    Running,
}

/// Error type returned by per-cycle callbacks
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the simulator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Operation needs a running simulator
    #[error("simulator is not running")]
    NotRunning,

    /// Operation needs a stopped simulator
    #[error("simulator is already running")]
    AlreadyRunning,

    /// Message violates frame bounds
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] InvalidFrameError),

    /// Slot, cycle or channel not usable with this configuration
    #[error("illegal slot use: {0}")]
    Illegal(#[from] LegalityError),

    /// One or more per-cycle callbacks failed; the cycle still advanced
    #[error("{} callback(s) failed in cycle {}", .0.faults.len(), .0.cycle)]
    CallbackFailed(CycleReport),
}

/// A callback that returned an error during [`BusSimulator::advance_cycle`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackFault {
    /// Position in registration order
    pub index: usize,
    pub name: String,
    pub message: String,
}

/// A message staged by a callback and refused by the simulator
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub source: String,
    pub message: Message,
    pub error: SimError,
}

/// Outcome of one cycle advance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CycleReport {
    /// Cycle counter after the advance
    pub cycle: u8,
    /// Messages from callbacks that reached the log
    pub accepted: usize,
    pub rejected: Vec<Rejection>,
    pub faults: Vec<CallbackFault>,
}

/// Outbox handed to per-cycle callbacks
///
/// Staged messages go through [`BusSimulator::send_message`] once the
/// callback returns successfully.
#[derive(Debug, Default)]
pub struct CycleTx {
    staged: Vec<Message>,
}

impl CycleTx {
    /// Stage a message for transmission
    pub fn send(&mut self, message: Message) {
        self.staged.push(message);
    }

    /// Number of staged messages
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }
}

/// Periodic transmitter driven by cycle advances
pub trait CycleCallback: Send {
    /// Name used in reports and logs
    fn name(&self) -> &str;

    /// Called once per advance with the new cycle count
    fn on_cycle(&mut self, cycle: u8, tx: &mut CycleTx) -> Result<(), CallbackError>;
}

struct FnCallback<F> {
    name: String,
    f: F,
}

impl<F> CycleCallback for FnCallback<F>
where
    F: FnMut(u8, &mut CycleTx) -> Result<(), CallbackError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_cycle(&mut self, cycle: u8, tx: &mut CycleTx) -> Result<(), CallbackError> {
        (self.f)(cycle, tx)
    }
}

/// An accepted transmission as recorded in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The message with its assigned timestamp
    pub message: Message,
    /// Simulator cycle counter when the message was accepted
    pub accepted_in_cycle: u8,
    pub segment: Segment,
    /// Slot start within its cycle, in microseconds
    pub slot_offset_us: u64,
    /// Wire bytes including the CRC trailer
    pub encoded: Vec<u8>,
}

/// Snapshot of accumulated counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub state: SimState,
    pub cycle: u8,
    /// Advances since the last start
    pub cycles_elapsed: u64,
    pub sent: u64,
    pub dropped: u64,
    /// Accepted frames carried on channel A (dual-channel frames count on both)
    pub channel_a: u64,
    /// Accepted frames carried on channel B
    pub channel_b: u64,
    /// Accepted frames per slot id
    pub slot_distribution: BTreeMap<u16, u64>,
}

impl Statistics {
    fn new(state: SimState) -> Self {
        Self {
            state,
            cycle: 0,
            cycles_elapsed: 0,
            sent: 0,
            dropped: 0,
            channel_a: 0,
            channel_b: 0,
            slot_distribution: BTreeMap::new(),
        }
    }

    /// Number of distinct slots that carried traffic
    pub fn unique_slots(&self) -> usize {
        self.slot_distribution.len()
    }
}

/// Stateful FlexRay bus model
pub struct BusSimulator {
    config: BusConfig,
    layout: CycleLayout,
    codec: FrameCodec,
    clock: Box<dyn Clock>,
    stats: Statistics,
    last_timestamp_us: u64,
    log: Vec<LogEntry>,
    callbacks: Vec<Box<dyn CycleCallback>>,
}

impl BusSimulator {
    /// Create a stopped simulator using wall-clock timestamps
    pub fn new(config: BusConfig) -> Self {
        Self::with_clock(config, MonotonicClock::new())
    }

    /// Create a stopped simulator with an injected time source
    pub fn with_clock(config: BusConfig, clock: impl Clock + 'static) -> Self {
        Self {
            layout: CycleLayout::new(&config),
            config,
            codec: FrameCodec::new(),
            clock: Box::new(clock),
            stats: Statistics::new(SimState::Stopped),
            last_timestamp_us: 0,
            log: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Replace the frame codec (for a different CRC algorithm)
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn layout(&self) -> &CycleLayout {
        &self.layout
    }

    pub fn state(&self) -> SimState {
        self.stats.state
    }

    pub fn is_running(&self) -> bool {
        self.stats.state == SimState::Running
    }

    /// Current cycle counter (0..=63)
    pub fn current_cycle(&self) -> u8 {
        self.stats.cycle
    }

    /// Begin a clean run: cycle 0, counters and log cleared
    pub fn start(&mut self) -> Result<(), SimError> {
        if self.is_running() {
            return Err(SimError::AlreadyRunning);
        }

        for issue in self.config.validate() {
            warn!("Configuration issue: {}", issue);
        }

        self.log.clear();
        self.stats = Statistics::new(SimState::Running);
        info!(
            "Simulator started: {} static + {} dynamic slots, {}us cycle",
            self.config.static_slots, self.config.dynamic_slots, self.config.cycle_duration_us
        );
        Ok(())
    }

    /// End the run; the log and counters stay readable
    pub fn stop(&mut self) -> Result<(), SimError> {
        self.ensure_running()?;
        self.stats.state = SimState::Stopped;
        info!(
            "Simulator stopped after {} cycles ({} sent, {} dropped)",
            self.stats.cycles_elapsed, self.stats.sent, self.stats.dropped
        );
        Ok(())
    }

    /// Stop and clear all run state; configuration and callbacks are kept
    pub fn reset(&mut self) {
        self.log.clear();
        self.stats = Statistics::new(SimState::Stopped);
        self.last_timestamp_us = 0;
        info!("Simulator reset");
    }

    /// Swap in a new configuration while stopped
    pub fn reconfigure(&mut self, config: BusConfig) -> Result<(), SimError> {
        if self.is_running() {
            return Err(SimError::AlreadyRunning);
        }
        self.layout = CycleLayout::new(&config);
        self.config = config;
        info!("Simulator reconfigured");
        Ok(())
    }

    /// Validate, encode, timestamp and log one message
    ///
    /// Legality uses the message's own cycle count, so messages may be
    /// scheduled for a cycle other than the current one. Any rejection after
    /// the running check counts as dropped.
    pub fn send_message(&mut self, message: Message) -> Result<&LogEntry, SimError> {
        self.ensure_running()?;

        match self.accept(message) {
            Ok(entry) => {
                self.record(&entry.message);
                debug!(
                    "Accepted slot {} cycle {} on {} ({} bytes)",
                    entry.message.slot_id,
                    entry.message.cycle_count,
                    entry.message.channel,
                    entry.message.payload.len()
                );
                let index = self.log.len();
                self.log.push(entry);
                Ok(&self.log[index])
            }
            Err(err) => {
                self.stats.dropped += 1;
                warn!("Dropped message: {}", err);
                Err(err)
            }
        }
    }

    fn accept(&mut self, mut message: Message) -> Result<LogEntry, SimError> {
        message.check_bounds()?;
        let assignment = schedule::check_legal_in(
            &self.layout,
            &self.config,
            message.slot_id,
            message.cycle_count,
            message.channel,
        )?;
        let frame = self.codec.frame(&message)?;

        let timestamp = self.clock.now_us().max(self.last_timestamp_us);
        self.last_timestamp_us = timestamp;
        message.timestamp_us = Some(timestamp);

        Ok(LogEntry {
            message,
            accepted_in_cycle: self.stats.cycle,
            segment: assignment.segment,
            slot_offset_us: assignment.start.as_micros() as u64,
            encoded: frame.to_bytes(),
        })
    }

    fn record(&mut self, message: &Message) {
        self.stats.sent += 1;
        if message.channel.includes_a() {
            self.stats.channel_a += 1;
        }
        if message.channel.includes_b() {
            self.stats.channel_b += 1;
        }
        *self
            .stats
            .slot_distribution
            .entry(message.slot_id)
            .or_default() += 1;
    }

    /// Register a per-cycle callback; callbacks run in registration order
    pub fn register_callback<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: FnMut(u8, &mut CycleTx) -> Result<(), CallbackError> + Send + 'static,
    {
        self.register(FnCallback {
            name: name.into(),
            f,
        });
    }

    /// Register any [`CycleCallback`] implementation
    pub fn register(&mut self, callback: impl CycleCallback + 'static) {
        debug!("Registered cycle callback: {}", callback.name());
        self.callbacks.push(Box::new(callback));
    }

    /// Attach a virtual node; it transmits on every subsequent advance
    pub fn attach_node(&mut self, node: VirtualNode) {
        info!("Attached node {} on slots {:?}", node.name(), node.slot_ids());
        self.register(node);
    }

    /// Number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Advance the cycle counter (mod 64) and run callbacks
    ///
    /// A failing callback does not undo earlier callbacks and does not stop
    /// later ones; its staged messages are discarded. A panic inside a
    /// callback counts as a failure and the callback stays registered.
    /// Failures are returned as [`SimError::CallbackFailed`] once every
    /// callback has run.
    pub fn advance_cycle(&mut self) -> Result<CycleReport, SimError> {
        self.ensure_running()?;

        self.stats.cycle = (self.stats.cycle + 1) % CYCLE_COUNT_MODULUS;
        self.stats.cycles_elapsed += 1;
        let cycle = self.stats.cycle;
        debug!("Advanced to cycle {}", cycle);

        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };

        let mut callbacks = std::mem::take(&mut self.callbacks);
        for (index, callback) in callbacks.iter_mut().enumerate() {
            let mut tx = CycleTx::default();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| callback.on_cycle(cycle, &mut tx)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };
            if let Some(message) = failure {
                warn!("Cycle callback '{}' failed: {}", callback.name(), message);
                report.faults.push(CallbackFault {
                    index,
                    name: callback.name().to_string(),
                    message,
                });
                continue;
            }

            for message in tx.staged {
                match self.send_message(message.clone()) {
                    Ok(_) => report.accepted += 1,
                    Err(error) => report.rejected.push(Rejection {
                        source: callback.name().to_string(),
                        message,
                        error,
                    }),
                }
            }
        }
        self.callbacks = callbacks;

        if report.faults.is_empty() {
            Ok(report)
        } else {
            Err(SimError::CallbackFailed(report))
        }
    }

    /// Copy of every accepted message, in acceptance order
    pub fn get_messages(&self) -> Vec<Message> {
        self.log.iter().map(|entry| entry.message.clone()).collect()
    }

    /// Copy of the full log
    pub fn get_log(&self) -> Vec<LogEntry> {
        self.log.clone()
    }

    /// Accepted messages declared for a given cycle count
    pub fn messages_for_cycle(&self, cycle: u8) -> Vec<Message> {
        self.log
            .iter()
            .filter(|entry| entry.message.cycle_count == cycle)
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Copy of the counters
    pub fn get_statistics(&self) -> Statistics {
        self.stats.clone()
    }

    fn ensure_running(&self) -> Result<(), SimError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SimError::NotRunning)
        }
    }
}

impl fmt::Debug for BusSimulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSimulator")
            .field("config", &self.config)
            .field("state", &self.stats.state)
            .field("cycle", &self.stats.cycle)
            .field("logged", &self.log.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", text)
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("panicked: {}", text)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use flexray_protocol::{Channel, ChannelMask, SlotOutOfRangeError};

    fn running(config: BusConfig) -> (BusSimulator, ManualClock) {
        let clock = ManualClock::new(0);
        let mut sim = BusSimulator::with_clock(config, clock.clone());
        sim.start().unwrap();
        (sim, clock)
    }

    fn msg(slot_id: u16, cycle: u8, channel: Channel) -> Message {
        Message::new(slot_id, cycle, channel, vec![slot_id as u8; 4])
    }

    #[test]
    fn test_new_simulator_is_stopped() {
        let sim = BusSimulator::new(BusConfig::default());
        assert_eq!(sim.state(), SimState::Stopped);
        assert_eq!(sim.current_cycle(), 0);
        assert!(sim.get_messages().is_empty());
    }

    #[test]
    fn test_operations_require_running() {
        let mut sim = BusSimulator::new(BusConfig::default());
        assert_eq!(
            sim.send_message(msg(1, 0, Channel::A)).unwrap_err(),
            SimError::NotRunning
        );
        assert_eq!(sim.advance_cycle().unwrap_err(), SimError::NotRunning);
        assert_eq!(sim.stop().unwrap_err(), SimError::NotRunning);
        assert_eq!(sim.get_statistics().dropped, 0);
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut sim, _) = running(BusConfig::default());
        assert_eq!(sim.start().unwrap_err(), SimError::AlreadyRunning);
    }

    #[test]
    fn test_accepted_message_is_logged_with_timestamp() {
        let (mut sim, clock) = running(BusConfig::default());
        clock.set(1_500);

        let entry = sim.send_message(msg(3, 0, Channel::A)).unwrap().clone();
        assert_eq!(entry.message.timestamp_us, Some(1_500));
        assert_eq!(entry.segment, Segment::Static);
        assert_eq!(entry.slot_offset_us, 100);
        assert_eq!(entry.encoded.len(), 5 + 4 + 3);

        let decoded = flexray_protocol::frame::decode(&entry.encoded).unwrap();
        assert_eq!(decoded.slot_id(), 3);
    }

    #[test]
    fn test_caller_copy_not_mutated() {
        let (mut sim, _) = running(BusConfig::default());
        let original = msg(1, 0, Channel::A);
        sim.send_message(original.clone()).unwrap();
        assert_eq!(original.timestamp_us, None);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let (mut sim, clock) = running(BusConfig::default());
        clock.set(5_000);
        sim.send_message(msg(1, 0, Channel::A)).unwrap();
        clock.set(1_000);
        sim.send_message(msg(2, 0, Channel::A)).unwrap();

        let stamps: Vec<_> = sim
            .get_messages()
            .iter()
            .map(|m| m.timestamp_us.unwrap())
            .collect();
        assert_eq!(stamps, vec![5_000, 5_000]);
    }

    #[test]
    fn test_rejections_count_as_dropped() {
        let config = BusConfig {
            channel_mask: ChannelMask::A,
            ..Default::default()
        };
        let (mut sim, _) = running(config);

        assert_eq!(
            sim.send_message(msg(1, 0, Channel::B)).unwrap_err(),
            SimError::Illegal(LegalityError::ChannelDisabled {
                channel: Channel::B,
                mask: 0b01
            })
        );
        assert!(matches!(
            sim.send_message(msg(1, 0, Channel::Both)),
            Err(SimError::Illegal(LegalityError::ChannelDisabled { .. }))
        ));
        assert_eq!(
            sim.send_message(msg(193, 0, Channel::A)).unwrap_err(),
            SimError::Illegal(LegalityError::SlotOutOfRange(SlotOutOfRangeError {
                slot_id: 193,
                max_slot: 192
            }))
        );
        assert_eq!(
            sim.send_message(msg(0, 0, Channel::A)).unwrap_err(),
            SimError::InvalidFrame(InvalidFrameError::SlotId(0))
        );
        assert_eq!(
            sim.send_message(Message::new(1, 0, Channel::A, vec![0; 300]))
                .unwrap_err(),
            SimError::InvalidFrame(InvalidFrameError::PayloadTooLong(300))
        );

        let stats = sim.get_statistics();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.dropped, 5);
        assert!(sim.get_messages().is_empty());
    }

    #[test]
    fn test_future_cycle_is_accepted() {
        let (mut sim, _) = running(BusConfig::default());
        let entry = sim.send_message(msg(5, 40, Channel::A)).unwrap();
        assert_eq!(entry.accepted_in_cycle, 0);
        assert_eq!(entry.message.cycle_count, 40);
        assert_eq!(sim.messages_for_cycle(40).len(), 1);

        assert!(matches!(
            sim.send_message(msg(5, 64, Channel::A)),
            Err(SimError::InvalidFrame(InvalidFrameError::CycleCount(64)))
        ));
    }

    #[test]
    fn test_channel_counters() {
        let (mut sim, _) = running(BusConfig::default());
        sim.send_message(msg(1, 0, Channel::A)).unwrap();
        sim.send_message(msg(2, 0, Channel::B)).unwrap();
        sim.send_message(msg(3, 0, Channel::Both)).unwrap();
        sim.send_message(msg(3, 1, Channel::Both)).unwrap();

        let stats = sim.get_statistics();
        assert_eq!(stats.sent, 4);
        assert_eq!(stats.channel_a, 3);
        assert_eq!(stats.channel_b, 3);
        assert_eq!(stats.slot_distribution.get(&3), Some(&2));
        assert_eq!(stats.unique_slots(), 3);
    }

    #[test]
    fn test_cycle_wraps_after_64_advances() {
        let (mut sim, _) = running(BusConfig::default());
        for expected in 1..64u8 {
            assert_eq!(sim.advance_cycle().unwrap().cycle, expected);
        }
        assert_eq!(sim.advance_cycle().unwrap().cycle, 0);
        assert_eq!(sim.current_cycle(), 0);
        assert_eq!(sim.get_statistics().cycles_elapsed, 64);
    }

    #[test]
    fn test_start_clears_previous_run() {
        let (mut sim, _) = running(BusConfig::default());
        sim.send_message(msg(1, 0, Channel::A)).unwrap();
        sim.advance_cycle().unwrap();
        sim.stop().unwrap();

        // Stopped simulators keep their results readable
        assert_eq!(sim.get_messages().len(), 1);
        assert_eq!(sim.get_statistics().state, SimState::Stopped);

        sim.start().unwrap();
        assert!(sim.get_messages().is_empty());
        assert_eq!(sim.current_cycle(), 0);
        assert_eq!(sim.get_statistics().sent, 0);
    }

    #[test]
    fn test_snapshots_are_copies() {
        let (mut sim, _) = running(BusConfig::default());
        sim.send_message(msg(1, 0, Channel::A)).unwrap();
        let messages = sim.get_messages();
        let stats = sim.get_statistics();

        sim.send_message(msg(2, 0, Channel::A)).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(stats.sent, 1);
    }

    #[test]
    fn test_reconfigure_only_when_stopped() {
        let (mut sim, _) = running(BusConfig::default());
        let small = BusConfig {
            static_slots: 4,
            dynamic_slots: 0,
            ..Default::default()
        };
        assert_eq!(
            sim.reconfigure(small.clone()).unwrap_err(),
            SimError::AlreadyRunning
        );

        sim.stop().unwrap();
        sim.reconfigure(small).unwrap();
        assert_eq!(sim.layout().max_slot(), 4);

        sim.start().unwrap();
        assert!(sim.send_message(msg(5, 0, Channel::A)).is_err());
        assert!(sim.send_message(msg(4, 0, Channel::A)).is_ok());
    }

    #[test]
    fn test_reset_returns_to_stopped() {
        let (mut sim, _) = running(BusConfig::default());
        sim.send_message(msg(1, 0, Channel::A)).unwrap();
        sim.reset();
        assert_eq!(sim.state(), SimState::Stopped);
        assert!(sim.get_log().is_empty());
        assert_eq!(sim.get_statistics().sent, 0);
    }

    #[test]
    fn test_callbacks_run_in_order() {
        let (mut sim, _) = running(BusConfig::default());
        sim.register_callback("first", |cycle, tx| {
            tx.send(Message::new(1, cycle, Channel::A, vec![1]));
            Ok(())
        });
        sim.register_callback("second", |cycle, tx| {
            tx.send(Message::new(2, cycle, Channel::A, vec![2]));
            Ok(())
        });

        let report = sim.advance_cycle().unwrap();
        assert_eq!(report.cycle, 1);
        assert_eq!(report.accepted, 2);

        let slots: Vec<_> = sim.get_messages().iter().map(|m| m.slot_id).collect();
        assert_eq!(slots, vec![1, 2]);
        assert!(sim.get_messages().iter().all(|m| m.cycle_count == 1));
    }

    #[test]
    fn test_failing_callback_is_isolated() {
        let (mut sim, _) = running(BusConfig::default());
        sim.register_callback("good", |cycle, tx| {
            tx.send(Message::new(1, cycle, Channel::A, vec![]));
            Ok(())
        });
        sim.register_callback("faulty", |cycle, tx| {
            tx.send(Message::new(2, cycle, Channel::A, vec![]));
            Err("sensor offline".into())
        });
        sim.register_callback("after", |cycle, tx| {
            tx.send(Message::new(3, cycle, Channel::A, vec![]));
            Ok(())
        });

        let err = sim.advance_cycle().unwrap_err();
        let SimError::CallbackFailed(report) = err else {
            panic!("expected callback failure, got {:?}", err);
        };
        assert_eq!(report.cycle, 1);
        assert_eq!(report.accepted, 2);
        assert_eq!(
            report.faults,
            vec![CallbackFault {
                index: 1,
                name: "faulty".to_string(),
                message: "sensor offline".to_string(),
            }]
        );

        // Earlier and later callbacks still reached the log; the faulty one did not
        let slots: Vec<_> = sim.get_messages().iter().map(|m| m.slot_id).collect();
        assert_eq!(slots, vec![1, 3]);
        assert_eq!(sim.current_cycle(), 1);
        assert_eq!(sim.callback_count(), 3);
    }

    #[test]
    fn test_panicking_callback_keeps_registrations() {
        let (mut sim, _) = running(BusConfig::default());
        sim.register_callback("steady", |cycle, tx| {
            tx.send(Message::new(1, cycle, Channel::A, vec![]));
            Ok(())
        });
        sim.register_callback("boom", |cycle, _tx| {
            if cycle == 1 {
                panic!("wheel sensor exploded");
            }
            Ok(())
        });

        let err = sim.advance_cycle().unwrap_err();
        let SimError::CallbackFailed(report) = err else {
            panic!("expected callback failure, got {:?}", err);
        };
        assert_eq!(report.accepted, 1);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].index, 1);
        assert_eq!(report.faults[0].name, "boom");
        assert!(report.faults[0].message.contains("wheel sensor exploded"));
        assert_eq!(sim.callback_count(), 2);

        // Both callbacks still run in the next cycle
        let report = sim.advance_cycle().unwrap();
        assert_eq!(report.cycle, 2);
        assert_eq!(report.accepted, 1);
        assert_eq!(sim.get_statistics().sent, 2);
    }

    #[test]
    fn test_callback_rejections_are_reported() {
        let config = BusConfig {
            channel_mask: ChannelMask::A,
            ..Default::default()
        };
        let (mut sim, _) = running(config);
        sim.register_callback("wrong-channel", |cycle, tx| {
            tx.send(Message::new(1, cycle, Channel::B, vec![]));
            Ok(())
        });

        let report = sim.advance_cycle().unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].source, "wrong-channel");
        assert_eq!(sim.get_statistics().dropped, 1);
    }

    #[test]
    fn test_error_display() {
        let report = CycleReport {
            cycle: 7,
            faults: vec![CallbackFault {
                index: 0,
                name: "n".to_string(),
                message: "m".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(
            SimError::CallbackFailed(report).to_string(),
            "1 callback(s) failed in cycle 7"
        );
    }
}
