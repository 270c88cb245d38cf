//! Virtual ECU nodes
//!
//! A [`VirtualNode`] owns a set of slots and transmits in them on a cycle
//! multiplexing schedule: a slot fires in every cycle where
//! `cycle % repetition == base_cycle`. Nodes plug into the simulator as
//! per-cycle callbacks.

use std::fmt;

use flexray_protocol::{
    Channel, FrameFlags, Message, SignalEncoding, SignalError, SignalLayout, SignalSpec,
    SignalValues, CYCLE_COUNT_MODULUS,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::simulator::{CallbackError, CycleCallback, CycleTx};

/// Errors building or running a virtual node
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Repetition must be a power of two in 1..=64
    #[error("invalid cycle repetition {0}: must be 1, 2, 4, 8, 16, 32 or 64")]
    Repetition(u8),

    /// Base cycle must be below the repetition
    #[error("base cycle {base} must be below repetition {repetition}")]
    BaseCycle { base: u8, repetition: u8 },

    /// Slot already owned by this node
    #[error("slot {0} scheduled twice")]
    DuplicateSlot(u16),

    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// One signal in a node configuration, encoded by format string (`">H"`, `"b"`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub name: String,
    pub offset: usize,
    pub format: String,
    /// Value sent when the node does not update it
    #[serde(default)]
    pub value: i128,
}

/// How a slot's payload is produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadConfig {
    /// Same bytes every transmission
    Fixed(Vec<u8>),
    /// `length` bytes with a rolling counter in byte 0
    AliveCounter { length: usize },
    /// Packed signals; `counter` names a signal that increments per transmission
    Signals {
        length: usize,
        signals: Vec<SignalConfig>,
        #[serde(default)]
        counter: Option<String>,
    },
}

/// Scheduled slot in a node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub slot_id: u16,
    #[serde(default)]
    pub base_cycle: u8,
    #[serde(default = "default_repetition")]
    pub repetition: u8,
    #[serde(default)]
    pub flags: FrameFlags,
    pub payload: PayloadConfig,
}

fn default_repetition() -> u8 {
    1
}

/// Configuration for creating a virtual node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNodeConfig {
    pub name: String,
    pub channel: Channel,
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
}

enum Payload {
    Fixed(Vec<u8>),
    AliveCounter {
        length: usize,
    },
    Signals {
        layout: SignalLayout,
        values: SignalValues,
        length: usize,
        counter: Option<String>,
    },
}

impl Payload {
    fn from_config(config: PayloadConfig) -> Result<Self, NodeError> {
        Ok(match config {
            PayloadConfig::Fixed(bytes) => Payload::Fixed(bytes),
            PayloadConfig::AliveCounter { length } => Payload::AliveCounter { length },
            PayloadConfig::Signals {
                length,
                signals,
                counter,
            } => {
                let mut values = SignalValues::new();
                let mut specs = Vec::with_capacity(signals.len());
                for signal in signals {
                    let encoding: SignalEncoding = signal.format.parse()?;
                    values.insert(signal.name.clone(), signal.value);
                    specs.push(SignalSpec::new(signal.name, signal.offset, encoding));
                }
                let layout = SignalLayout::new(specs)?;
                if let Some(name) = &counter {
                    if layout.get(name).is_none() {
                        return Err(SignalError::UnknownSignal(name.clone()).into());
                    }
                }
                // Surface range and overflow problems before the first cycle
                layout.pack(&values, length)?;
                Payload::Signals {
                    layout,
                    values,
                    length,
                    counter,
                }
            }
        })
    }

    fn render(&mut self, sequence: u64) -> Result<Vec<u8>, SignalError> {
        match self {
            Payload::Fixed(bytes) => Ok(bytes.clone()),
            Payload::AliveCounter { length } => {
                let mut bytes = vec![0u8; *length];
                if let Some(first) = bytes.first_mut() {
                    *first = sequence as u8;
                }
                Ok(bytes)
            }
            Payload::Signals {
                layout,
                values,
                length,
                counter,
            } => {
                if let Some(spec) = counter.as_deref().and_then(|name| layout.get(name)) {
                    let (min, max) = spec.encoding.bounds();
                    let value = min + (sequence as i128).rem_euclid(max - min + 1);
                    values.insert(spec.name.clone(), value);
                }
                layout.pack(values, *length)
            }
        }
    }
}

struct ScheduledSlot {
    slot_id: u16,
    base_cycle: u8,
    repetition: u8,
    flags: FrameFlags,
    payload: Payload,
    sent: u64,
}

impl ScheduledSlot {
    fn is_due(&self, cycle: u8) -> bool {
        cycle % self.repetition == self.base_cycle
    }
}

/// A simulated ECU transmitting in its own slots
pub struct VirtualNode {
    name: String,
    channel: Channel,
    slots: Vec<ScheduledSlot>,
    tx_count: u64,
}

impl VirtualNode {
    /// Create a node with no slots
    pub fn new(name: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            channel,
            slots: Vec::new(),
            tx_count: 0,
        }
    }

    /// Create a node from configuration
    pub fn from_config(config: VirtualNodeConfig) -> Result<Self, NodeError> {
        let mut node = Self::new(config.name, config.channel);
        for slot in config.slots {
            node.add_slot(slot)?;
        }
        Ok(node)
    }

    /// Schedule a slot
    pub fn add_slot(&mut self, config: SlotConfig) -> Result<(), NodeError> {
        let repetition = config.repetition;
        if !repetition.is_power_of_two() || repetition > CYCLE_COUNT_MODULUS {
            return Err(NodeError::Repetition(repetition));
        }
        if config.base_cycle >= repetition {
            return Err(NodeError::BaseCycle {
                base: config.base_cycle,
                repetition,
            });
        }
        if self.slots.iter().any(|slot| slot.slot_id == config.slot_id) {
            return Err(NodeError::DuplicateSlot(config.slot_id));
        }

        self.slots.push(ScheduledSlot {
            slot_id: config.slot_id,
            base_cycle: config.base_cycle,
            repetition,
            flags: config.flags,
            payload: Payload::from_config(config.payload)?,
            sent: 0,
        });
        Ok(())
    }

    /// Builder form of [`add_slot`](Self::add_slot) with a fixed payload
    pub fn with_fixed_slot(
        mut self,
        slot_id: u16,
        base_cycle: u8,
        repetition: u8,
        payload: Vec<u8>,
    ) -> Result<Self, NodeError> {
        self.add_slot(SlotConfig {
            slot_id,
            base_cycle,
            repetition,
            flags: FrameFlags::empty(),
            payload: PayloadConfig::Fixed(payload),
        })?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Slot ids owned by this node, in scheduling order
    pub fn slot_ids(&self) -> Vec<u16> {
        self.slots.iter().map(|slot| slot.slot_id).collect()
    }

    /// Messages produced by this node so far
    pub fn tx_count(&self) -> u64 {
        self.tx_count
    }

    /// Produce this node's messages for a cycle
    pub fn transmissions(&mut self, cycle: u8) -> Result<Vec<Message>, NodeError> {
        let mut messages = Vec::new();
        for slot in self.slots.iter_mut().filter(|slot| slot.is_due(cycle)) {
            let payload = slot.payload.render(slot.sent)?;
            slot.sent += 1;
            messages.push(
                Message::new(slot.slot_id, cycle, self.channel, payload).with_flags(slot.flags),
            );
        }
        self.tx_count += messages.len() as u64;
        trace!(
            "Node {} produced {} message(s) for cycle {}",
            self.name,
            messages.len(),
            cycle
        );
        Ok(messages)
    }
}

impl fmt::Debug for VirtualNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualNode")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("slots", &self.slot_ids())
            .field("tx_count", &self.tx_count)
            .finish()
    }
}

impl CycleCallback for VirtualNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_cycle(&mut self, cycle: u8, tx: &mut CycleTx) -> Result<(), CallbackError> {
        for message in self.transmissions(cycle)? {
            tx.send(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(slot_id: u16, base_cycle: u8, repetition: u8) -> SlotConfig {
        SlotConfig {
            slot_id,
            base_cycle,
            repetition,
            flags: FrameFlags::empty(),
            payload: PayloadConfig::Fixed(vec![0xAA]),
        }
    }

    #[test]
    fn test_every_cycle_slot() {
        let mut node = VirtualNode::new("engine", Channel::A)
            .with_fixed_slot(1, 0, 1, vec![1, 2])
            .unwrap();
        for cycle in 0..4 {
            let messages = node.transmissions(cycle).unwrap();
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].cycle_count, cycle);
            assert_eq!(messages[0].payload, vec![1, 2]);
        }
        assert_eq!(node.tx_count(), 4);
    }

    #[test]
    fn test_cycle_multiplexing() {
        let mut node = VirtualNode::new("body", Channel::B);
        node.add_slot(fixed(5, 1, 4)).unwrap();

        let due: Vec<u8> = (0..CYCLE_COUNT_MODULUS)
            .filter(|&cycle| !node.transmissions(cycle).unwrap().is_empty())
            .collect();
        assert_eq!(due.len(), 16);
        assert_eq!(&due[..3], &[1, 5, 9]);
    }

    #[test]
    fn test_schedule_validation() {
        let mut node = VirtualNode::new("n", Channel::A);
        assert_eq!(node.add_slot(fixed(1, 0, 3)), Err(NodeError::Repetition(3)));
        assert_eq!(node.add_slot(fixed(1, 0, 128)), Err(NodeError::Repetition(128)));
        assert_eq!(node.add_slot(fixed(1, 0, 0)), Err(NodeError::Repetition(0)));
        assert_eq!(
            node.add_slot(fixed(1, 2, 2)),
            Err(NodeError::BaseCycle {
                base: 2,
                repetition: 2
            })
        );
        node.add_slot(fixed(1, 0, 64)).unwrap();
        assert_eq!(node.add_slot(fixed(1, 0, 1)), Err(NodeError::DuplicateSlot(1)));
    }

    #[test]
    fn test_alive_counter_wraps() {
        let mut node = VirtualNode::new("n", Channel::A);
        node.add_slot(SlotConfig {
            payload: PayloadConfig::AliveCounter { length: 2 },
            ..fixed(1, 0, 1)
        })
        .unwrap();

        let mut last = Vec::new();
        for i in 0..257u32 {
            last = node.transmissions((i % 64) as u8).unwrap().remove(0).payload;
        }
        assert_eq!(last, vec![0, 0]);
    }

    #[test]
    fn test_signal_payload_with_counter() {
        let mut node = VirtualNode::new("n", Channel::A);
        node.add_slot(SlotConfig {
            payload: PayloadConfig::Signals {
                length: 4,
                signals: vec![
                    SignalConfig {
                        name: "seq".to_string(),
                        offset: 0,
                        format: "B".to_string(),
                        value: 0,
                    },
                    SignalConfig {
                        name: "speed".to_string(),
                        offset: 1,
                        format: ">H".to_string(),
                        value: 300,
                    },
                ],
                counter: Some("seq".to_string()),
            },
            ..fixed(2, 0, 1)
        })
        .unwrap();

        assert_eq!(node.transmissions(0).unwrap()[0].payload, vec![0, 0x01, 0x2C, 0]);
        assert_eq!(node.transmissions(1).unwrap()[0].payload, vec![1, 0x01, 0x2C, 0]);
    }

    #[test]
    fn test_signal_payload_errors_at_construction() {
        let signals = vec![SignalConfig {
            name: "temp".to_string(),
            offset: 0,
            format: "b".to_string(),
            value: 200,
        }];
        let mut node = VirtualNode::new("n", Channel::A);
        let err = node
            .add_slot(SlotConfig {
                payload: PayloadConfig::Signals {
                    length: 1,
                    signals: signals.clone(),
                    counter: None,
                },
                ..fixed(1, 0, 1)
            })
            .unwrap_err();
        assert!(matches!(err, NodeError::Signal(SignalError::ValueOverflow { .. })));

        let err = node
            .add_slot(SlotConfig {
                payload: PayloadConfig::Signals {
                    length: 1,
                    signals,
                    counter: Some("missing".to_string()),
                },
                ..fixed(1, 0, 1)
            })
            .unwrap_err();
        assert_eq!(
            err,
            NodeError::Signal(SignalError::UnknownSignal("missing".to_string()))
        );
    }

    #[test]
    fn test_flags_carried_into_messages() {
        let mut node = VirtualNode::new("sync-node", Channel::Both);
        node.add_slot(SlotConfig {
            flags: FrameFlags::empty().with_sync(true).with_startup(true),
            ..fixed(1, 0, 1)
        })
        .unwrap();
        let message = node.transmissions(0).unwrap().remove(0);
        assert!(message.flags.is_sync());
        assert!(message.flags.is_startup());
        assert_eq!(message.channel, Channel::Both);
    }
}
