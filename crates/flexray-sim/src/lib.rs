//! FlexRay Bus Simulation Library
//!
//! This crate simulates a FlexRay bus without physical hardware. It includes:
//!
//! - **BusSimulator**: accepts, validates, encodes and logs transmissions and
//!   advances the cycle counter on request
//! - **VirtualNode**: an ECU that transmits in its own slots on a cycle
//!   multiplexing schedule
//! - **SharedSimulator**: a cloneable, thread-safe handle
//!
//! # Example
//!
//! ```rust
//! use flexray_protocol::{BusConfig, Channel, Message};
//! use flexray_sim::{BusSimulator, VirtualNode};
//!
//! let mut sim = BusSimulator::new(BusConfig::default());
//! sim.attach_node(
//!     VirtualNode::new("engine", Channel::A)
//!         .with_fixed_slot(1, 0, 1, vec![0x10, 0x20])
//!         .unwrap(),
//! );
//!
//! sim.start().unwrap();
//! sim.send_message(Message::new(10, 0, Channel::B, vec![0xAB])).unwrap();
//! sim.advance_cycle().unwrap();
//!
//! let stats = sim.get_statistics();
//! assert_eq!(stats.sent, 2);
//! assert_eq!(stats.cycle, 1);
//! ```

pub mod clock;
pub mod node;
pub mod shared;
pub mod simulator;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use node::{NodeError, PayloadConfig, SignalConfig, SlotConfig, VirtualNode, VirtualNodeConfig};
pub use shared::SharedSimulator;
pub use simulator::{
    BusSimulator, CallbackError, CallbackFault, CycleCallback, CycleReport, CycleTx, LogEntry,
    Rejection, SimError, SimState, Statistics,
};
