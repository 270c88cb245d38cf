//! FlexRay Protocol Library
//!
//! This crate models the FlexRay automotive bus protocol without hardware:
//!
//! - **Frame codec**: 5-byte header, up to 254 payload bytes, 24-bit CRC trailer
//! - **Bus configuration**: baud rate, slot counts, cycle timing, channel mask,
//!   with advisory validation
//! - **Cycle scheduling**: static segment, dynamic segment and network idle
//!   time boundaries, slot timing and slot legality
//! - **Signals**: named scalar values packed into and out of payload bytes
//!
//! # Cycle model
//!
//! A communication cycle is laid out as
//!
//! ```text
//! | static slots 1..=S | dynamic minislots S+1..=S+D | idle ... | NIT |
//! ```
//!
//! and the cycle counter runs 0..=63 before wrapping.
//!
//! # Example
//!
//! ```rust
//! use flexray_protocol::{frame, BusConfig, Channel, Message};
//! use flexray_protocol::schedule;
//!
//! let config = BusConfig::default();
//! let message = Message::new(10, 0, Channel::A, vec![0x01, 0x02, 0x03, 0x04]);
//!
//! assert!(schedule::is_legal(&config, message.slot_id, message.cycle_count, message.channel));
//!
//! let bytes = frame::encode(&message).unwrap();
//! let decoded = frame::decode(&bytes).unwrap();
//! assert_eq!(decoded.slot_id(), 10);
//! assert_eq!(decoded.payload(), &[0x01, 0x02, 0x03, 0x04]);
//! ```

use std::fmt;

pub mod config;
pub mod crc24;
pub mod error;
pub mod frame;
pub mod schedule;
pub mod signal;

pub use config::{BusConfig, ChannelMask, ConfigIssue, ConfigIssues};
pub use error::{
    InvalidFrameError, LegalityError, MalformedFrameError, ProtocolError, SignalError,
    SlotOutOfRangeError,
};
pub use frame::{Frame, FrameCodec, FrameFlags, Message};
pub use schedule::{CycleLayout, Segment, SlotAssignment};
pub use signal::{Endianness, SignalEncoding, SignalLayout, SignalSpec, SignalValues};

/// Protocol version the timing defaults follow
pub const FLEXRAY_VERSION: &str = "3.0.1";

/// Lowest usable slot id (0 is reserved)
pub const MIN_SLOT_ID: u16 = 1;
/// Highest slot id representable in the 11-bit frame id field
pub const MAX_SLOT_ID: u16 = 2047;
/// Highest cycle count (6-bit counter)
pub const MAX_CYCLE_COUNT: u8 = 63;
/// Number of distinct cycle counter values
pub const CYCLE_COUNT_MODULUS: u8 = 64;
/// Maximum payload in bytes (127 two-byte words)
pub const MAX_PAYLOAD_LENGTH: usize = 254;

/// A FlexRay channel selection
///
/// `Both` requests a redundant transmission on A and B and is carried in the
/// header as both channel bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Channel {
    /// Channel A
    A,
    /// Channel B
    B,
    /// Channels A and B (redundant transmission)
    Both,
}

impl Channel {
    /// Wire bit for channel A
    pub const BIT_A: u8 = 0b01;
    /// Wire bit for channel B
    pub const BIT_B: u8 = 0b10;

    /// Channel bits as carried in the frame header and channel mask
    pub fn bits(self) -> u8 {
        match self {
            Channel::A => Self::BIT_A,
            Channel::B => Self::BIT_B,
            Channel::Both => Self::BIT_A | Self::BIT_B,
        }
    }

    /// Decode channel bits; `None` when neither channel is selected
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0b11 {
            Self::BIT_A => Some(Channel::A),
            Self::BIT_B => Some(Channel::B),
            0b11 => Some(Channel::Both),
            _ => None,
        }
    }

    /// Whether this selection includes channel A
    pub fn includes_a(self) -> bool {
        self.bits() & Self::BIT_A != 0
    }

    /// Whether this selection includes channel B
    pub fn includes_b(self) -> bool {
        self.bits() & Self::BIT_B != 0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::A => write!(f, "A"),
            Channel::B => write!(f, "B"),
            Channel::Both => write!(f, "AB"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_bits_roundtrip() {
        for channel in [Channel::A, Channel::B, Channel::Both] {
            assert_eq!(Channel::from_bits(channel.bits()), Some(channel));
        }
        assert_eq!(Channel::from_bits(0), None);
    }

    #[test]
    fn test_channel_membership() {
        assert!(Channel::A.includes_a());
        assert!(!Channel::A.includes_b());
        assert!(Channel::Both.includes_a() && Channel::Both.includes_b());
        assert_eq!(Channel::Both.to_string(), "AB");
    }
}
