//! FlexRay frame codec
//!
//! # Frame Format
//! ```text
//! [header: 5 bytes] [payload: 0..=254 bytes] [CRC-24: 3 bytes]
//! ```
//!
//! Header bits (MSB first within each byte):
//!
//! | Byte | Bits | Field |
//! |------|------|-------|
//! | 0 | 7 | reserved, sent as 0 |
//! | 0 | 6..3 | payload preamble, null frame, sync, startup indicators |
//! | 0 | 2..0 | slot id bits 10..8 |
//! | 1 | 7..0 | slot id bits 7..0 |
//! | 2 | 7..0 | payload length in bytes |
//! | 3 | 7..6 | channel (A = 01, B = 10, both = 11) |
//! | 3 | 5..0 | cycle count |
//! | 4 | 7..0 | reserved, sent as 0 |
//!
//! The CRC covers header and payload and is always recomputed on encode.

use std::fmt;

use crc::{Algorithm, Crc};

use crate::crc24::{self, CRC_24_FLEXRAY};
use crate::error::{InvalidFrameError, MalformedFrameError};
use crate::{Channel, MAX_CYCLE_COUNT, MAX_PAYLOAD_LENGTH, MAX_SLOT_ID, MIN_SLOT_ID};

/// Header length in bytes
pub const HEADER_LENGTH: usize = 5;
/// Trailer (CRC) length in bytes
pub const TRAILER_LENGTH: usize = 3;
/// Shortest valid frame: header and trailer with an empty payload
pub const MIN_FRAME_LENGTH: usize = HEADER_LENGTH + TRAILER_LENGTH;

const SLOT_HIGH_MASK: u8 = 0x07;
const FLAGS_SHIFT: u8 = 3;
const CHANNEL_SHIFT: u8 = 6;
const CYCLE_MASK: u8 = 0x3F;

/// Frame indicator bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Startup frame indicator
    pub const STARTUP: u8 = 0x01;
    /// Sync frame indicator
    pub const SYNC: u8 = 0x02;
    /// Null frame indicator (payload carries no valid data)
    pub const NULL_FRAME: u8 = 0x04;
    /// Payload preamble indicator (network management vector present)
    pub const PAYLOAD_PREAMBLE: u8 = 0x08;

    const ALL: u8 = Self::STARTUP | Self::SYNC | Self::NULL_FRAME | Self::PAYLOAD_PREAMBLE;

    /// No indicators set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create flags from raw bits; unknown bits are dropped
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL)
    }

    /// Raw indicator bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn is_startup(self) -> bool {
        self.0 & Self::STARTUP != 0
    }

    pub fn is_sync(self) -> bool {
        self.0 & Self::SYNC != 0
    }

    pub fn is_null_frame(self) -> bool {
        self.0 & Self::NULL_FRAME != 0
    }

    pub fn has_payload_preamble(self) -> bool {
        self.0 & Self::PAYLOAD_PREAMBLE != 0
    }

    /// Set or clear the startup indicator
    pub fn with_startup(self, on: bool) -> Self {
        self.with(Self::STARTUP, on)
    }

    /// Set or clear the sync indicator
    pub fn with_sync(self, on: bool) -> Self {
        self.with(Self::SYNC, on)
    }

    /// Set or clear the null frame indicator
    pub fn with_null_frame(self, on: bool) -> Self {
        self.with(Self::NULL_FRAME, on)
    }

    /// Set or clear the payload preamble indicator
    pub fn with_payload_preamble(self, on: bool) -> Self {
        self.with(Self::PAYLOAD_PREAMBLE, on)
    }

    fn with(self, bit: u8, on: bool) -> Self {
        if on {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }
}

/// A transmission request, or a record of an accepted transmission
///
/// Same content as a [`Frame`] without the CRC. The timestamp is assigned by
/// the simulator when the message is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    /// Slot id (1..=2047)
    pub slot_id: u16,
    /// Cycle count (0..=63)
    pub cycle_count: u8,
    /// Channel selection
    pub channel: Channel,
    /// Indicator bits
    #[cfg_attr(feature = "serde", serde(default))]
    pub flags: FrameFlags,
    /// Payload bytes (0..=254)
    pub payload: Vec<u8>,
    /// Acceptance time in microseconds, set by the simulator
    #[cfg_attr(feature = "serde", serde(default))]
    pub timestamp_us: Option<u64>,
}

impl Message {
    /// Create a message with no indicator bits and no timestamp
    pub fn new(slot_id: u16, cycle_count: u8, channel: Channel, payload: Vec<u8>) -> Self {
        Self {
            slot_id,
            cycle_count,
            channel,
            flags: FrameFlags::empty(),
            payload,
            timestamp_us: None,
        }
    }

    /// Replace the indicator bits
    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Check the codec's bounds without encoding
    pub fn check_bounds(&self) -> Result<(), InvalidFrameError> {
        if !(MIN_SLOT_ID..=MAX_SLOT_ID).contains(&self.slot_id) {
            return Err(InvalidFrameError::SlotId(self.slot_id));
        }
        if self.cycle_count > MAX_CYCLE_COUNT {
            return Err(InvalidFrameError::CycleCount(self.cycle_count));
        }
        if self.payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(InvalidFrameError::PayloadTooLong(self.payload.len()));
        }
        Ok(())
    }
}

/// An encoded-form FlexRay frame with its CRC
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame {
    slot_id: u16,
    cycle_count: u8,
    channel: Channel,
    flags: FrameFlags,
    payload: Vec<u8>,
    crc: u32,
}

impl Frame {
    pub fn slot_id(&self) -> u16 {
        self.slot_id
    }

    pub fn cycle_count(&self) -> u8 {
        self.cycle_count
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The 24-bit CRC over header and payload
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Total encoded length in bytes
    pub fn encoded_len(&self) -> usize {
        HEADER_LENGTH + self.payload.len() + TRAILER_LENGTH
    }

    /// Frame identifier in `FR_<slot>_C<cycle>` form
    pub fn label(&self) -> String {
        format!("FR_{:04}_C{:02}", self.slot_id, self.cycle_count)
    }

    /// Header bytes for this frame
    pub fn header(&self) -> [u8; HEADER_LENGTH] {
        build_header(
            self.slot_id,
            self.cycle_count,
            self.channel,
            self.flags,
            self.payload.len(),
        )
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.header());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&crc24::to_trailer(self.crc));
        out
    }

    /// Convert back into an untimestamped message
    pub fn to_message(&self) -> Message {
        Message {
            slot_id: self.slot_id,
            cycle_count: self.cycle_count,
            channel: self.channel,
            flags: self.flags,
            payload: self.payload.clone(),
            timestamp_us: None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch {} len {} crc 0x{:06X}",
            self.label(),
            self.channel,
            self.payload.len(),
            self.crc
        )
    }
}

fn build_header(
    slot_id: u16,
    cycle_count: u8,
    channel: Channel,
    flags: FrameFlags,
    payload_len: usize,
) -> [u8; HEADER_LENGTH] {
    [
        (flags.bits() << FLAGS_SHIFT) | ((slot_id >> 8) as u8 & SLOT_HIGH_MASK),
        slot_id as u8,
        payload_len as u8,
        (channel.bits() << CHANNEL_SHIFT) | (cycle_count & CYCLE_MASK),
        0,
    ]
}

/// Stateless frame encoder/decoder bound to a CRC-24 algorithm
pub struct FrameCodec {
    crc: Crc<u32>,
}

impl FrameCodec {
    /// Codec using the FlexRay CRC-24 polynomial
    pub const fn new() -> Self {
        Self::with_algorithm(&CRC_24_FLEXRAY)
    }

    /// Codec using a different 24-bit CRC algorithm
    pub const fn with_algorithm(algorithm: &'static Algorithm<u32>) -> Self {
        Self {
            crc: Crc::<u32>::new(algorithm),
        }
    }

    /// The CRC algorithm in use
    pub fn algorithm(&self) -> &'static Algorithm<u32> {
        self.crc.algorithm
    }

    /// Validate a message and build its frame, computing the CRC
    pub fn frame(&self, message: &Message) -> Result<Frame, InvalidFrameError> {
        message.check_bounds()?;
        let header = build_header(
            message.slot_id,
            message.cycle_count,
            message.channel,
            message.flags,
            message.payload.len(),
        );
        let crc = crc24::checksum(&self.crc, &header, &message.payload);

        Ok(Frame {
            slot_id: message.slot_id,
            cycle_count: message.cycle_count,
            channel: message.channel,
            flags: message.flags,
            payload: message.payload.clone(),
            crc,
        })
    }

    /// Encode a message to wire bytes
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, InvalidFrameError> {
        self.frame(message).map(|frame| frame.to_bytes())
    }

    /// Decode wire bytes into a frame, verifying length and CRC
    ///
    /// Slot id 0 and other scheduling concerns are not rejected here.
    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, MalformedFrameError> {
        if bytes.len() < MIN_FRAME_LENGTH {
            return Err(MalformedFrameError::TooShort { len: bytes.len() });
        }

        let (header, rest) = bytes.split_at(HEADER_LENGTH);
        let declared = usize::from(header[2]);
        let actual = rest.len() - TRAILER_LENGTH;
        if declared != actual {
            return Err(MalformedFrameError::LengthMismatch { declared, actual });
        }
        if declared > MAX_PAYLOAD_LENGTH {
            return Err(MalformedFrameError::PayloadTooLong(declared));
        }

        let (payload, trailer) = rest.split_at(actual);
        let received = crc24::from_trailer([trailer[0], trailer[1], trailer[2]]);
        let computed = crc24::checksum(&self.crc, header, payload);
        if computed != received {
            tracing::debug!(
                "CRC mismatch on {} byte frame: computed 0x{:06X}, received 0x{:06X}",
                bytes.len(),
                computed,
                received
            );
            return Err(MalformedFrameError::CrcMismatch {
                expected: computed,
                actual: received,
            });
        }

        let channel_bits = header[3] >> CHANNEL_SHIFT;
        let channel = Channel::from_bits(channel_bits)
            .ok_or(MalformedFrameError::InvalidChannel(channel_bits))?;

        Ok(Frame {
            slot_id: (u16::from(header[0] & SLOT_HIGH_MASK) << 8) | u16::from(header[1]),
            cycle_count: header[3] & CYCLE_MASK,
            channel,
            flags: FrameFlags::from_bits(header[0] >> FLAGS_SHIFT),
            payload: payload.to_vec(),
            crc: received,
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec")
            .field("poly", &format_args!("0x{:06X}", self.crc.algorithm.poly))
            .field("init", &format_args!("0x{:06X}", self.crc.algorithm.init))
            .finish()
    }
}

static FLEXRAY_CODEC: FrameCodec = FrameCodec::new();

/// Encode a message with the FlexRay CRC-24
pub fn encode(message: &Message) -> Result<Vec<u8>, InvalidFrameError> {
    FLEXRAY_CODEC.encode(message)
}

/// Decode bytes with the FlexRay CRC-24
pub fn decode(bytes: &[u8]) -> Result<Frame, MalformedFrameError> {
    FLEXRAY_CODEC.decode(bytes)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn channel() -> impl Strategy<Value = Channel> {
        prop_oneof![Just(Channel::A), Just(Channel::B), Just(Channel::Both)]
    }

    fn valid_message() -> impl Strategy<Value = Message> {
        (
            MIN_SLOT_ID..=MAX_SLOT_ID,
            0..=MAX_CYCLE_COUNT,
            channel(),
            0u8..16,
            proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_LENGTH),
        )
            .prop_map(|(slot_id, cycle_count, channel, flags, payload)| {
                Message::new(slot_id, cycle_count, channel, payload)
                    .with_flags(FrameFlags::from_bits(flags))
            })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(msg in valid_message()) {
            let frame = decode(&encode(&msg).unwrap()).unwrap();
            prop_assert_eq!(frame.to_message(), msg);
        }

        #[test]
        fn single_bit_flip_is_detected(msg in valid_message(), bit in any::<prop::sample::Index>()) {
            let mut bytes = encode(&msg).unwrap();
            let covered_bits = (bytes.len() - TRAILER_LENGTH) * 8;
            let bit = bit.index(covered_bits);
            bytes[bit / 8] ^= 0x80 >> (bit % 8);
            prop_assert!(decode(&bytes).is_err());
        }
    }
}
