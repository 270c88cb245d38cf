//! Error types for FlexRay frame coding, scheduling and signal packing

use thiserror::Error;

use crate::Channel;

/// Errors raised while encoding a message into a frame
///
/// These are caller-side bound violations; the message never reaches the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidFrameError {
    /// Slot id outside 1..=2047
    #[error("invalid slot id {0}: must be within 1..=2047")]
    SlotId(u16),

    /// Cycle count outside 0..=63
    #[error("invalid cycle count {0}: must be within 0..=63")]
    CycleCount(u8),

    /// Payload longer than 254 bytes
    #[error("payload too long: {0} bytes (maximum 254)")]
    PayloadTooLong(usize),
}

/// Errors raised while decoding bytes into a frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedFrameError {
    /// Fewer bytes than header plus trailer
    #[error("frame too short: {len} bytes (minimum 8)")]
    TooShort { len: usize },

    /// Header payload length disagrees with the received byte count
    #[error("length mismatch: header declares {declared} payload bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Header declares more payload than a frame can carry
    #[error("declared payload of {0} bytes exceeds 254")]
    PayloadTooLong(usize),

    /// Trailer does not match the CRC recomputed over header and payload
    #[error("CRC mismatch: expected 0x{expected:06X}, got 0x{actual:06X}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Channel bits name neither A nor B
    #[error("invalid channel bits: 0b{0:02b}")]
    InvalidChannel(u8),
}

/// Slot id outside the configured static and dynamic segments
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("slot {slot_id} out of range: configured slots are 1..={max_slot}")]
pub struct SlotOutOfRangeError {
    pub slot_id: u16,
    pub max_slot: u32,
}

/// Reasons a (slot, cycle, channel) triple cannot be used on a bus
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LegalityError {
    #[error(transparent)]
    SlotOutOfRange(#[from] SlotOutOfRangeError),

    #[error("cycle count {0} out of range: must be within 0..=63")]
    CycleOutOfRange(u8),

    /// Requested channel is not enabled in the configured channel mask
    #[error("channel {channel} not enabled by channel mask 0b{mask:02b}")]
    ChannelDisabled { channel: Channel, mask: u8 },
}

/// Errors from the signal pack/unpack layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// Signal byte range falls outside the payload
    #[error("signal '{name}' spans bytes {offset}..{end} but payload has {available} bytes")]
    Range {
        name: String,
        offset: usize,
        end: usize,
        available: usize,
    },

    /// Value cannot be represented by the signal's encoding
    #[error("value {value} does not fit signal '{name}' ({encoding})")]
    ValueOverflow {
        name: String,
        value: i128,
        encoding: String,
    },

    /// Value supplied for a signal the layout does not define
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    /// Two signals claim the same payload bytes
    #[error("signal '{first}' overlaps signal '{second}'")]
    Overlap { first: String, second: String },

    /// Declared byte length differs from the encoding width
    #[error("signal '{name}' declares {length} bytes but its encoding is {width} bytes wide")]
    WidthMismatch {
        name: String,
        length: usize,
        width: usize,
    },

    /// Signal defined twice in one layout
    #[error("signal '{0}' defined more than once")]
    Duplicate(String),

    /// Unparseable encoding format string
    #[error("invalid signal format: {0}")]
    InvalidFormat(String),
}

/// Umbrella error for callers that mix codec, scheduling and signal work
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] InvalidFrameError),

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] MalformedFrameError),

    #[error("illegal slot use: {0}")]
    Illegal(#[from] LegalityError),

    #[error("signal error: {0}")]
    Signal(#[from] SignalError),
}

impl From<SlotOutOfRangeError> for ProtocolError {
    fn from(err: SlotOutOfRangeError) -> Self {
        ProtocolError::Illegal(err.into())
    }
}
