//! Bus configuration and advisory validation
//!
//! A [`BusConfig`] may deliberately break FlexRay limits for exploratory
//! simulation, so validation reports [`ConfigIssue`]s instead of failing.

use std::fmt;
use std::iter::FusedIterator;

use thiserror::Error;

use crate::frame::{HEADER_LENGTH, TRAILER_LENGTH};
use crate::{Channel, MAX_SLOT_ID};

/// Transmission start sequence length in bits
pub const TSS_BITS: u64 = 3;
/// Frame start sequence length in bits
pub const FSS_BITS: u64 = 1;
/// Bits per frame byte including the byte start sequence
pub const BITS_PER_BYTE: u64 = 10;
/// Frame end sequence length in bits
pub const FES_BITS: u64 = 2;
/// Channel idle delimiter length in bits
pub const CHANNEL_IDLE_DELIMITER_BITS: u64 = 11;

/// Longest communication cycle permitted, in microseconds
pub const MAX_CYCLE_DURATION_US: u32 = 16_000;
/// Recommended minimum network idle time, in microseconds
pub const RECOMMENDED_NIT_US: u32 = 1_000;
/// Highest baud rate considered plausible
pub const MAX_BAUD_RATE: u32 = 100_000_000;
/// Baud rates defined for FlexRay controllers
pub const STANDARD_BAUD_RATES: [u32; 3] = [2_500_000, 5_000_000, 10_000_000];

/// Enabled channels as a bitfield (bit0 = A, bit1 = B)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ChannelMask(u8);

impl ChannelMask {
    pub const NONE: ChannelMask = ChannelMask(0);
    pub const A: ChannelMask = ChannelMask(Channel::BIT_A);
    pub const B: ChannelMask = ChannelMask(Channel::BIT_B);
    pub const BOTH: ChannelMask = ChannelMask(Channel::BIT_A | Channel::BIT_B);

    /// Wrap raw mask bits, including any unknown ones
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when no channel is enabled
    pub fn is_empty(self) -> bool {
        self.0 & Self::BOTH.0 == 0
    }

    /// Whether every channel in the selection is enabled
    pub fn enables(self, channel: Channel) -> bool {
        self.0 & channel.bits() == channel.bits()
    }
}

impl Default for ChannelMask {
    fn default() -> Self {
        Self::BOTH
    }
}

impl From<Channel> for ChannelMask {
    fn from(channel: Channel) -> Self {
        Self(channel.bits())
    }
}

/// Static timing and topology parameters of a FlexRay cluster
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BusConfig {
    /// Bit rate in bits per second
    pub baud_rate: u32,
    /// Number of static slots
    pub static_slots: u16,
    /// Number of dynamic slots (minislots)
    pub dynamic_slots: u16,
    /// Communication cycle length in microseconds
    pub cycle_duration_us: u32,
    /// Enabled channels
    pub channel_mask: ChannelMask,
    /// Length of one static slot in microseconds
    pub static_slot_duration_us: u32,
    /// Nominal length of one minislot in microseconds
    pub minislot_duration_us: u32,
    /// Network idle time at the end of each cycle, in microseconds
    pub network_idle_time_us: u32,
    /// Static frame payload length in 16-bit words
    pub payload_length_words: u8,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            baud_rate: 10_000_000,
            static_slots: 64,
            dynamic_slots: 128,
            cycle_duration_us: 5_000,
            channel_mask: ChannelMask::BOTH,
            static_slot_duration_us: 50,
            minislot_duration_us: 5,
            network_idle_time_us: 1_000,
            // 32 payload bytes fit a 50 us slot at 10 Mbit/s
            payload_length_words: 16,
        }
    }
}

impl BusConfig {
    /// Create a configuration with default slot timing
    pub fn new(
        baud_rate: u32,
        static_slots: u16,
        dynamic_slots: u16,
        cycle_duration_us: u32,
        channel_mask: ChannelMask,
    ) -> Self {
        Self {
            baud_rate,
            static_slots,
            dynamic_slots,
            cycle_duration_us,
            channel_mask,
            ..Default::default()
        }
    }

    /// Static plus dynamic slot count
    pub fn total_slots(&self) -> u32 {
        u32::from(self.static_slots) + u32::from(self.dynamic_slots)
    }

    /// Duration of one bit in nanoseconds, `None` for a zero baud rate
    pub fn bit_time_ns(&self) -> Option<u64> {
        (self.baud_rate > 0).then(|| 1_000_000_000 / u64::from(self.baud_rate))
    }

    /// Bits on the wire for a frame carrying `payload_len` bytes
    pub fn frame_bits(payload_len: usize) -> u64 {
        let bytes = (HEADER_LENGTH + payload_len + TRAILER_LENGTH) as u64;
        TSS_BITS + FSS_BITS + bytes * BITS_PER_BYTE + FES_BITS + CHANNEL_IDLE_DELIMITER_BITS
    }

    /// Time to transmit one static frame, in nanoseconds (rounded up)
    pub fn static_frame_time_ns(&self) -> Option<u64> {
        if self.baud_rate == 0 {
            return None;
        }
        let bits = Self::frame_bits(usize::from(self.payload_length_words) * 2);
        Some((bits * 1_000_000_000).div_ceil(u64::from(self.baud_rate)))
    }

    /// Time the configured segments need per cycle, in microseconds
    pub fn required_cycle_us(&self) -> u64 {
        u64::from(self.static_slots) * u64::from(self.static_slot_duration_us)
            + u64::from(self.dynamic_slots) * u64::from(self.minislot_duration_us)
            + u64::from(self.network_idle_time_us)
    }

    /// Lazily check the configuration; an empty sequence means valid
    pub fn validate(&self) -> ConfigIssues<'_> {
        ConfigIssues {
            config: self,
            checks: CHECKS.iter(),
        }
    }

    /// True when [`validate`](Self::validate) yields nothing
    pub fn is_valid(&self) -> bool {
        self.validate().next().is_none()
    }
}

/// Check a configuration; see [`BusConfig::validate`]
pub fn validate(config: &BusConfig) -> ConfigIssues<'_> {
    config.validate()
}

/// Advisory diagnostic about a bus configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    #[error("channel mask enables neither channel A nor channel B")]
    NoChannelEnabled,

    #[error("channel mask 0b{0:08b} sets bits beyond channels A and B")]
    UnknownChannelBits(u8),

    #[error("no static or dynamic slots configured")]
    NoSlots,

    #[error("{total} slots exceed the {max} available slot ids", max = MAX_SLOT_ID)]
    TooManySlots { total: u32 },

    #[error("baud rate {0} bit/s outside 1..={max}", max = MAX_BAUD_RATE)]
    BaudRateOutOfRange(u32),

    #[error("baud rate {0} bit/s is not a standard FlexRay rate (2.5, 5 or 10 Mbit/s)")]
    NonStandardBaudRate(u32),

    #[error("cycle duration {0}us outside 1..={max}us", max = MAX_CYCLE_DURATION_US)]
    CycleDurationOutOfRange(u32),

    #[error("static slot ({slot_us}us) shorter than a static frame ({frame_ns}ns)")]
    StaticSlotTooShort { slot_us: u32, frame_ns: u64 },

    #[error("segments need {required_us}us but the cycle lasts {cycle_us}us")]
    CycleOverrun { required_us: u64, cycle_us: u32 },

    #[error("network idle time ({0}us) is less than recommended {min}us", min = RECOMMENDED_NIT_US)]
    NetworkIdleTimeShort(u32),
}

type Check = fn(&BusConfig) -> Option<ConfigIssue>;

const CHECKS: &[Check] = &[
    check_channel_mask,
    check_unknown_channel_bits,
    check_slot_counts,
    check_slot_id_space,
    check_baud_range,
    check_standard_baud,
    check_cycle_duration,
    check_static_slot_fits_frame,
    check_cycle_fits_segments,
    check_network_idle_time,
];

fn check_channel_mask(config: &BusConfig) -> Option<ConfigIssue> {
    config
        .channel_mask
        .is_empty()
        .then_some(ConfigIssue::NoChannelEnabled)
}

fn check_unknown_channel_bits(config: &BusConfig) -> Option<ConfigIssue> {
    let bits = config.channel_mask.bits();
    (bits & !ChannelMask::BOTH.bits() != 0).then_some(ConfigIssue::UnknownChannelBits(bits))
}

fn check_slot_counts(config: &BusConfig) -> Option<ConfigIssue> {
    (config.total_slots() == 0).then_some(ConfigIssue::NoSlots)
}

fn check_slot_id_space(config: &BusConfig) -> Option<ConfigIssue> {
    let total = config.total_slots();
    (total > u32::from(MAX_SLOT_ID)).then_some(ConfigIssue::TooManySlots { total })
}

fn check_baud_range(config: &BusConfig) -> Option<ConfigIssue> {
    (config.baud_rate == 0 || config.baud_rate > MAX_BAUD_RATE)
        .then_some(ConfigIssue::BaudRateOutOfRange(config.baud_rate))
}

fn check_standard_baud(config: &BusConfig) -> Option<ConfigIssue> {
    let plausible = config.baud_rate > 0 && config.baud_rate <= MAX_BAUD_RATE;
    (plausible && !STANDARD_BAUD_RATES.contains(&config.baud_rate))
        .then_some(ConfigIssue::NonStandardBaudRate(config.baud_rate))
}

fn check_cycle_duration(config: &BusConfig) -> Option<ConfigIssue> {
    (config.cycle_duration_us == 0 || config.cycle_duration_us > MAX_CYCLE_DURATION_US)
        .then_some(ConfigIssue::CycleDurationOutOfRange(config.cycle_duration_us))
}

fn check_static_slot_fits_frame(config: &BusConfig) -> Option<ConfigIssue> {
    if config.static_slots == 0 {
        return None;
    }
    let frame_ns = config.static_frame_time_ns()?;
    (frame_ns > u64::from(config.static_slot_duration_us) * 1_000).then_some(
        ConfigIssue::StaticSlotTooShort {
            slot_us: config.static_slot_duration_us,
            frame_ns,
        },
    )
}

fn check_cycle_fits_segments(config: &BusConfig) -> Option<ConfigIssue> {
    let required_us = config.required_cycle_us();
    (required_us > u64::from(config.cycle_duration_us)).then_some(ConfigIssue::CycleOverrun {
        required_us,
        cycle_us: config.cycle_duration_us,
    })
}

fn check_network_idle_time(config: &BusConfig) -> Option<ConfigIssue> {
    (config.network_idle_time_us < RECOMMENDED_NIT_US)
        .then_some(ConfigIssue::NetworkIdleTimeShort(config.network_idle_time_us))
}

/// Lazy sequence of [`ConfigIssue`]s for one configuration
///
/// Clone it to walk the checks again from the start.
#[derive(Clone)]
pub struct ConfigIssues<'a> {
    config: &'a BusConfig,
    checks: std::slice::Iter<'static, Check>,
}

impl Iterator for ConfigIssues<'_> {
    type Item = ConfigIssue;

    fn next(&mut self) -> Option<Self::Item> {
        let config = self.config;
        self.checks.find_map(|check| check(config))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.checks.len()))
    }
}

impl FusedIterator for ConfigIssues<'_> {}

impl fmt::Debug for ConfigIssues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigIssues")
            .field("remaining_checks", &self.checks.len())
            .finish()
    }
}
