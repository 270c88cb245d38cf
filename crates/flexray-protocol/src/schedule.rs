//! Cycle scheduling model
//!
//! Maps slot ids to their position inside a communication cycle and decides
//! whether a (slot, cycle, channel) triple may be used on a given bus. Nothing
//! here keeps state: every answer is a function of the [`BusConfig`].
//!
//! Slots `1..=S` are static and have equal, fixed durations. Slots
//! `S+1..=S+D` are dynamic minislots; their duration is the nominal minislot
//! length and only bounds what an event-driven transmission may use.

use std::fmt;
use std::time::Duration;

use crate::config::BusConfig;
use crate::error::{LegalityError, SlotOutOfRangeError};
use crate::{Channel, MAX_CYCLE_COUNT, MAX_SLOT_ID};

/// Portion of the communication cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Segment {
    /// Fixed-duration, fixed-position slots
    Static,
    /// Event-driven minislots
    Dynamic,
    /// No data transmission (trailing gap and network idle time)
    Idle,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Segment::Static => "static",
            Segment::Dynamic => "dynamic",
            Segment::Idle => "idle",
        })
    }
}

/// Where a slot sits in the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssignment {
    pub slot_id: u16,
    pub segment: Segment,
    /// Offset from the start of the cycle
    pub start: Duration,
    /// Slot length; an upper bound for dynamic slots
    pub duration: Duration,
}

impl SlotAssignment {
    /// Offset at which the slot ends
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Start and length of one span inside the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Duration,
    pub duration: Duration,
}

impl Span {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    pub fn contains(&self, offset: Duration) -> bool {
        offset >= self.start && offset < self.end()
    }
}

/// Segment boundaries derived from a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleLayout {
    static_slots: u16,
    dynamic_slots: u16,
    static_slot: Duration,
    minislot: Duration,
    network_idle_time: Duration,
    cycle: Duration,
}

impl CycleLayout {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            static_slots: config.static_slots,
            dynamic_slots: config.dynamic_slots,
            static_slot: Duration::from_micros(u64::from(config.static_slot_duration_us)),
            minislot: Duration::from_micros(u64::from(config.minislot_duration_us)),
            network_idle_time: Duration::from_micros(u64::from(config.network_idle_time_us)),
            cycle: Duration::from_micros(u64::from(config.cycle_duration_us)),
        }
    }

    /// Length of one communication cycle
    pub fn cycle_duration(&self) -> Duration {
        self.cycle
    }

    /// Highest slot id covered by the static and dynamic segments, capped
    /// at the largest id the frame header can carry
    pub fn max_slot(&self) -> u32 {
        let total = u32::from(self.static_slots) + u32::from(self.dynamic_slots);
        total.min(u32::from(MAX_SLOT_ID))
    }

    pub fn static_segment(&self) -> Span {
        Span {
            start: Duration::ZERO,
            duration: self.static_slot * u32::from(self.static_slots),
        }
    }

    pub fn dynamic_segment(&self) -> Span {
        Span {
            start: self.static_segment().end(),
            duration: self.minislot * u32::from(self.dynamic_slots),
        }
    }

    /// Everything after the dynamic segment up to the end of the cycle
    pub fn idle_segment(&self) -> Span {
        let start = self.dynamic_segment().end();
        Span {
            start,
            duration: self.cycle.saturating_sub(start),
        }
    }

    /// Network idle time at the tail of the cycle
    pub fn network_idle_time(&self) -> Span {
        let start = self.cycle.saturating_sub(self.network_idle_time);
        Span {
            start,
            duration: self.cycle - start,
        }
    }

    /// Segment containing a cycle offset, `None` past the end of the cycle
    pub fn segment_at(&self, offset: Duration) -> Option<Segment> {
        if offset >= self.cycle {
            None
        } else if self.static_segment().contains(offset) {
            Some(Segment::Static)
        } else if self.dynamic_segment().contains(offset) {
            Some(Segment::Dynamic)
        } else {
            Some(Segment::Idle)
        }
    }

    /// Segment a slot id belongs to, `None` when out of range
    pub fn segment_of(&self, slot_id: u16) -> Option<Segment> {
        let slot = u32::from(slot_id);
        if slot == 0 || slot > self.max_slot() {
            None
        } else if slot <= u32::from(self.static_slots) {
            Some(Segment::Static)
        } else {
            Some(Segment::Dynamic)
        }
    }

    /// Timing of a slot within the cycle
    pub fn slot(&self, slot_id: u16) -> Result<SlotAssignment, SlotOutOfRangeError> {
        let out_of_range = SlotOutOfRangeError {
            slot_id,
            max_slot: self.max_slot(),
        };
        let index = u32::from(slot_id).checked_sub(1).ok_or(out_of_range)?;

        match self.segment_of(slot_id).ok_or(out_of_range)? {
            Segment::Static => Ok(SlotAssignment {
                slot_id,
                segment: Segment::Static,
                start: self.static_slot * index,
                duration: self.static_slot,
            }),
            Segment::Dynamic => {
                let minislot_index = index - u32::from(self.static_slots);
                Ok(SlotAssignment {
                    slot_id,
                    segment: Segment::Dynamic,
                    start: self.dynamic_segment().start + self.minislot * minislot_index,
                    duration: self.minislot,
                })
            }
            Segment::Idle => Err(out_of_range),
        }
    }

    /// Amount by which the segments overrun the cycle, if they do
    pub fn timing_violation(&self) -> Option<Duration> {
        let required = self.dynamic_segment().end() + self.network_idle_time;
        (required > self.cycle).then(|| required - self.cycle)
    }

    /// Share of the cycle taken by the static segment, in percent (capped at 100)
    pub fn static_utilization(&self) -> f64 {
        if self.cycle.is_zero() {
            return 100.0;
        }
        let share = self.static_segment().duration.as_secs_f64() / self.cycle.as_secs_f64();
        (share * 100.0).min(100.0)
    }
}

/// Timing of a slot within the cycle for a configuration
pub fn slot_offset(config: &BusConfig, slot_id: u16) -> Result<SlotAssignment, SlotOutOfRangeError> {
    CycleLayout::new(config).slot(slot_id)
}

/// Check a (slot, cycle, channel) triple, naming the first rule it breaks
pub fn check_legal(
    config: &BusConfig,
    slot_id: u16,
    cycle_count: u8,
    channel: Channel,
) -> Result<SlotAssignment, LegalityError> {
    check_legal_in(&CycleLayout::new(config), config, slot_id, cycle_count, channel)
}

/// [`check_legal`] against a layout derived ahead of time
pub fn check_legal_in(
    layout: &CycleLayout,
    config: &BusConfig,
    slot_id: u16,
    cycle_count: u8,
    channel: Channel,
) -> Result<SlotAssignment, LegalityError> {
    let assignment = layout.slot(slot_id)?;
    if cycle_count > MAX_CYCLE_COUNT {
        return Err(LegalityError::CycleOutOfRange(cycle_count));
    }
    if !config.channel_mask.enables(channel) {
        return Err(LegalityError::ChannelDisabled {
            channel,
            mask: config.channel_mask.bits(),
        });
    }
    Ok(assignment)
}

/// Whether a slot may be used in a cycle on a channel
pub fn is_legal(config: &BusConfig, slot_id: u16, cycle_count: u8, channel: Channel) -> bool {
    check_legal(config, slot_id, cycle_count, channel).is_ok()
}

/// Logical time of a slot's start, counted from the start of cycle 0
pub fn logical_time(
    config: &BusConfig,
    slot_id: u16,
    cycle_count: u8,
) -> Result<Duration, LegalityError> {
    if cycle_count > MAX_CYCLE_COUNT {
        return Err(LegalityError::CycleOutOfRange(cycle_count));
    }
    let layout = CycleLayout::new(config);
    let assignment = layout.slot(slot_id)?;
    Ok(layout.cycle_duration() * u32::from(cycle_count) + assignment.start)
}
