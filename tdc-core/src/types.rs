//! Core types for TDC frame and event data.
//!
//! This module defines the raw wire frame, the decoded edge event and the
//! protocol constants shared by the decoder, the command encoder and the
//! synthetic generator.

use std::fmt;

/// Number of physical input channels on the device.
pub const N_CHANNELS: usize = 4;

/// Number of bytes in one wire frame.
pub const FRAME_LEN: usize = 5;

/// Width of the coarse hardware counter carried in each frame.
pub const COARSE_TIME_BITS: u32 = 24;

/// Largest coarse counter value representable on the wire.
pub const COARSE_TIME_MAX: u32 = (1 << COARSE_TIME_BITS) - 1;

/// Shift applied to the overflow count when extending the coarse counter.
pub const OVERFLOW_SHIFT: u32 = 24;

/// Sub-sample bits per coarse step; one bit per nanosecond.
pub const SAMPLE_BITS: u32 = 8;

/// Duration of one coarse counter step in nanoseconds.
pub const COARSE_STEP_NS: u64 = 8;

/// Exclusive upper bound of the 12-bit discriminator threshold.
pub const THRESHOLD_RANGE: i32 = 4096;

/// One decoded wire frame.
///
/// Produced by the frame decoder and consumed by exactly one channel update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    /// Channel index (0-3 after validation)
    pub channel: u8,
    /// Coarse counter value in units of 8 ns
    pub coarse_time: u32,
    /// Level bitmap, MSB is the earliest nanosecond
    pub sample: u8,
}

impl RawFrame {
    /// Creates a new raw frame.
    #[inline]
    pub fn new(channel: u8, coarse_time: u32, sample: u8) -> Self {
        Self {
            channel,
            coarse_time,
            sample,
        }
    }
}

/// Direction of a level transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Edge {
    /// High to low (0)
    Falling = 0,
    /// Low to high (1)
    Rising = 1,
}

impl Edge {
    /// Returns `true` for a rising edge.
    #[inline]
    pub fn is_rising(self) -> bool {
        self == Edge::Rising
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// A decoded edge event.
///
/// Every logical rising or falling transition of a channel produces exactly
/// one event, including transitions that fall on a frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Channel the edge was seen on (0-3)
    pub channel: u8,
    /// Timestamp in nanoseconds, extended across counter overflow
    pub time_ns: u64,
    /// Transition direction
    pub edge: Edge,
    /// Sample bitmap the edge was detected in
    pub sample: u8,
    /// Nanoseconds since the previous event on the same channel
    pub dt_ns: i64,
}

impl Event {
    /// Creates a new event.
    #[inline]
    pub fn new(channel: u8, time_ns: u64, edge: Edge, sample: u8, dt_ns: i64) -> Self {
        Self {
            channel,
            time_ns,
            edge,
            sample,
            dt_ns,
        }
    }

    /// Position of the edge inside its coarse step (0-7).
    #[inline]
    pub fn sub_sample(&self) -> usize {
        (self.time_ns % COARSE_STEP_NS) as usize
    }
}

/// Set of channels, bit `i` selects channel `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ChannelMask(u8);

impl ChannelMask {
    /// No channel selected.
    pub const NONE: Self = Self(0);
    /// Every channel selected.
    pub const ALL: Self = Self((1 << N_CHANNELS) - 1);

    /// Creates a mask, ignoring bits above the last channel.
    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn contains(self, channel: usize) -> bool {
        channel < N_CHANNELS && self.0 & (1 << channel) != 0
    }

    /// Returns a copy with `channel` selected; out-of-range channels are ignored.
    #[inline]
    pub fn with(self, channel: usize) -> Self {
        if channel < N_CHANNELS {
            Self(self.0 | (1 << channel))
        } else {
            self
        }
    }

    /// Channels not in this mask.
    #[inline]
    pub fn complement(self) -> Self {
        Self(!self.0 & Self::ALL.0)
    }

    /// Iterates over the selected channel indices in ascending order.
    pub fn channels(self) -> impl Iterator<Item = usize> {
        (0..N_CHANNELS).filter(move |&ch| self.contains(ch))
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in 0..N_CHANNELS {
            f.write_str(if self.contains(ch) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Extends a raw coarse counter value with an overflow count into nanoseconds.
#[inline]
pub fn extended_time_ns(coarse_time: u32, overflow_count: u64) -> u64 {
    (coarse_time as u64 + (overflow_count << OVERFLOW_SHIFT)) * COARSE_STEP_NS
}
