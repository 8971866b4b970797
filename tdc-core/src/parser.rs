#![allow(clippy::unusual_byte_groupings)]
//! Low-level packing and unpacking of 5-byte TDC frames.
//!
//! Every field is read and written through the named bit-range helpers
//! [`extract`] and [`insert`] so the layouts below can be audited in one place.
//!
//! ```text
//! byte0: 1 CCC SSSS      header marker, channel, sample bits 7-4
//! byte1: 0 ssss TTT      sample bits 3-0, coarse bits 23-21
//! byte2: 0 TTTTTTT       coarse bits 20-14
//! byte3: 0 TTTTTTT       coarse bits 13-7
//! byte4: 0 TTTTTTT       coarse bits 6-0
//! ```

use crate::types::{RawFrame, COARSE_TIME_MAX, FRAME_LEN, N_CHANNELS};
use thiserror::Error;

/// Errors produced while packing or unpacking a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Impossible channel number {0}")]
    InvalidChannel(u8),

    #[error("Value {value} does not fit the {field} field")]
    FieldOverflow { field: &'static str, value: u32 },
}

/// A contiguous run of bits inside an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRange {
    /// Index of the least significant bit
    pub lo: u32,
    /// Number of bits
    pub width: u32,
}

impl BitRange {
    pub const fn new(lo: u32, width: u32) -> Self {
        Self { lo, width }
    }

    #[inline]
    pub const fn mask(self) -> u32 {
        (1 << self.width) - 1
    }
}

/// Reads the bits selected by `range` from `value`, right-aligned.
#[inline]
pub fn extract(value: u32, range: BitRange) -> u32 {
    (value >> range.lo) & range.mask()
}

/// Places the low `range.width` bits of `field` at `range` and returns them.
#[inline]
pub fn insert(field: u32, range: BitRange) -> u32 {
    (field & range.mask()) << range.lo
}

// ============================================================================
// byte0: [7] marker | [6:4] channel | [3:0] sample high nibble
// ============================================================================

/// Header marker bit, set only on the first byte of a frame.
pub const HEADER_MARKER: BitRange = BitRange::new(7, 1);
/// Channel field in byte0.
pub const B0_CHANNEL: BitRange = BitRange::new(4, 3);
/// Sample bits 7-4 in byte0.
pub const B0_SAMPLE_HIGH: BitRange = BitRange::new(0, 4);

// ============================================================================
// byte1: [7] 0 | [6:3] sample low nibble | [2:0] coarse bits 23-21
// ============================================================================

/// Sample bits 3-0 in byte1.
pub const B1_SAMPLE_LOW: BitRange = BitRange::new(3, 4);
/// Coarse time bits 23-21 in byte1.
pub const B1_COARSE: BitRange = BitRange::new(0, 3);

// ============================================================================
// byte2..byte4: [7] 0 | [6:0] coarse time payload
// ============================================================================

/// Seven payload bits of the trailing bytes.
pub const PAYLOAD: BitRange = BitRange::new(0, 7);

/// Where each wire chunk lives inside the 24-bit coarse counter.
const COARSE_B1: BitRange = BitRange::new(21, 3);
const COARSE_B2: BitRange = BitRange::new(14, 7);
const COARSE_B3: BitRange = BitRange::new(7, 7);
const COARSE_B4: BitRange = BitRange::new(0, 7);

/// Where each wire nibble lives inside the sample byte.
const SAMPLE_HIGH: BitRange = BitRange::new(4, 4);
const SAMPLE_LOW: BitRange = BitRange::new(0, 4);

const CHANNEL_MAX: u32 = (1 << B0_CHANNEL.width) - 1;

/// Returns `true` if `byte` carries the frame header marker.
#[inline]
pub fn is_header(byte: u8) -> bool {
    extract(byte as u32, HEADER_MARKER) == 1
}

/// Extracts the channel field, without range validation.
#[inline]
pub fn frame_get_channel(bytes: &[u8; FRAME_LEN]) -> u8 {
    extract(bytes[0] as u32, B0_CHANNEL) as u8
}

/// Extracts the 8-bit sample bitmap.
#[inline]
pub fn frame_get_sample(bytes: &[u8; FRAME_LEN]) -> u8 {
    let high = extract(bytes[0] as u32, B0_SAMPLE_HIGH);
    let low = extract(bytes[1] as u32, B1_SAMPLE_LOW);
    (insert(high, SAMPLE_HIGH) | insert(low, SAMPLE_LOW)) as u8
}

/// Extracts the 24-bit coarse counter.
#[inline]
pub fn frame_get_coarse_time(bytes: &[u8; FRAME_LEN]) -> u32 {
    insert(extract(bytes[1] as u32, B1_COARSE), COARSE_B1)
        | insert(extract(bytes[2] as u32, PAYLOAD), COARSE_B2)
        | insert(extract(bytes[3] as u32, PAYLOAD), COARSE_B3)
        | insert(extract(bytes[4] as u32, PAYLOAD), COARSE_B4)
}

/// Unpacks a header-aligned frame.
///
/// Frames addressing a channel the device does not have are rejected with
/// [`FrameError::InvalidChannel`] so they can never index channel state.
pub fn unpack_frame(bytes: &[u8; FRAME_LEN]) -> Result<RawFrame, FrameError> {
    let channel = frame_get_channel(bytes);
    if channel as usize >= N_CHANNELS {
        return Err(FrameError::InvalidChannel(channel));
    }

    Ok(RawFrame::new(
        channel,
        frame_get_coarse_time(bytes),
        frame_get_sample(bytes),
    ))
}

/// Packs a frame into its 5-byte wire form.
///
/// Channels 4-7 are representable on the wire and are accepted here so that
/// invalid frames can be produced on purpose.
pub fn pack_frame(frame: &RawFrame) -> Result<[u8; FRAME_LEN], FrameError> {
    if frame.channel as u32 > CHANNEL_MAX {
        return Err(FrameError::FieldOverflow {
            field: "channel",
            value: frame.channel as u32,
        });
    }
    if frame.coarse_time > COARSE_TIME_MAX {
        return Err(FrameError::FieldOverflow {
            field: "coarse_time",
            value: frame.coarse_time,
        });
    }

    let sample = frame.sample as u32;
    let coarse = frame.coarse_time;
    Ok([
        (insert(1, HEADER_MARKER)
            | insert(frame.channel as u32, B0_CHANNEL)
            | insert(extract(sample, SAMPLE_HIGH), B0_SAMPLE_HIGH)) as u8,
        (insert(extract(sample, SAMPLE_LOW), B1_SAMPLE_LOW)
            | insert(extract(coarse, COARSE_B1), B1_COARSE)) as u8,
        insert(extract(coarse, COARSE_B2), PAYLOAD) as u8,
        insert(extract(coarse, COARSE_B3), PAYLOAD) as u8,
        insert(extract(coarse, COARSE_B4), PAYLOAD) as u8,
    ])
}
