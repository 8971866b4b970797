//! Outbound control commands.
//!
//! Commands are single bytes whose high nibble selects a register:
//!
//! ```text
//! enable mask:  1111 EEEE             E = bit i enables channel i
//! threshold:    RRRR LLLL  x3         R = channel*3 + {0,1,2}
//!                                     L = threshold bits 0-3, 4-7, 8-11
//! ```
//!
//! Encoders are pure; writing the bytes and the matching decoder-side
//! bookkeeping happen in [`crate::device::TdcSession`].

use crate::types::{ChannelMask, N_CHANNELS, THRESHOLD_RANGE};
use std::fmt;
use std::io;
use thiserror::Error;

/// Errors produced while building or sending a command.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid channel number {0}, must be in range [0,{max}]", max = N_CHANNELS - 1)]
    InvalidChannel(i64),

    #[error("Invalid threshold {0}, must be in range [0,{max}]", max = THRESHOLD_RANGE - 1)]
    ThresholdOutOfRange(i64),

    #[error("Invalid enable pattern: {0}")]
    InvalidPattern(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Register tag of the enable-mask command.
pub const ENABLE_TAG: u8 = 0xF;

/// Registers per channel used by the threshold command.
pub const THRESHOLD_REGISTERS: usize = 3;

/// Encodes the channel enable command.
#[inline]
pub fn encode_enable(mask: ChannelMask) -> u8 {
    (ENABLE_TAG << 4) | mask.bits()
}

/// Encodes the three threshold register writes for `channel`.
///
/// Nothing is produced for an out-of-range channel or threshold.
pub fn encode_threshold(
    channel: i64,
    threshold: i64,
) -> Result<[u8; THRESHOLD_REGISTERS], CommandError> {
    if !(0..N_CHANNELS as i64).contains(&channel) {
        return Err(CommandError::InvalidChannel(channel));
    }
    if !(0..THRESHOLD_RANGE as i64).contains(&threshold) {
        return Err(CommandError::ThresholdOutOfRange(threshold));
    }

    let base = channel as u8 * THRESHOLD_REGISTERS as u8;
    let nibble = |k: u8| ((base + k) << 4) | ((threshold >> (4 * k)) & 0xF) as u8;
    Ok([nibble(0), nibble(1), nibble(2)])
}

/// Problem with one character of an enable pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternDiagnostic {
    /// No character for this channel.
    Missing { channel: usize },
    /// Character other than `0` or `1`.
    Malformed { channel: usize, found: char },
}

impl fmt::Display for PatternDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { channel } => {
                write!(f, "no enable bit for channel {channel}, must be '0' or '1'")
            }
            Self::Malformed { channel, found } => write!(
                f,
                "invalid enable bit {found:?} for channel {channel}, must be '0' or '1'"
            ),
        }
    }
}

/// Result of parsing a textual enable pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPattern {
    /// Channels whose character was `1`
    pub mask: ChannelMask,
    /// One entry per character that could not be used
    pub diagnostics: Vec<PatternDiagnostic>,
}

impl ParsedPattern {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Parses a pattern such as `"0110"`; character `i` controls channel `i`.
///
/// Bad characters are reported individually and leave their channel
/// disabled; the remaining characters still apply. Characters after the
/// fourth are ignored.
pub fn parse_enable_pattern(pattern: &str) -> ParsedPattern {
    let mut mask = ChannelMask::NONE;
    let mut diagnostics = Vec::new();
    let mut chars = pattern.chars();

    for channel in 0..N_CHANNELS {
        match chars.next() {
            Some('1') => mask = mask.with(channel),
            Some('0') => {}
            Some(found) => diagnostics.push(PatternDiagnostic::Malformed { channel, found }),
            None => diagnostics.push(PatternDiagnostic::Missing { channel }),
        }
    }

    ParsedPattern { mask, diagnostics }
}

/// Parses a `CHANNEL:THRESHOLD` pair and validates both fields.
pub fn parse_threshold_spec(spec: &str) -> Result<(u8, u16), CommandError> {
    let (channel, threshold) = spec
        .split_once(':')
        .ok_or_else(|| CommandError::InvalidPattern(format!("expected CHANNEL:VALUE, got {spec:?}")))?;
    let channel: i64 = channel
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidPattern(format!("bad channel in {spec:?}")))?;
    let threshold: i64 = threshold
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidPattern(format!("bad threshold in {spec:?}")))?;

    encode_threshold(channel, threshold)?;
    Ok((channel as u8, threshold as u16))
}
