//! Frame synchronizer.
//!
//! Keeps a 5-byte window over the byte stream and slides it one byte at a
//! time until the first byte carries the header marker, so a lost or
//! corrupted byte costs at most one frame.

use crate::parser::{self, FrameError};
use crate::source::{ByteReader, ByteSource, Clock};
use crate::types::{RawFrame, FRAME_LEN};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tracing::{debug, trace};

/// Anything that yields valid raw frames until end of stream.
pub trait FrameSource {
    /// Returns the next frame on a valid channel, or `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> io::Result<Option<RawFrame>>;
}

/// Header-aligned frame reader over a [`ByteReader`].
#[derive(Debug)]
pub struct FrameSync<S, C> {
    reader: ByteReader<S, C>,
    window: [u8; FRAME_LEN],
    skipped_bytes: u64,
    dropped_frames: u64,
}

impl<S: ByteSource, C: Clock> FrameSync<S, C> {
    pub fn new(source: S, clock: C, eof_debounce: Duration) -> Self {
        Self::from_reader(ByteReader::new(source, clock, eof_debounce))
    }

    pub fn from_reader(reader: ByteReader<S, C>) -> Self {
        Self {
            reader,
            window: [0; FRAME_LEN],
            skipped_bytes: 0,
            dropped_frames: 0,
        }
    }

    /// Bytes discarded while hunting for a header marker.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Aligned frames discarded for addressing a non-existent channel.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Reads until `window` holds a header-aligned frame: marker set on
    /// byte0 and clear on the four trailing bytes.
    fn align(&mut self) -> io::Result<bool> {
        if !self.reader.fill(&mut self.window)? {
            return Ok(false);
        }

        loop {
            // A marker inside the tail means byte0 started a broken frame;
            // restart at that marker.
            let shift = if !parser::is_header(self.window[0]) {
                1
            } else {
                match self.window[1..].iter().position(|&b| parser::is_header(b)) {
                    Some(i) => i + 1,
                    None => return Ok(true),
                }
            };

            self.window.copy_within(shift.., 0);
            self.skipped_bytes += shift as u64;
            trace!(
                shift,
                skipped = self.skipped_bytes,
                "frame window misaligned, shifting"
            );
            if !self.reader.fill(&mut self.window[FRAME_LEN - shift..])? {
                return Ok(false);
            }
        }
    }
}

impl<S: ByteSource, C: Clock> FrameSource for FrameSync<S, C> {
    fn next_frame(&mut self) -> io::Result<Option<RawFrame>> {
        loop {
            if !self.align()? {
                return Ok(None);
            }
            match parser::unpack_frame(&self.window) {
                Ok(frame) => return Ok(Some(frame)),
                Err(FrameError::InvalidChannel(channel)) => {
                    self.dropped_frames += 1;
                    debug!(channel, "discarding frame with impossible channel number");
                }
                Err(e) => {
                    debug!(error = %e, "discarding malformed frame");
                    self.dropped_frames += 1;
                }
            }
        }
    }
}

/// Frames already in memory, for feeding the decoder directly.
impl FrameSource for VecDeque<RawFrame> {
    fn next_frame(&mut self) -> io::Result<Option<RawFrame>> {
        Ok(self.pop_front())
    }
}
