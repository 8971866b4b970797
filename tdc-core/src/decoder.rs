//! Stateful edge reconstruction.
//!
//! This module turns raw frames into edge events. Each channel keeps the
//! last sample bitmap, a cursor into it and an overflow count for the coarse
//! counter. Edges are found either between two adjacent bits of one sample
//! or between the last bit of one frame and the first bit of the next.

use crate::calibration::Calibrator;
use crate::sync::{FrameSource, FrameSync};
use crate::source::{SystemClock, DEFAULT_EOF_DEBOUNCE};
use crate::types::{extended_time_ns, ChannelMask, Edge, Event, RawFrame, N_CHANNELS};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Cursor value for a freshly loaded sample: bits 7..0 are all pending.
const CURSOR_START: u8 = 7;

/// Sample bitmaps with no transition inside them.
const ALL_HIGH: u8 = 0xFF;
const ALL_LOW: u8 = 0x00;

/// Reconstruction state of one input channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    coarse_time: u32,
    overflow_count: u64,
    sample: u8,
    sample_cursor: u8,
    previous_event_time: u64,
}

impl ChannelState {
    /// Last raw coarse counter value seen.
    pub fn coarse_time(&self) -> u32 {
        self.coarse_time
    }

    /// Coarse counter wraps since the channel was last (re-)enabled.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Last sample bitmap.
    pub fn sample(&self) -> u8 {
        self.sample
    }

    /// Next unprocessed bit of [`sample`](Self::sample); 0 when done.
    pub fn sample_cursor(&self) -> u8 {
        self.sample_cursor
    }

    /// Timestamp of the last emitted event.
    pub fn previous_event_time(&self) -> u64 {
        self.previous_event_time
    }

    /// Logic level at the current scan position.
    pub fn level(&self) -> bool {
        (self.sample >> self.sample_cursor) & 0x01 == 0x01
    }

    #[inline]
    fn emit(&mut self, channel: u8, time_ns: u64, edge: Edge, sample: u8) -> Event {
        let dt_ns = time_ns.wrapping_sub(self.previous_event_time) as i64;
        self.previous_event_time = time_ns;
        Event::new(channel, time_ns, edge, sample, dt_ns)
    }
}

/// Stateful TDC event decoder.
///
/// Owns the four channel states and the timing calibrator. Frames are pulled
/// from any [`FrameSource`] on demand, so a decode step consumes only as
/// much input as needed for the next event.
#[derive(Debug, Clone, Default)]
pub struct TdcDecoder {
    channels: [ChannelState; N_CHANNELS],
    calibration: Calibrator,
}

impl TdcDecoder {
    /// Creates a new decoder with all channels low and no overflow.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all channel state and the calibration histogram.
    pub fn reset(&mut self) {
        self.channels = Default::default();
        self.calibration.reset();
    }

    /// Returns the state of `channel`, or `None` for a channel the device
    /// does not have.
    pub fn channel(&self, channel: u8) -> Option<&ChannelState> {
        self.channels.get(channel as usize)
    }

    /// Current logic level of `channel`.
    pub fn level(&self, channel: u8) -> Option<bool> {
        self.channel(channel).map(ChannelState::level)
    }

    pub fn calibration(&self) -> &Calibrator {
        &self.calibration
    }

    /// Calibrated, dithered timestamp of `event`.
    pub fn smooth_time(&self, event: &Event) -> f64 {
        self.calibration.smooth_time(event)
    }

    /// Clears the overflow count of every channel in `mask`.
    pub fn reset_overflow(&mut self, mask: ChannelMask) {
        for ch in mask.channels() {
            self.channels[ch].overflow_count = 0;
        }
    }

    /// Decodes the next edge event.
    ///
    /// Returns `Ok(None)` once the frame source is exhausted; callers must
    /// stop consuming at that point.
    pub fn next_event<F: FrameSource + ?Sized>(
        &mut self,
        frames: &mut F,
    ) -> Result<Option<Event>, DecodeError> {
        loop {
            if let Some(event) = self.scan_pending() {
                return Ok(Some(event));
            }

            let Some(frame) = frames.next_frame()? else {
                return Ok(None);
            };

            if let Some(event) = self.load_frame(frame) {
                return Ok(Some(event));
            }
        }
    }

    /// Returns an iterator that decodes events from `frames` until the
    /// stream ends.
    pub fn events<'a, F: FrameSource + ?Sized>(&'a mut self, frames: &'a mut F) -> Events<'a, F> {
        Events {
            decoder: self,
            frames,
            done: false,
        }
    }

    /// Decodes every event in an in-memory byte buffer.
    pub fn decode_buffer(&mut self, bytes: &[u8]) -> Result<Vec<Event>, DecodeError> {
        self.decode_reader(bytes)
    }

    /// Decodes every event from a reader that signals end of stream with
    /// zero-byte reads, such as a recorded file.
    pub fn decode_reader<R: Read>(&mut self, reader: R) -> Result<Vec<Event>, DecodeError> {
        let mut frames = FrameSync::new(reader, SystemClock::new(), DEFAULT_EOF_DEBOUNCE);
        self.events(&mut frames).collect()
    }

    /// Decodes a recorded raw file from disk.
    pub fn decode_file<P: AsRef<Path>>(&mut self, path: P) -> Result<Vec<Event>, DecodeError> {
        let file = File::open(path.as_ref())?;
        self.decode_reader(BufReader::new(file))
    }

    /// Continues the intra-sample scan of any channel with pending bits.
    fn scan_pending(&mut self) -> Option<Event> {
        (0..N_CHANNELS).find_map(|ch| self.scan_channel(ch))
    }

    /// Looks at bit pairs (cursor, cursor-1) from the current cursor down.
    #[inline]
    fn scan_channel(&mut self, ch: usize) -> Option<Event> {
        let state = &mut self.channels[ch];
        while state.sample_cursor != 0 {
            // ~~~~____
            //    ^ cursor
            //     ^ cursor-1      window = 0b10, falling
            let window = (state.sample >> (state.sample_cursor - 1)) & 0b11;
            state.sample_cursor -= 1;

            let edge = match window {
                0b01 => Edge::Rising,
                0b10 => Edge::Falling,
                _ => continue,
            };

            let position = CURSOR_START - state.sample_cursor;
            let time_ns =
                extended_time_ns(state.coarse_time, state.overflow_count) + position as u64;
            let event = state.emit(ch as u8, time_ns, edge, state.sample);
            self.calibration.record(ch, position as usize);
            return Some(event);
        }
        None
    }

    /// Stores a new frame and reports an edge on the frame boundary, if any.
    fn load_frame(&mut self, frame: RawFrame) -> Option<Event> {
        let ch = frame.channel as usize;
        let Some(state) = self.channels.get_mut(ch) else {
            warn!(channel = frame.channel, "ignoring frame for nonexistent channel");
            return None;
        };

        if frame.coarse_time == 0 {
            state.overflow_count += 1;
            debug!(
                channel = frame.channel,
                overflow_count = state.overflow_count,
                "coarse counter overflow"
            );
        }

        let was_high = state.sample & 0x01 == 0x01;
        let is_high = frame.sample & 0x80 == 0x80;
        state.coarse_time = frame.coarse_time;
        state.sample = frame.sample;

        let edge = match (was_high, is_high) {
            (true, true) => {
                if frame.sample != ALL_HIGH {
                    state.sample_cursor = CURSOR_START;
                }
                return None;
            }
            (false, false) => {
                if frame.sample != ALL_LOW {
                    state.sample_cursor = CURSOR_START;
                }
                return None;
            }
            (false, true) => Edge::Rising,
            (true, false) => Edge::Falling,
        };

        state.sample_cursor = CURSOR_START;
        let time_ns = extended_time_ns(state.coarse_time, state.overflow_count);
        let event = state.emit(frame.channel, time_ns, edge, frame.sample);
        self.calibration.record(ch, 0);
        Some(event)
    }
}

/// Iterator over decoded events, see [`TdcDecoder::events`].
///
/// Yields `Err` for I/O failures of the underlying source and ends after the
/// first error or at end of stream.
pub struct Events<'a, F: ?Sized> {
    decoder: &'a mut TdcDecoder,
    frames: &'a mut F,
    done: bool,
}

impl<F: FrameSource + ?Sized> Iterator for Events<'_, F> {
    type Item = Result<Event, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decoder.next_event(&mut *self.frames) {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn frames(list: &[(u8, u32, u8)]) -> VecDeque<RawFrame> {
        list.iter()
            .map(|&(ch, t, s)| RawFrame::new(ch, t, s))
            .collect()
    }

    fn decode_all(decoder: &mut TdcDecoder, list: &[(u8, u32, u8)]) -> Vec<Event> {
        let mut source = frames(list);
        decoder
            .events(&mut source)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_decoder_initial_state() {
        let decoder = TdcDecoder::new();
        for ch in 0..4 {
            let state = decoder.channel(ch).unwrap();
            assert_eq!(state.sample_cursor(), 0);
            assert_eq!(state.overflow_count(), 0);
            assert_eq!(decoder.level(ch), Some(false));
        }
        assert!(decoder.channel(4).is_none());
        assert!(decoder.level(200).is_none());
    }

    #[test]
    fn test_rising_edge_inside_sample() {
        let mut decoder = TdcDecoder::new();
        // ___~~~~~ : rises at bit 4, three nanoseconds into the step
        let events = decode_all(&mut decoder, &[(1, 100, 0b0001_1111)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, 1);
        assert_eq!(events[0].edge, Edge::Rising);
        assert_eq!(events[0].time_ns, 800 + 3);
        assert_eq!(events[0].sample, 0b0001_1111);
        assert_eq!(decoder.calibration().histogram(1).unwrap()[3], 1);
    }

    #[test]
    fn test_pulse_inside_one_sample() {
        let mut decoder = TdcDecoder::new();
        // __~~~___ : two edges in one frame, returned one per call
        let events = decode_all(&mut decoder, &[(0, 10, 0b0011_1000)]);
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].edge, events[0].time_ns), (Edge::Rising, 82));
        assert_eq!((events[1].edge, events[1].time_ns), (Edge::Falling, 85));
        assert_eq!(events[1].dt_ns, 3);
    }

    #[test]
    fn test_edge_on_frame_boundary() {
        let mut decoder = TdcDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[
                (2, 50, 0x00),
                // first bit high after an all-low sample: rising at bit 0
                (2, 51, 0xFF),
                // last bit high, first bit low: falling at bit 0
                (2, 52, 0x00),
            ],
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].edge, Edge::Rising);
        assert_eq!(events[0].time_ns, 51 * 8);
        assert_eq!(events[0].sample, 0xFF);
        assert_eq!(events[1].edge, Edge::Falling);
        assert_eq!(events[1].time_ns, 52 * 8);
        assert_eq!(events[1].dt_ns, 8);
        assert_eq!(decoder.calibration().histogram(2).unwrap()[0], 2);
    }

    #[test]
    fn test_boundary_edge_then_inner_edge() {
        let mut decoder = TdcDecoder::new();
        // boundary rise followed by a fall after two nanoseconds
        let events = decode_all(&mut decoder, &[(3, 7, 0b1100_0000)]);
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].edge, events[0].time_ns), (Edge::Rising, 56));
        assert_eq!((events[1].edge, events[1].time_ns), (Edge::Falling, 58));
    }

    #[test]
    fn test_steady_samples_produce_nothing() {
        let mut decoder = TdcDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[(0, 1, 0x00), (0, 2, 0x00), (1, 1, 0x00)],
        );
        assert!(events.is_empty());
        assert_eq!(decoder.channel(0).unwrap().coarse_time(), 2);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut decoder = TdcDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[(0, 10, 0b0000_1111), (1, 20, 0b0111_1111), (0, 30, 0b1111_0000)],
        );
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].channel, 0);
        assert_eq!(events[0].dt_ns, 84);
        assert_eq!(events[1].channel, 1);
        assert_eq!(events[1].dt_ns, 161);
        assert_eq!(events[2].channel, 0);
        assert_eq!(events[2].dt_ns, 244 - 84);
    }

    #[test]
    fn test_overflow_extends_time() {
        let mut decoder = TdcDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[
                (0, 0xFF_FFF0, 0b0000_1111),
                (0, 0, 0xFF),
                (0, 2, 0b1111_0000),
            ],
        );
        assert_eq!(decoder.channel(0).unwrap().overflow_count(), 1);
        assert_eq!(events.len(), 2);
        let before = events[0].time_ns;
        let after = events[1].time_ns;
        assert_eq!(before, 0xFF_FFF0 * 8 + 4);
        assert_eq!(after, ((1u64 << 24) + 2) * 8 + 4);
        assert!(after > before);
        assert_eq!(events[1].dt_ns as u64, after - before);
    }

    #[test]
    fn test_reset_overflow() {
        let mut decoder = TdcDecoder::new();
        decode_all(&mut decoder, &[(0, 0, 0), (1, 0, 0), (3, 0, 0)]);
        decoder.reset_overflow(ChannelMask::from_bits(0b0001));
        assert_eq!(decoder.channel(0).unwrap().overflow_count(), 0);
        assert_eq!(decoder.channel(1).unwrap().overflow_count(), 1);
        assert_eq!(decoder.channel(3).unwrap().overflow_count(), 1);
    }

    #[test]
    fn test_reset_clears_channels_and_calibration() {
        let mut decoder = TdcDecoder::new();
        decode_all(&mut decoder, &[(2, 0, 0x00), (2, 9, 0b0000_0111)]);
        let state = decoder.channel(2).unwrap();
        assert_eq!(state.overflow_count(), 1);
        assert_eq!(state.previous_event_time(), ((1u64 << 24) + 9) * 8 + 5);
        assert_eq!(decoder.calibration().total(), 1);

        decoder.reset();
        let state = decoder.channel(2).unwrap();
        assert_eq!(state.overflow_count(), 0);
        assert_eq!(state.previous_event_time(), 0);
        assert_eq!(state.sample(), 0);
        assert_eq!(decoder.calibration().total(), 0);

        // dt of the first event after a reset is measured from zero again
        let events = decode_all(&mut decoder, &[(2, 3, 0b0000_0001)]);
        assert_eq!(events[0].dt_ns, 3 * 8 + 7);
    }

    #[test]
    fn test_level_tracks_scan_position() {
        let mut decoder = TdcDecoder::new();
        let mut source = frames(&[(0, 1, 0b0011_1000)]);
        decoder.next_event(&mut source).unwrap();
        assert_eq!(decoder.level(0), Some(true));
        decoder.next_event(&mut source).unwrap();
        assert_eq!(decoder.level(0), Some(false));
        assert!(decoder.next_event(&mut source).unwrap().is_none());
    }

    #[test]
    fn test_decode_buffer_reads_wire_bytes() {
        let mut bytes = Vec::new();
        for frame in [RawFrame::new(1, 9, 0x0F), RawFrame::new(1, 10, 0xF0)] {
            bytes.extend(crate::parser::pack_frame(&frame).unwrap());
        }
        let mut decoder = TdcDecoder::new();
        let events = decoder.decode_buffer(&bytes).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].time_ns, 9 * 8 + 4);
        assert_eq!(events[1].time_ns, 10 * 8 + 4);
    }
}
