//! Synthetic frame generation for self-test and benchmarks.
//!
//! [`LevelTimeline`] tracks the logic level of every channel on a nanosecond
//! time axis and writes the frame a real device would send for each level
//! change, including the all-high or all-low marker frame the device emits
//! when its coarse counter wraps.

use crate::parser::pack_frame;
use crate::types::{
    Edge, Event, RawFrame, COARSE_STEP_NS, COARSE_TIME_MAX, N_CHANNELS,
};
use rand::Rng;
use std::io::{self, Write};

/// Nanoseconds covered by one full turn of the coarse counter.
pub const WRAP_NS: u64 = (COARSE_TIME_MAX as u64 + 1) * COARSE_STEP_NS;

/// Writes frames in wire format.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    writer: W,
    frames: u64,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, frames: 0 }
    }

    /// Writes one frame; fields that do not fit the wire format are an
    /// `InvalidInput` error.
    pub fn write_frame(&mut self, frame: RawFrame) -> io::Result<()> {
        let bytes =
            pack_frame(&frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.writer.write_all(&bytes)?;
        self.frames += 1;
        Ok(())
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Per-channel level history on a nanosecond axis.
#[derive(Debug, Clone, Default)]
pub struct LevelTimeline {
    time_ns: [u64; N_CHANNELS],
    level: [bool; N_CHANNELS],
}

impl LevelTimeline {
    /// All channels low at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, channel: u8) -> Option<bool> {
        self.level.get(channel as usize).copied()
    }

    /// Moves `channel` forward by `delta_ns`, flips its level there and
    /// writes the frame(s) describing the change.
    pub fn toggle<W: Write>(
        &mut self,
        out: &mut FrameWriter<W>,
        channel: u8,
        delta_ns: u64,
    ) -> io::Result<()> {
        let ch = channel as usize;
        if ch >= N_CHANNELS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no channel {channel}"),
            ));
        }

        let was_high = self.level[ch];
        let mut time = self.time_ns[ch] + delta_ns;

        // Old level for `offset` nanoseconds, new level afterwards.
        let offset = (time % COARSE_STEP_NS) as u32;
        let mut sample = 0xFFu8 >> offset;
        if was_high {
            sample = !sample;
        }

        while time >= WRAP_NS {
            time -= WRAP_NS;
            // A frame that itself lands on coarse zero already marks the wrap.
            if time >= COARSE_STEP_NS {
                let steady = if was_high { 0xFF } else { 0x00 };
                out.write_frame(RawFrame::new(channel, 0, steady))?;
            }
        }

        self.time_ns[ch] = time;
        out.write_frame(RawFrame::new(
            channel,
            (time / COARSE_STEP_NS) as u32,
            sample,
        ))?;
        self.level[ch] = !was_high;
        Ok(())
    }
}

/// A square wave on one channel with random frames on the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTrain {
    pub channel: u8,
    pub period_ns: u64,
    pub width_ns: u64,
    pub pulses: usize,
}

impl PulseTrain {
    /// Writes the pulse train, interleaving one noise frame on a random other
    /// channel after every pulse.
    pub fn write<W: Write, R: Rng + ?Sized>(
        &self,
        out: &mut FrameWriter<W>,
        rng: &mut R,
    ) -> io::Result<()> {
        let mut timeline = LevelTimeline::new();
        for _ in 0..self.pulses {
            timeline.toggle(out, self.channel, self.period_ns - self.width_ns)?;
            timeline.toggle(out, self.channel, self.width_ns)?;

            let mut other = self.channel;
            while other == self.channel {
                other = rng.gen_range(0..N_CHANNELS as u8);
            }
            out.write_frame(RawFrame::new(
                other,
                rng.gen_range(0..=COARSE_TIME_MAX),
                rng.gen(),
            ))?;
        }
        Ok(())
    }

    /// Generates the wire bytes of this pulse train in memory.
    pub fn to_bytes<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u8> {
        let mut out = FrameWriter::new(Vec::new());
        // Writing into a Vec cannot fail and every field is in range.
        if self.write(&mut out, rng).is_err() {
            return Vec::new();
        }
        out.into_inner()
    }
}

/// Outcome of checking decoded events against a pulse train.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseReport {
    /// Falling edges seen on the channel under test
    pub falling_edges: usize,
    /// Falling edges whose distance to the preceding edge was not the width
    pub mismatches: usize,
}

impl PulseReport {
    pub fn passed(&self, expected_pulses: usize) -> bool {
        self.mismatches == 0 && self.falling_edges == expected_pulses
    }
}

/// Checks that every falling edge on `channel` ends a pulse of `width_ns`.
pub fn check_pulse_widths<I>(events: I, channel: u8, width_ns: u64) -> PulseReport
where
    I: IntoIterator<Item = Event>,
{
    let mut report = PulseReport::default();
    for event in events {
        if event.channel != channel || event.edge != Edge::Falling {
            continue;
        }
        report.falling_edges += 1;
        if event.dt_ns != width_ns as i64 {
            report.mismatches += 1;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::TdcDecoder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_toggle_sample_shapes() {
        let mut out = FrameWriter::new(Vec::new());
        let mut timeline = LevelTimeline::new();
        timeline.toggle(&mut out, 1, 8 * 10 + 3).unwrap();
        timeline.toggle(&mut out, 1, 2).unwrap();
        assert_eq!(out.frames(), 2);
        assert_eq!(timeline.level(1), Some(false));

        let bytes = out.into_inner();
        let events = TdcDecoder::new().decode_buffer(&bytes).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].edge, events[0].time_ns), (Edge::Rising, 83));
        assert_eq!((events[1].edge, events[1].time_ns), (Edge::Falling, 85));
    }

    #[test]
    fn test_wrap_writes_single_marker() {
        let mut out = FrameWriter::new(Vec::new());
        let mut timeline = LevelTimeline::new();
        timeline.toggle(&mut out, 0, WRAP_NS + 100).unwrap();
        // marker frame + the edge frame
        assert_eq!(out.frames(), 2);

        let mut out = FrameWriter::new(Vec::new());
        let mut timeline = LevelTimeline::new();
        timeline.toggle(&mut out, 0, WRAP_NS + 3).unwrap();
        // the edge frame lands on coarse zero itself
        assert_eq!(out.frames(), 1);

        let events = TdcDecoder::new().decode_buffer(&out.into_inner()).unwrap();
        assert_eq!(events[0].time_ns, WRAP_NS + 3);
    }

    #[test]
    fn test_toggle_rejects_bad_channel() {
        let mut out = FrameWriter::new(Vec::new());
        assert!(LevelTimeline::new().toggle(&mut out, 4, 10).is_err());
    }

    #[test]
    fn test_short_pulse_train_round_trip() {
        let train = PulseTrain {
            channel: 2,
            period_ns: 1_000,
            width_ns: 37,
            pulses: 50,
        };
        let bytes = train.to_bytes(&mut StdRng::seed_from_u64(1));
        let events = TdcDecoder::new().decode_buffer(&bytes).unwrap();
        let report = check_pulse_widths(events, 2, 37);
        assert!(report.passed(50), "{report:?}");
    }
}
