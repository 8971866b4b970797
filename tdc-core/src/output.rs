//! Output format writers for decoded edge events.
//!
//! Supports a human-readable text listing, CSV, and a packed binary format.
//! All writers stream: events are written one at a time as they are decoded.

use crate::types::{Edge, Event, SAMPLE_BITS};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{BufWriter, Write};
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Output encoding for event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFormat {
    /// `channel edge time sample=0xHH:bitmap dt=N`
    #[default]
    Text,
    /// Comma-separated values with a header row
    Csv,
    /// Packed little-endian records after a magic header
    Binary,
}

impl std::str::FromStr for EventFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "csv" => Ok(Self::Csv),
            "bin" | "binary" => Ok(Self::Binary),
            other => Err(OutputError::InvalidFormat(format!(
                "Unknown format: {}. Use text, csv or bin",
                other
            ))),
        }
    }
}

impl EventFormat {
    /// Picks a format from a file extension, defaulting to text.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "csv" => Self::Csv,
            "bin" => Self::Binary,
            _ => Self::Text,
        }
    }
}

/// Magic number at the start of binary event files.
pub const BINARY_MAGIC: &[u8; 8] = b"TDCEVT\0\0";

/// Version of the binary record layout.
pub const BINARY_VERSION: u32 = 1;

/// Renders a sample bitmap as `-` (high) and `_` (low), earliest bit first,
/// with the edge position of `time_ns` marked as `/` or `\`.
pub fn sample_to_text(sample: u8, time_ns: u64, edge: Edge) -> String {
    let mut text: Vec<char> = (0..SAMPLE_BITS)
        .rev()
        .map(|bit| if sample >> bit & 1 == 1 { '-' } else { '_' })
        .collect();
    let idx = (time_ns % SAMPLE_BITS as u64) as usize;
    text[idx] = if edge.is_rising() { '/' } else { '\\' };
    text.into_iter().collect()
}

/// Streaming writer for one of the [`EventFormat`]s.
///
/// When `smooth` times are passed to [`write_event`](Self::write_event) an
/// extra calibrated-time column is written.
pub struct EventWriter<W: Write> {
    writer: BufWriter<W>,
    format: EventFormat,
    with_smooth: bool,
    events: u64,
}

impl<W: Write> EventWriter<W> {
    /// Creates a new writer.
    pub fn new(writer: W, format: EventFormat, with_smooth: bool) -> Self {
        Self {
            writer: BufWriter::new(writer),
            format,
            with_smooth,
            events: 0,
        }
    }

    /// Writes the format header, if the format has one.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        match self.format {
            EventFormat::Text => {}
            EventFormat::Csv => {
                write!(self.writer, "channel,edge,time_ns,sample,dt_ns")?;
                if self.with_smooth {
                    write!(self.writer, ",smooth_ns")?;
                }
                writeln!(self.writer)?;
            }
            EventFormat::Binary => {
                self.writer.write_all(BINARY_MAGIC)?;
                self.writer.write_u32::<LittleEndian>(BINARY_VERSION)?;
                self.writer.write_u8(self.with_smooth as u8)?;
            }
        }
        Ok(())
    }

    /// Writes a single event.
    pub fn write_event(&mut self, event: &Event, smooth: Option<f64>) -> Result<(), OutputError> {
        let smooth = if self.with_smooth {
            Some(smooth.unwrap_or(event.time_ns as f64))
        } else {
            None
        };

        match self.format {
            EventFormat::Text => {
                write!(
                    self.writer,
                    "{} {} {:20}     sample=0x{:02x}:{}   dt={}",
                    event.channel,
                    event.edge,
                    event.time_ns,
                    event.sample,
                    sample_to_text(event.sample, event.time_ns, event.edge),
                    event.dt_ns
                )?;
                if let Some(t) = smooth {
                    write!(self.writer, "   smooth={:.3}", t)?;
                }
                writeln!(self.writer)?;
            }
            EventFormat::Csv => {
                write!(
                    self.writer,
                    "{},{},{},{},{}",
                    event.channel, event.edge, event.time_ns, event.sample, event.dt_ns
                )?;
                if let Some(t) = smooth {
                    write!(self.writer, ",{:.3}", t)?;
                }
                writeln!(self.writer)?;
            }
            EventFormat::Binary => {
                self.writer.write_u8(event.channel)?;
                self.writer.write_u8(event.edge as u8)?;
                self.writer.write_u8(event.sample)?;
                self.writer.write_u8(0)?; // padding
                self.writer.write_u64::<LittleEndian>(event.time_ns)?;
                self.writer.write_i64::<LittleEndian>(event.dt_ns)?;
                if let Some(t) = smooth {
                    self.writer.write_f64::<LittleEndian>(t)?;
                }
            }
        }
        self.events += 1;
        Ok(())
    }

    /// Writes a batch of events without calibrated times.
    pub fn write_events(&mut self, events: &[Event]) -> Result<(), OutputError> {
        for event in events {
            self.write_event(event, None)?;
        }
        Ok(())
    }

    /// Events written so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_events() -> Vec<Event> {
        vec![
            Event::new(0, 803, Edge::Rising, 0x1F, 803),
            Event::new(0, 908, Edge::Falling, 0xF0, 105),
        ]
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(EventFormat::from_str("text").unwrap(), EventFormat::Text);
        assert_eq!(EventFormat::from_str(" CSV ").unwrap(), EventFormat::Csv);
        assert_eq!(EventFormat::from_str("bin").unwrap(), EventFormat::Binary);
        assert!(EventFormat::from_str("xml").is_err());
        assert_eq!(EventFormat::from_extension("BIN"), EventFormat::Binary);
        assert_eq!(EventFormat::from_extension("log"), EventFormat::Text);
    }

    #[test]
    fn test_sample_to_text() {
        assert_eq!(sample_to_text(0x1F, 803, Edge::Rising), "___/----");
        assert_eq!(sample_to_text(0xF0, 908, Edge::Falling), "----\\___");
        assert_eq!(sample_to_text(0xFF, 8, Edge::Rising), "/-------");
    }

    #[test]
    fn test_text_writer() {
        let mut output = Vec::new();
        {
            let mut writer = EventWriter::new(&mut output, EventFormat::Text, false);
            writer.write_header().unwrap();
            writer.write_events(&sample_events()).unwrap();
            writer.flush().unwrap();
        }

        let output_str = String::from_utf8(output).unwrap();
        let lines: Vec<_> = output_str.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0 1 "));
        assert!(lines[0].contains("sample=0x1f:___/----"));
        assert!(lines[1].ends_with("dt=105"));
    }

    #[test]
    fn test_csv_writer_with_smooth_column() {
        let mut output = Vec::new();
        {
            let mut writer = EventWriter::new(&mut output, EventFormat::Csv, true);
            writer.write_header().unwrap();
            let events = sample_events();
            writer.write_event(&events[1], Some(908.25)).unwrap();
            writer.flush().unwrap();
            assert_eq!(writer.events(), 1);
        }

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.starts_with("channel,edge,time_ns,sample,dt_ns,smooth_ns\n"));
        assert!(output_str.contains("0,0,908,240,105,908.250"));
    }

    #[test]
    fn test_binary_writer_layout() {
        let mut output = Vec::new();
        {
            let mut writer = EventWriter::new(&mut output, EventFormat::Binary, false);
            writer.write_header().unwrap();
            writer.write_events(&sample_events()).unwrap();
            writer.flush().unwrap();
        }

        assert_eq!(&output[0..8], BINARY_MAGIC);
        assert_eq!(u32::from_le_bytes([output[8], output[9], output[10], output[11]]), 1);
        assert_eq!(output[12], 0);
        let record = &output[13..33];
        assert_eq!(&record[0..4], &[0, 1, 0x1F, 0]);
        assert_eq!(u64::from_le_bytes(record[4..12].try_into().unwrap()), 803);
        assert_eq!(i64::from_le_bytes(record[12..20].try_into().unwrap()), 803);
        assert_eq!(output.len(), 13 + 2 * 20);
    }
}
