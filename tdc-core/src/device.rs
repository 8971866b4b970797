//! Device sessions.
//!
//! A [`TdcSession`] owns everything one open device needs: the byte source
//! and its end-of-stream debounce, the frame synchronizer, the four channel
//! states and the command writer. Nothing is shared between sessions.

use crate::command::{self, CommandError};
use crate::decoder::{DecodeError, Events, TdcDecoder};
use crate::source::{ByteSource, Clock, SystemClock, DEFAULT_EOF_DEBOUNCE};
use crate::sync::FrameSync;
use crate::types::{ChannelMask, Event};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur while opening a device.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Cannot open serial device {path}: {source}")]
    Serial {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Serial line and decoding parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Line speed; ignored by USB CDC devices
    pub baud_rate: u32,
    /// Per-read timeout of the serial line
    pub read_timeout: Duration,
    /// Zero-byte reads closer together than this mean end of stream
    pub eof_debounce: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(800),
            eof_debounce: DEFAULT_EOF_DEBOUNCE,
        }
    }
}

/// Session on a live serial device.
pub type SerialSession = TdcSession<Box<dyn SerialPort>, Box<dyn SerialPort>, SystemClock>;

/// Session replaying a recorded byte stream; commands are discarded.
pub type FileSession = TdcSession<BufReader<File>, io::Sink, SystemClock>;

/// An open TDC: decoder state plus its byte source and command writer.
pub struct TdcSession<S, W, C> {
    frames: FrameSync<S, C>,
    commands: W,
    decoder: TdcDecoder,
}

impl SerialSession {
    /// Opens and configures a serial device: 8 data bits, no parity, one
    /// stop bit, no flow control, bounded read timeout.
    pub fn open_serial<P: AsRef<str>>(path: P, config: &DeviceConfig) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let serial_error = |source| DeviceError::Serial {
            path: path.to_string(),
            source,
        };

        let port = serialport::new(path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout)
            .open()
            .map_err(serial_error)?;
        let writer = port.try_clone().map_err(serial_error)?;

        info!(path, baud = config.baud_rate, "opened serial device");
        Ok(Self::from_parts(
            port,
            writer,
            SystemClock::new(),
            config.eof_debounce,
        ))
    }
}

impl FileSession {
    /// Opens a recorded raw byte stream for playback.
    pub fn open_file<P: AsRef<Path>>(path: P, config: &DeviceConfig) -> Result<Self, DeviceError> {
        let file = File::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "opened recording");
        Ok(Self::from_parts(
            BufReader::new(file),
            io::sink(),
            SystemClock::new(),
            config.eof_debounce,
        ))
    }
}

impl<S: ByteSource, W: Write, C: Clock> TdcSession<S, W, C> {
    /// Assembles a session from an already open source and command writer.
    pub fn from_parts(source: S, commands: W, clock: C, eof_debounce: Duration) -> Self {
        Self {
            frames: FrameSync::new(source, clock, eof_debounce),
            commands,
            decoder: TdcDecoder::new(),
        }
    }

    /// Decodes the next edge event; `Ok(None)` at end of stream.
    pub fn next_event(&mut self) -> Result<Option<Event>, DecodeError> {
        self.decoder.next_event(&mut self.frames)
    }

    /// Iterator over the remaining events of this session.
    pub fn events(&mut self) -> Events<'_, FrameSync<S, C>> {
        self.decoder.events(&mut self.frames)
    }

    /// Enables exactly the channels in `mask`.
    ///
    /// Disabled channels restart from zero time on the device once they are
    /// enabled again, so their overflow counts are cleared here as well.
    pub fn enable_channels(&mut self, mask: ChannelMask) -> Result<(), CommandError> {
        for ch in mask.complement().channels() {
            info!(channel = ch, "resetting overflow count of disabled channel");
        }
        self.decoder.reset_overflow(mask.complement());

        self.commands.write_all(&[command::encode_enable(mask)])?;
        self.commands.flush()?;
        Ok(())
    }

    /// Sets the discriminator threshold of `channel`.
    ///
    /// Out-of-range input is rejected before any byte is written.
    pub fn set_threshold(&mut self, channel: i64, threshold: i64) -> Result<(), CommandError> {
        let bytes = command::encode_threshold(channel, threshold).map_err(|e| {
            warn!(channel, threshold, error = %e, "rejected threshold command");
            e
        })?;
        self.commands.write_all(&bytes)?;
        self.commands.flush()?;
        Ok(())
    }

    /// Clears the overflow counts of the channels in `mask` without
    /// talking to the device.
    pub fn reset_overflow(&mut self, mask: ChannelMask) {
        self.decoder.reset_overflow(mask);
    }

    /// Current logic level of `channel`.
    pub fn level(&self, channel: u8) -> Option<bool> {
        self.decoder.level(channel)
    }

    /// Calibrated, dithered timestamp of `event`.
    pub fn smooth_time(&self, event: &Event) -> f64 {
        self.decoder.smooth_time(event)
    }

    pub fn decoder(&self) -> &TdcDecoder {
        &self.decoder
    }

    pub fn frames(&self) -> &FrameSync<S, C> {
        &self.frames
    }

    pub fn commands(&self) -> &W {
        &self.commands
    }
}
