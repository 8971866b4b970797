//! Host-side decoder for a four-channel serial time-to-digital converter.
//!
//! The device samples each input at 1 ns resolution and streams 5-byte
//! frames carrying an 8-bit level bitmap and a coarse 8 ns counter. This
//! crate resynchronizes the frame stream, extends the coarse counter across
//! overflow and reconstructs one event per rising or falling edge, including
//! edges that fall exactly between two frames. It also encodes the channel
//! enable and threshold commands.
//!
//! # Example
//!
//! ```no_run
//! use tdc_core::device::{DeviceConfig, SerialSession};
//! use tdc_core::ChannelMask;
//!
//! let mut tdc = SerialSession::open_serial("/dev/ttyACM0", &DeviceConfig::default()).unwrap();
//! tdc.enable_channels(ChannelMask::ALL).unwrap();
//! tdc.set_threshold(0, 2048).unwrap();
//!
//! while let Some(event) = tdc.next_event().unwrap() {
//!     println!("ch{} {:?} at {} ns (dt {} ns)", event.channel, event.edge, event.time_ns, event.dt_ns);
//! }
//! ```
//!
//! # Features
//!
//! - Byte-level resynchronization after lost or corrupted bytes
//! - Timestamps extended across coarse counter overflow
//! - Sub-sample timing calibration from the observed edge distribution
//! - Playback of recorded raw streams and a synthetic frame generator
//! - Text, CSV and binary event output

pub mod calibration;
pub mod command;
pub mod decoder;
pub mod device;
pub mod output;
pub mod parser;
pub mod source;
pub mod sync;
pub mod synth;
pub mod types;

// Re-export commonly used types
pub use command::CommandError;
pub use decoder::{DecodeError, TdcDecoder};
pub use device::{DeviceConfig, DeviceError, TdcSession};
pub use output::{EventFormat, OutputError};
pub use sync::{FrameSource, FrameSync};
pub use types::{ChannelMask, Edge, Event, RawFrame};
