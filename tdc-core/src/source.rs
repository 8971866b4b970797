//! Byte source adapter.
//!
//! The device is read through a blocking call with a bounded timeout, so a
//! zero-byte read is ambiguous: a recorded file returns it immediately and
//! forever, a live but idle device returns it once per read timeout. The
//! [`EofDebounce`] tells the two apart by how quickly consecutive zero-byte
//! reads follow each other. Its clock is injected so sessions stay
//! independent and tests can drive time by hand.

use std::cell::Cell;
use std::io::{self, ErrorKind, Read};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Default interval below which two zero-byte reads mean end of stream.
pub const DEFAULT_EOF_DEBOUNCE: Duration = Duration::from_millis(100);

/// A blocking byte source with a bounded per-call timeout.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes, returning `Ok(0)` when the timeout
    /// elapsed with nothing available.
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read> ByteSource for R {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(0)
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Monotonic time source for the end-of-stream debounce.
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed origin.
    fn now(&self) -> Duration;
}

/// Wall-clock backed [`Clock`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven [`Clock`]; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Decides whether a zero-byte read is end of stream or an idle device.
#[derive(Debug)]
pub struct EofDebounce<C> {
    clock: C,
    interval: Duration,
    last_zero_read: Option<Duration>,
}

impl<C: Clock> EofDebounce<C> {
    pub fn new(clock: C, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            last_zero_read: None,
        }
    }

    /// Records a zero-byte read and returns `true` if it followed the
    /// previous one within the debounce interval.
    pub fn zero_read(&mut self) -> bool {
        let now = self.clock.now();
        let too_quick = self
            .last_zero_read
            .map(|then| now.saturating_sub(then) < self.interval)
            .unwrap_or(false);
        self.last_zero_read = Some(now);
        too_quick
    }
}

/// Fills fixed-size buffers from a [`ByteSource`], retrying through idle
/// periods until the debounce reports end of stream.
#[derive(Debug)]
pub struct ByteReader<S, C> {
    source: S,
    debounce: EofDebounce<C>,
}

impl<S: ByteSource, C: Clock> ByteReader<S, C> {
    pub fn new(source: S, clock: C, eof_debounce: Duration) -> Self {
        Self {
            source,
            debounce: EofDebounce::new(clock, eof_debounce),
        }
    }

    /// Fills `buf` completely.
    ///
    /// Returns `Ok(false)` on end of stream; bytes of an incomplete fill are
    /// then abandoned.
    pub fn fill(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.source.read_some(&mut buf[filled..])?;
            if n == 0 {
                if self.debounce.zero_read() {
                    return Ok(false);
                }
                continue;
            }
            filled += n;
        }
        Ok(true)
    }
}
