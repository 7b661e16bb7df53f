pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Opaque identifier of one digital line on the I/O backend.
///
/// The core never interprets the number; backends map it to whatever pin
/// numbering scheme they use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Line(pub u8);

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.0)
    }
}

/// Raw digital I/O boundary.
///
/// Levels are physical (`true` = high). Polarity (active-low sensors,
/// motor-on level) is resolved by the caller.
pub trait DigitalIo {
    /// Sample the current level of an input line.
    fn read(&mut self, line: Line) -> Result<bool, Box<dyn Error + Send + Sync>>;

    /// Drive an output line to the given level.
    fn write(&mut self, line: Line, high: bool) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Emit `count` step pulses on `line`, one every `interval`.
    ///
    /// Returns once the burst has completed; no pulses remain in flight.
    fn pulse(
        &mut self,
        line: Line,
        count: u32,
        interval: Duration,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

impl<T: DigitalIo + ?Sized> DigitalIo for Box<T> {
    fn read(&mut self, line: Line) -> Result<bool, Box<dyn Error + Send + Sync>> {
        (**self).read(line)
    }

    fn write(&mut self, line: Line, high: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).write(line, high)
    }

    fn pulse(
        &mut self,
        line: Line,
        count: u32,
        interval: Duration,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).pulse(line, count, interval)
    }
}
