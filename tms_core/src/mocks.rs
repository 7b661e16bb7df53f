//! Test and helper mocks for tms_core

use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;

use tms_traits::{DigitalIo, Line};

/// Records every write and pulse burst; reads return preset levels
/// (low when unset).
#[derive(Debug, Default, Clone)]
pub struct RecordingIo {
    pub inputs: HashMap<Line, bool>,
    pub outputs: HashMap<Line, bool>,
    pub pulses: Vec<(Line, u32, Duration)>,
    pub reads: usize,
    /// When set, every call fails with this message.
    pub fail_with: Option<String>,
}

impl RecordingIo {
    pub fn set_input(&mut self, line: Line, high: bool) {
        self.inputs.insert(line, high);
    }

    /// Last level written to `line`.
    pub fn level(&self, line: Line) -> Option<bool> {
        self.outputs.get(&line).copied()
    }

    /// Whether any I/O at all was performed.
    pub fn touched(&self) -> bool {
        self.reads > 0 || !self.outputs.is_empty() || !self.pulses.is_empty()
    }

    fn check(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        match &self.fail_with {
            Some(msg) => Err(msg.clone().into()),
            None => Ok(()),
        }
    }
}

impl DigitalIo for RecordingIo {
    fn read(&mut self, line: Line) -> Result<bool, Box<dyn Error + Send + Sync>> {
        self.check()?;
        self.reads += 1;
        Ok(self.inputs.get(&line).copied().unwrap_or(false))
    }

    fn write(&mut self, line: Line, high: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.check()?;
        self.outputs.insert(line, high);
        Ok(())
    }

    fn pulse(
        &mut self,
        line: Line,
        count: u32,
        interval: Duration,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.check()?;
        self.pulses.push((line, count, interval));
        Ok(())
    }
}
