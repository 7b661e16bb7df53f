//! Raspberry Pi GPIO backend (rppal).

use std::collections::HashMap;
use std::error::Error;
use std::thread::sleep;
use std::time::Duration;

use rppal::gpio::{Gpio, InputPin, OutputPin};
use tms_traits::{DigitalIo, Line};

use crate::error::HwError;

/// Memory-mapped GPIO with every line claimed up front.
pub struct GpioIo {
    inputs: HashMap<u8, InputPin>,
    outputs: HashMap<u8, OutputPin>,
}

impl GpioIo {
    /// Claim `inputs` with pull-ups and `outputs` driven to `idle_high`.
    pub fn new(inputs: &[u8], outputs: &[(u8, bool)]) -> Result<Self, HwError> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(format!("open gpio: {e}")))?;
        let mut ins = HashMap::with_capacity(inputs.len());
        for &p in inputs {
            let pin = gpio
                .get(p)
                .map_err(|e| HwError::Gpio(format!("open input pin {p}: {e}")))?;
            ins.insert(p, pin.into_input_pullup());
        }
        let mut outs = HashMap::with_capacity(outputs.len());
        for &(p, idle_high) in outputs {
            let pin = gpio
                .get(p)
                .map_err(|e| HwError::Gpio(format!("open output pin {p}: {e}")))?;
            let out = if idle_high {
                pin.into_output_high()
            } else {
                pin.into_output_low()
            };
            outs.insert(p, out);
        }
        tracing::info!(inputs = ins.len(), outputs = outs.len(), "gpio lines claimed");
        Ok(Self {
            inputs: ins,
            outputs: outs,
        })
    }

    fn output(&mut self, line: Line) -> Result<&mut OutputPin, HwError> {
        self.outputs
            .get_mut(&line.0)
            .ok_or(HwError::UnmappedLine(line.0))
    }
}

impl DigitalIo for GpioIo {
    fn read(&mut self, line: Line) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let pin = self
            .inputs
            .get(&line.0)
            .ok_or(HwError::UnmappedLine(line.0))?;
        Ok(pin.is_high())
    }

    fn write(&mut self, line: Line, high: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        let pin = self.output(line)?;
        if high {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }

    fn pulse(
        &mut self,
        line: Line,
        count: u32,
        interval: Duration,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let pin = self.output(line)?;
        let high = interval / 2;
        let low = interval.saturating_sub(high);
        for _ in 0..count {
            pin.set_high();
            sleep(high);
            pin.set_low();
            sleep(low);
        }
        Ok(())
    }
}
