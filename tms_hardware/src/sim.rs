//! Simulated feeder mechanics behind the `DigitalIo` boundary.
//!
//! Each slot has a filament tip whose position follows the feeder's step
//! pulses. Sensors are derived from tip positions; the buffer fills while a
//! tip is past the buffer inlet and drains at a configurable rate. Pulse
//! bursts advance the injected clock by their duration, so a `TestClock`
//! gives fully deterministic runs and a `MonotonicClock` gives real time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tms_traits::{Clock, DigitalIo, Line};

use crate::error::HwError;

/// Wiring and calibration of one simulated stepper driver.
#[derive(Debug, Clone, Copy)]
pub struct SimMotor {
    pub enable_pin: u8,
    pub dir_pin: u8,
    pub step_pin: u8,
    /// Direction level that feeds (or unwinds).
    pub forward_high: bool,
    /// Enable level that energizes the driver.
    pub on_high: bool,
    pub steps_per_mm: f32,
}

#[derive(Debug, Clone)]
pub struct SimSlot {
    pub feeder: SimMotor,
    pub spool: Option<SimMotor>,
    pub presence_pin: u8,
    /// Level of the presence sensor while filament covers it.
    pub presence_high: bool,
    /// Tip position at which the presence sensor trips.
    pub sensor_at_mm: f32,
    pub filament_pin: Option<u8>,
    pub filament_high: bool,
    /// Whether a filament is inserted at all; without one the feeder spins freely.
    pub has_filament: bool,
    pub tip_mm: f32,
}

impl SimSlot {
    pub fn new(feeder: SimMotor, presence_pin: u8, sensor_at_mm: f32) -> Self {
        Self {
            feeder,
            spool: None,
            presence_pin,
            presence_high: false,
            sensor_at_mm,
            filament_pin: None,
            filament_high: false,
            has_filament: true,
            tip_mm: 0.0,
        }
    }
}

/// End-of-path sensor of the shared section.
#[derive(Debug, Clone, Copy)]
pub struct SimSelector {
    pub end_pin: u8,
    pub detect_high: bool,
    pub at_mm: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct SimBuffer {
    pub pin: u8,
    /// Level of the buffer sensor while the reserve is below `trip_mm`.
    pub empty_high: bool,
    /// Tip position past which fed filament accumulates in the buffer.
    pub fill_after_mm: f32,
    pub trip_mm: f32,
    pub reserve_mm: f32,
    pub consume_mm_s: f32,
}

#[derive(Debug)]
struct SimState {
    slots: Vec<SimSlot>,
    feeder_steps: Vec<i64>,
    spool_steps: Vec<i64>,
    selector: Option<SimSelector>,
    buffer: Option<SimBuffer>,
    outputs: HashMap<u8, bool>,
    forced: HashMap<u8, bool>,
    pulses: u64,
    last_drain: Option<Instant>,
}

enum Driven {
    Feeder(usize),
    Spool(usize),
}

impl SimState {
    fn motor_for_step(&self, pin: u8) -> Option<(Driven, SimMotor)> {
        self.slots.iter().enumerate().find_map(|(i, s)| {
            if s.feeder.step_pin == pin {
                Some((Driven::Feeder(i), s.feeder))
            } else {
                s.spool
                    .filter(|m| m.step_pin == pin)
                    .map(|m| (Driven::Spool(i), m))
            }
        })
    }

    fn drain(&mut self, now: Instant) {
        let Some(buf) = self.buffer.as_mut() else {
            return;
        };
        if let Some(prev) = self.last_drain {
            let dt = now.saturating_duration_since(prev).as_secs_f32();
            buf.reserve_mm = (buf.reserve_mm - buf.consume_mm_s * dt).max(0.0);
        }
        self.last_drain = Some(now);
    }

    fn move_tip(&mut self, slot: usize, delta_mm: f32) {
        let before = self.slots[slot].tip_mm;
        let after = before + delta_mm;
        self.slots[slot].tip_mm = after;
        if let Some(buf) = self.buffer.as_mut() {
            let inlet = buf.fill_after_mm;
            let overlap = after.max(inlet) - before.max(inlet);
            buf.reserve_mm = (buf.reserve_mm + overlap).max(0.0);
        }
    }

    fn read(&mut self, pin: u8, now: Instant) -> Option<bool> {
        if let Some(level) = self.forced.get(&pin) {
            return Some(*level);
        }
        for s in &self.slots {
            if s.presence_pin == pin {
                let present = s.tip_mm >= s.sensor_at_mm;
                return Some(present == s.presence_high);
            }
            if s.filament_pin == Some(pin) {
                return Some(s.has_filament == s.filament_high);
            }
        }
        if let Some(sel) = self.selector
            && sel.end_pin == pin
        {
            let occupied = self.slots.iter().any(|s| s.tip_mm >= sel.at_mm);
            return Some(occupied == sel.detect_high);
        }
        if self.buffer.is_some_and(|b| b.pin == pin) {
            self.drain(now);
            let buf = self.buffer?;
            let empty = buf.reserve_mm < buf.trip_mm;
            return Some(empty == buf.empty_high);
        }
        self.outputs.get(&pin).copied()
    }
}

/// `DigitalIo` backend driving a simulated feeder.
///
/// Clones share the same machine, so a test can keep a handle for
/// inspection after boxing the I/O into a controller.
#[derive(Clone)]
pub struct SimulatedIo {
    state: Rc<RefCell<SimState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for SimulatedIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedIo")
            .field("state", &self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SimulatedIo {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                slots: Vec::new(),
                feeder_steps: Vec::new(),
                spool_steps: Vec::new(),
                selector: None,
                buffer: None,
                outputs: HashMap::new(),
                forced: HashMap::new(),
                pulses: 0,
                last_drain: None,
            })),
            clock,
        }
    }

    pub fn with_slot(self, slot: SimSlot) -> Self {
        {
            let mut st = self.state.borrow_mut();
            st.slots.push(slot);
            st.feeder_steps.push(0);
            st.spool_steps.push(0);
        }
        self
    }

    pub fn with_selector(self, selector: SimSelector) -> Self {
        self.state.borrow_mut().selector = Some(selector);
        self
    }

    pub fn with_buffer(self, buffer: SimBuffer) -> Self {
        self.state.borrow_mut().buffer = Some(buffer);
        self
    }

    pub fn tip_mm(&self, slot: usize) -> f32 {
        self.state.borrow().slots[slot].tip_mm
    }

    pub fn set_tip_mm(&self, slot: usize, mm: f32) {
        self.state.borrow_mut().slots[slot].tip_mm = mm;
    }

    pub fn set_has_filament(&self, slot: usize, present: bool) {
        self.state.borrow_mut().slots[slot].has_filament = present;
    }

    /// Net feeder displacement since start (mm, positive = fed).
    #[allow(clippy::cast_precision_loss)]
    pub fn feeder_mm(&self, slot: usize) -> f32 {
        let st = self.state.borrow();
        st.feeder_steps[slot] as f32 / st.slots[slot].feeder.steps_per_mm
    }

    /// Net spool displacement since start (mm, positive = unwound).
    #[allow(clippy::cast_precision_loss)]
    pub fn spool_mm(&self, slot: usize) -> f32 {
        let st = self.state.borrow();
        st.slots[slot]
            .spool
            .map_or(0.0, |m| st.spool_steps[slot] as f32 / m.steps_per_mm)
    }

    pub fn buffer_reserve_mm(&self) -> Option<f32> {
        self.state.borrow().buffer.map(|b| b.reserve_mm)
    }

    /// Remove filament from the buffer as an extruder would.
    pub fn consume(&self, mm: f32) {
        if let Some(buf) = self.state.borrow_mut().buffer.as_mut() {
            buf.reserve_mm = (buf.reserve_mm - mm).max(0.0);
        }
    }

    /// Pin an input to a fixed level regardless of the mechanics.
    pub fn force_level(&self, pin: u8, high: bool) {
        self.state.borrow_mut().forced.insert(pin, high);
    }

    pub fn release_level(&self, pin: u8) {
        self.state.borrow_mut().forced.remove(&pin);
    }

    /// Last level written to an output pin.
    pub fn output_level(&self, pin: u8) -> Option<bool> {
        self.state.borrow().outputs.get(&pin).copied()
    }

    /// Total step pulses emitted on any line.
    pub fn pulse_count(&self) -> u64 {
        self.state.borrow().pulses
    }
}

impl DigitalIo for SimulatedIo {
    fn read(&mut self, line: Line) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let now = self.clock.now();
        self.state
            .borrow_mut()
            .read(line.0, now)
            .ok_or_else(|| HwError::UnmappedLine(line.0).into())
    }

    fn write(&mut self, line: Line, high: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.state.borrow_mut().outputs.insert(line.0, high);
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn pulse(
        &mut self,
        line: Line,
        count: u32,
        interval: Duration,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        {
            let mut st = self.state.borrow_mut();
            let (driven, motor) = st
                .motor_for_step(line.0)
                .ok_or(HwError::UnmappedLine(line.0))?;
            let enabled = st.outputs.get(&motor.enable_pin) == Some(&motor.on_high);
            if enabled {
                let forward =
                    st.outputs.get(&motor.dir_pin).copied().unwrap_or(false) == motor.forward_high;
                let delta = if forward {
                    i64::from(count)
                } else {
                    -i64::from(count)
                };
                match driven {
                    Driven::Feeder(i) => {
                        st.feeder_steps[i] += delta;
                        if st.slots[i].has_filament {
                            st.move_tip(i, delta as f32 / motor.steps_per_mm);
                        }
                    }
                    Driven::Spool(i) => st.spool_steps[i] += delta,
                }
            } else {
                tracing::trace!(pin = line.0, count, "pulses on disabled driver");
            }
            st.pulses += u64::from(count);
        }
        self.clock.sleep(interval.saturating_mul(count));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tms_traits::clock::test_clock::TestClock;

    fn motor() -> SimMotor {
        SimMotor {
            enable_pin: 1,
            dir_pin: 2,
            step_pin: 3,
            forward_high: true,
            on_high: false,
            steps_per_mm: 10.0,
        }
    }

    #[test]
    fn disabled_driver_does_not_move_filament() {
        let clock = TestClock::new();
        let mut io = SimulatedIo::new(Arc::new(clock.clone())).with_slot(SimSlot::new(motor(), 4, 5.0));
        io.write(Line(1), true).unwrap(); // off
        io.pulse(Line(3), 100, Duration::from_micros(100)).unwrap();
        assert_eq!(io.tip_mm(0), 0.0);
        assert_eq!(io.pulse_count(), 100);
        assert_eq!(clock.elapsed(), Duration::from_millis(10));
    }

    #[test]
    fn presence_follows_tip() {
        let clock = Arc::new(TestClock::new());
        let mut io = SimulatedIo::new(clock).with_slot(SimSlot::new(motor(), 4, 5.0));
        io.write(Line(1), false).unwrap();
        io.write(Line(2), true).unwrap();
        // active-low presence: high while absent
        assert!(io.read(Line(4)).unwrap());
        io.pulse(Line(3), 50, Duration::ZERO).unwrap();
        assert!(!io.read(Line(4)).unwrap());
        assert!((io.feeder_mm(0) - 5.0).abs() < 1e-6);
    }
}
