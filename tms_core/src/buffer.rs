//! Background buffer tension regulation.
//!
//! Runs only for the slot that owns the selector while it is `Loaded`, and
//! drives that slot's feeder. An empty signal starts a refill cycle of
//! `preload_length_mm`: fed at `feed_speed`, with the last
//! `preload_slow_length_mm` at the slow speed. Once the sensor confirms
//! pressure the cycle is re-based so the full preload is fed past the trip
//! point (at `preload_speed`). Feed without any confirmed pressure is
//! bounded by `preload_max_distance_mm`.

use tms_traits::DigitalIo;

use crate::config::BufferCfg;
use crate::debounce::DebouncedSensor;
use crate::error::{Result, TmsError};
use crate::motion::{Direction, MotionDriver, MotionRequest, Move, Progress};
use crate::status::Activity;
use crate::util::mm_to_steps;

/// Host-visible regulator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    #[default]
    Empty,
    Feeding,
    PreloadSlow,
    Tensioned,
}

impl BufferState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Feeding => "feeding",
            Self::PreloadSlow => "preload_slow",
            Self::Tensioned => "tensioned",
        }
    }
}

#[derive(Debug, Clone, Default)]
enum Stage {
    #[default]
    Empty,
    /// Empty signal confirmed at this time.
    EmptySince(u64),
    Feeding(Move),
    Slow(Move),
    Tensioned,
}

impl Stage {
    fn state(&self) -> BufferState {
        match self {
            Self::Empty | Self::EmptySince(_) => BufferState::Empty,
            Self::Feeding(_) => BufferState::Feeding,
            Self::Slow(_) => BufferState::PreloadSlow,
            Self::Tensioned => BufferState::Tensioned,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferRegulator {
    cfg: BufferCfg,
    sensor: DebouncedSensor,
    stage: Stage,
    slot: Option<usize>,
    /// Feed since pressure was last confirmed.
    fed_mm: f32,
    /// Pressure confirmed during the current cycle.
    pressured: bool,
    /// Slow tail of the current cycle, fed once the fast part completes.
    slow_mm: f32,
    fault: Option<TmsError>,
}

impl BufferRegulator {
    pub fn new(cfg: BufferCfg) -> Self {
        let mut sensor = DebouncedSensor::new(cfg.sensor, cfg.preload_debounce_ms);
        sensor.reset_to(false);
        Self {
            sensor,
            cfg,
            stage: Stage::Empty,
            slot: None,
            fed_mm: 0.0,
            pressured: false,
            slow_mm: 0.0,
            fault: None,
        }
    }

    pub fn state(&self) -> BufferState {
        self.stage.state()
    }

    /// Latched starvation, if any.
    pub fn fault(&self) -> Option<&TmsError> {
        self.fault.as_ref()
    }

    /// Slot most recently regulated.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn fed_mm(&self) -> f32 {
        self.fed_mm
    }

    pub fn clear_fault(&mut self) {
        if self.fault.take().is_some() {
            tracing::info!("buffer fault cleared");
        }
        self.restart();
    }

    /// Drop any in-flight move; the next tick starts over from `Empty`.
    /// Called while the active slot is busy or nothing is loaded.
    pub fn yield_motor(&mut self) {
        if !matches!(self.stage, Stage::Empty) {
            tracing::debug!("buffer regulation suspended");
        }
        self.restart();
    }

    fn restart(&mut self) {
        self.stage = Stage::Empty;
        self.fed_mm = 0.0;
        self.pressured = false;
        // an empty reading has to persist for the debounce window again
        self.sensor.reset_to(false);
    }

    /// Advance regulation for `slot` by at most one increment of `feeder`.
    pub fn tick(
        &mut self,
        io: &mut dyn DigitalIo,
        slot: usize,
        feeder: &mut MotionDriver,
        now_ms: u64,
    ) -> Result<Activity> {
        if self.slot != Some(slot) {
            if self.slot.is_some() {
                tracing::info!(slot, "buffer regulator switched slot");
            }
            self.slot = Some(slot);
            self.fault = None;
            self.restart();
        }
        if self.fault.is_some() {
            return Ok(Activity::Idle);
        }

        let stage = std::mem::take(&mut self.stage);
        match self.step(stage, io, slot, feeder, now_ms) {
            Ok((next, activity)) => {
                self.stage = next;
                Ok(activity)
            }
            Err(e) => {
                if let Err(disable) = feeder.disable(io) {
                    tracing::warn!(slot, error = %disable, "failed to disable feeder");
                }
                tracing::error!(slot, error = %e, "buffer regulation faulted");
                self.stage = Stage::Empty;
                self.fault = Some(e.clone());
                Err(e)
            }
        }
    }

    fn step(
        &mut self,
        stage: Stage,
        io: &mut dyn DigitalIo,
        slot: usize,
        feeder: &mut MotionDriver,
        now_ms: u64,
    ) -> Result<(Stage, Activity)> {
        match stage {
            Stage::Tensioned => {
                if self.sensor.poll(io, now_ms)? {
                    tracing::debug!(slot, "buffer empty");
                    if self.pressured {
                        self.fed_mm = 0.0;
                    }
                    return Ok((Stage::EmptySince(now_ms), Activity::Waiting));
                }
                Ok((Stage::Tensioned, Activity::Idle))
            }

            Stage::Empty => {
                if self.sensor.poll(io, now_ms)? {
                    return Ok((Stage::EmptySince(now_ms), Activity::Waiting));
                }
                if self.sensor.is_settling() {
                    return Ok((Stage::Empty, Activity::Waiting));
                }
                Ok((Stage::Tensioned, Activity::Idle))
            }

            Stage::EmptySince(since) => {
                if !self.sensor.poll(io, now_ms)? {
                    return Ok((Stage::Tensioned, Activity::Idle));
                }
                if now_ms.saturating_sub(since) < self.cfg.preload_delay_ms {
                    return Ok((Stage::EmptySince(since), Activity::Waiting));
                }
                let budget = self.cfg.preload_max_distance_mm - self.fed_mm;
                if mm_to_steps(budget, feeder.steps_per_mm()) == 0 {
                    return Err(self.starved(slot));
                }
                self.pressured = false;
                // a zero preload feeds until the sensor confirms pressure
                let length = if self.cfg.preload_length_mm > 0.0 {
                    self.cfg.preload_length_mm.min(budget)
                } else {
                    budget
                };
                tracing::debug!(slot, length_mm = length, fed_mm = self.fed_mm, "buffer refill");
                self.begin_cycle(io, feeder, length, self.cfg.feed_speed)
            }

            Stage::Feeding(mut mv) => {
                if let Some(next) = self.check_pressure(io, slot, feeder, now_ms)? {
                    return Ok(next);
                }
                if self.advance(io, feeder, &mut mv)? == Progress::Complete {
                    return self.begin_slow(io, slot, feeder);
                }
                Ok((Stage::Feeding(mv), Activity::Moving))
            }

            Stage::Slow(mut mv) => {
                if let Some(next) = self.check_pressure(io, slot, feeder, now_ms)? {
                    return Ok(next);
                }
                if self.advance(io, feeder, &mut mv)? == Progress::Complete {
                    return self.finish(io, slot, feeder);
                }
                Ok((Stage::Slow(mv), Activity::Moving))
            }
        }
    }

    /// On the first confirmed pressure of a cycle, restart it with the full
    /// preload still to go.
    fn check_pressure(
        &mut self,
        io: &mut dyn DigitalIo,
        slot: usize,
        feeder: &mut MotionDriver,
        now_ms: u64,
    ) -> Result<Option<(Stage, Activity)>> {
        if self.pressured || self.sensor.poll(io, now_ms)? {
            return Ok(None);
        }
        tracing::debug!(slot, fed_mm = self.fed_mm, "buffer pressure, preloading");
        self.pressured = true;
        self.fed_mm = 0.0;
        let length = self
            .cfg
            .preload_length_mm
            .min(self.cfg.preload_max_distance_mm);
        if length <= 0.0 {
            return self.finish(io, slot, feeder).map(Some);
        }
        self.begin_cycle(io, feeder, length, self.cfg.preload_speed)
            .map(Some)
    }

    /// Start a cycle of `length_mm`; everything above the slow tail runs at
    /// `fast_speed`.
    fn begin_cycle(
        &mut self,
        io: &mut dyn DigitalIo,
        feeder: &mut MotionDriver,
        length_mm: f32,
        fast_speed: f32,
    ) -> Result<(Stage, Activity)> {
        self.slow_mm = self.cfg.preload_slow_length_mm.min(length_mm);
        let fast = length_mm - self.slow_mm;
        if fast > 0.0 {
            let mv = feeder.start(io, MotionRequest::new(fast, Direction::Forward, fast_speed))?;
            return Ok((Stage::Feeding(mv), Activity::Moving));
        }
        let mv = feeder.start(
            io,
            MotionRequest::new(
                self.slow_mm,
                Direction::Forward,
                self.cfg.preload_slow_speed,
            ),
        )?;
        Ok((Stage::Slow(mv), Activity::Moving))
    }

    fn begin_slow(
        &mut self,
        io: &mut dyn DigitalIo,
        slot: usize,
        feeder: &mut MotionDriver,
    ) -> Result<(Stage, Activity)> {
        if self.slow_mm <= 0.0 {
            return self.finish(io, slot, feeder);
        }
        let mv = feeder.start(
            io,
            MotionRequest::new(
                self.slow_mm,
                Direction::Forward,
                self.cfg.preload_slow_speed,
            ),
        )?;
        Ok((Stage::Slow(mv), Activity::Moving))
    }

    fn finish(
        &mut self,
        io: &mut dyn DigitalIo,
        slot: usize,
        feeder: &mut MotionDriver,
    ) -> Result<(Stage, Activity)> {
        feeder.disable(io)?;
        if self.pressured {
            tracing::debug!(slot, "buffer tensioned");
        } else {
            tracing::debug!(slot, fed_mm = self.fed_mm, "refill cycle done without pressure");
        }
        Ok((Stage::Tensioned, Activity::Moving))
    }

    fn advance(
        &mut self,
        io: &mut dyn DigitalIo,
        feeder: &mut MotionDriver,
        mv: &mut Move,
    ) -> Result<Progress> {
        let before = mv.travelled_mm();
        let progress = feeder.advance(io, mv)?;
        self.fed_mm += mv.travelled_mm() - before;
        Ok(progress)
    }

    fn starved(&self, slot: usize) -> TmsError {
        TmsError::BufferStarvation {
            slot,
            fed_mm: self.fed_mm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Level, MotionCfg, MotorCfg, SensorCfg};
    use crate::mocks::RecordingIo;
    use tms_traits::Line;

    const EMPTY: Line = Line(4);

    fn feeder() -> MotionDriver {
        MotionDriver::new(
            MotorCfg {
                enable: Line(1),
                dir: Line(2),
                step: Line(3),
                feed_dir: Level::High,
                steps_per_mm: 10.0,
            },
            &MotionCfg {
                move_read_distance_mm: 5.0,
                ..MotionCfg::default()
            },
        )
    }

    fn cfg() -> BufferCfg {
        BufferCfg {
            // active-high: high = empty
            sensor: SensorCfg::new(4, Level::High),
            preload_delay_ms: 0,
            preload_debounce_ms: 0,
            preload_length_mm: 15.0,
            preload_slow_length_mm: 5.0,
            preload_max_distance_mm: 40.0,
            ..BufferCfg::default()
        }
    }

    fn regulator() -> BufferRegulator {
        BufferRegulator::new(cfg())
    }

    fn tick_until(
        b: &mut BufferRegulator,
        io: &mut RecordingIo,
        f: &mut MotionDriver,
        want: BufferState,
    ) -> usize {
        for n in 1..=50 {
            b.tick(io, 0, f, 0).unwrap();
            if b.state() == want {
                return n;
            }
        }
        panic!("never reached {want:?}, stuck in {:?}", b.state());
    }

    #[test]
    fn pressure_at_start_is_tensioned() {
        let mut io = RecordingIo::default();
        io.set_input(EMPTY, false);
        let mut b = regulator();
        let mut f = feeder();
        b.tick(&mut io, 0, &mut f, 0).unwrap();
        assert_eq!(b.state(), BufferState::Tensioned);
        assert!(io.pulses.is_empty());
    }

    #[test]
    fn constant_empty_signal_still_reaches_tensioned() {
        let mut io = RecordingIo::default();
        io.set_input(EMPTY, true);
        let mut b = regulator();
        let mut f = feeder();

        b.tick(&mut io, 0, &mut f, 0).unwrap();
        b.tick(&mut io, 0, &mut f, 0).unwrap();
        assert_eq!(b.state(), BufferState::Feeding);
        // 10 mm fast in two increments, then the 5 mm slow tail
        b.tick(&mut io, 0, &mut f, 0).unwrap();
        b.tick(&mut io, 0, &mut f, 0).unwrap();
        assert_eq!(b.state(), BufferState::PreloadSlow);
        b.tick(&mut io, 0, &mut f, 0).unwrap();
        assert_eq!(b.state(), BufferState::Tensioned);
        assert!((b.fed_mm() - 15.0).abs() < 1e-3);
        assert!(b.fault().is_none());
        assert!(!f.is_enabled());
    }

    #[test]
    fn pressure_rebases_the_cycle_to_a_full_preload() {
        let mut io = RecordingIo::default();
        io.set_input(EMPTY, true);
        let mut b = regulator();
        let mut f = feeder();
        tick_until(&mut b, &mut io, &mut f, BufferState::Feeding);
        b.tick(&mut io, 0, &mut f, 0).unwrap();
        let before = f.position_mm();

        io.set_input(EMPTY, false);
        b.tick(&mut io, 0, &mut f, 0).unwrap();
        assert_eq!(b.state(), BufferState::Feeding);
        assert!(b.fed_mm().abs() < 1e-3);
        tick_until(&mut b, &mut io, &mut f, BufferState::Tensioned);
        assert!((f.position_mm() - before - 15.0).abs() < 1e-3);
        assert!((b.fed_mm() - 15.0).abs() < 1e-3);
    }

    #[test]
    fn late_pressure_near_the_ceiling_is_not_starvation() {
        let mut io = RecordingIo::default();
        io.set_input(EMPTY, true);
        let mut b = regulator();
        let mut f = feeder();
        // two unpressured cycles use 30 of the 40 mm
        tick_until(&mut b, &mut io, &mut f, BufferState::Tensioned);
        tick_until(&mut b, &mut io, &mut f, BufferState::Feeding);
        tick_until(&mut b, &mut io, &mut f, BufferState::Tensioned);
        assert!((b.fed_mm() - 30.0).abs() < 1e-3);

        // third cycle: pressure after 5 more mm, 35 fed in total
        tick_until(&mut b, &mut io, &mut f, BufferState::Feeding);
        b.tick(&mut io, 0, &mut f, 0).unwrap();
        io.set_input(EMPTY, false);
        tick_until(&mut b, &mut io, &mut f, BufferState::Tensioned);
        assert!(b.fault().is_none());
        assert!((b.fed_mm() - 15.0).abs() < 1e-3);
    }

    #[test]
    fn first_empty_sample_after_restart_is_debounced() {
        let mut io = RecordingIo::default();
        io.set_input(EMPTY, true);
        let mut b = BufferRegulator::new(BufferCfg {
            preload_debounce_ms: 500,
            ..cfg()
        });
        let mut f = feeder();
        for t in [0, 1, 250, 499] {
            b.tick(&mut io, 0, &mut f, t).unwrap();
            assert_eq!(b.state(), BufferState::Empty, "at {t} ms");
        }
        b.yield_motor();
        b.tick(&mut io, 0, &mut f, 500).unwrap();
        assert_eq!(b.state(), BufferState::Empty);
        assert!(io.pulses.is_empty());

        b.tick(&mut io, 0, &mut f, 1000).unwrap();
        b.tick(&mut io, 0, &mut f, 1000).unwrap();
        assert_eq!(b.state(), BufferState::Feeding);
    }

    #[test]
    fn starvation_latches_until_cleared() {
        let mut io = RecordingIo::default();
        io.set_input(EMPTY, true);
        let mut b = regulator();
        let mut f = feeder();
        let mut result = Ok(Activity::Idle);
        for _ in 0..50 {
            result = b.tick(&mut io, 1, &mut f, 0);
            if result.is_err() {
                break;
            }
        }
        match result {
            Err(TmsError::BufferStarvation { slot: 1, fed_mm }) => {
                assert!((fed_mm - 40.0).abs() < 1e-3);
            }
            other => panic!("expected starvation, got {other:?}"),
        }
        assert!(b.fault().is_some());
        let pulses = io.pulses.len();
        assert_eq!(b.tick(&mut io, 1, &mut f, 0).unwrap(), Activity::Idle);
        assert_eq!(io.pulses.len(), pulses);

        b.clear_fault();
        assert!(b.fault().is_none());
        assert_eq!(b.state(), BufferState::Empty);
    }

    #[test]
    fn slot_change_clears_fault() {
        let mut io = RecordingIo::default();
        io.set_input(EMPTY, true);
        let mut b = regulator();
        let mut f = feeder();
        for _ in 0..50 {
            let _ = b.tick(&mut io, 0, &mut f, 0);
        }
        assert!(b.fault().is_some());
        io.set_input(EMPTY, false);
        b.tick(&mut io, 1, &mut f, 0).unwrap();
        assert!(b.fault().is_none());
        assert_eq!(b.state(), BufferState::Tensioned);
    }
}
