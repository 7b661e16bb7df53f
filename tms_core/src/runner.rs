//! Blocking drivers for the cooperative tick loop.
//!
//! The host command interface is non-blocking; these helpers tick a
//! controller until a condition holds, sleeping `idle_tick_ms` through the
//! controller's clock whenever a tick did not move a motor.

use std::time::Duration;

use tms_traits::DigitalIo;

use crate::controller::ControllerCore;
use crate::error::{Result, TmsError};
use crate::status::{Activity, SlotState, SlotStatus};

/// Limits for a blocking run.
pub struct RunParams {
    /// Tick budget before giving up with `Stalled`.
    pub max_ticks: u64,
    /// Polled before every tick; returning `true` stops the run with `Halted`.
    pub halt: Option<Box<dyn Fn() -> bool>>,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            max_ticks: 100_000,
            halt: None,
        }
    }
}

impl core::fmt::Debug for RunParams {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RunParams")
            .field("max_ticks", &self.max_ticks)
            .field("halt", &self.halt.is_some())
            .finish()
    }
}

impl RunParams {
    pub fn with_halt<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.halt = Some(Box::new(f));
        self
    }

    fn halted(&self) -> bool {
        self.halt.as_ref().is_some_and(|f| f())
    }
}

fn stop<I: DigitalIo>(ctrl: &mut ControllerCore<I>, err: TmsError) -> TmsError {
    if let Err(e) = ctrl.shutdown() {
        tracing::warn!(error = %e, "failed to disable motors");
    }
    tracing::error!(error = %err, "run stopped");
    err
}

/// Tick until `done` holds, returning the number of ticks taken.
pub fn run_until<I, F>(ctrl: &mut ControllerCore<I>, params: &RunParams, mut done: F) -> Result<u64>
where
    I: DigitalIo,
    F: FnMut(&ControllerCore<I>) -> bool,
{
    let idle = Duration::from_millis(ctrl.machine().control.idle_tick_ms);
    let mut ticks = 0u64;
    loop {
        if done(ctrl) {
            return Ok(ticks);
        }
        if params.halted() {
            return Err(stop(ctrl, TmsError::Halted));
        }
        if ticks >= params.max_ticks {
            return Err(stop(ctrl, TmsError::Stalled { ticks }));
        }
        let activity = ctrl.tick();
        ticks += 1;
        if activity != Activity::Moving {
            ctrl.clock().sleep(idle);
        }
    }
}

/// Tick until no slot is mid-sequence.
pub fn run_until_settled<I: DigitalIo>(
    ctrl: &mut ControllerCore<I>,
    params: &RunParams,
) -> Result<u64> {
    run_until(ctrl, params, |c| !c.is_busy())
}

fn finish<I: DigitalIo>(
    ctrl: &ControllerCore<I>,
    index: usize,
    want: SlotState,
) -> Result<SlotStatus> {
    let status = ctrl
        .slot(index)
        .map(crate::slot::SlotController::status)
        .ok_or_else(|| TmsError::Config(format!("slot {index} out of range")))?;
    if status.state == want {
        return Ok(status);
    }
    Err(status.error.unwrap_or_else(|| {
        TmsError::InvariantViolation(format!(
            "slot {index} settled in {} instead of {}",
            status.state.name(),
            want.name()
        ))
    }))
}

/// Load `index` and tick until the sequence finishes.
pub fn load_blocking<I: DigitalIo>(
    ctrl: &mut ControllerCore<I>,
    index: usize,
    params: &RunParams,
) -> Result<SlotStatus> {
    ctrl.load_slot(index)?;
    tracing::info!(slot = index, "load start");
    run_until(ctrl, params, |c| {
        c.slot_state(index).is_ok_and(|s| !s.is_busy())
    })?;
    finish(ctrl, index, SlotState::Loaded)
}

/// Unload `index` and tick until the sequence finishes.
pub fn unload_blocking<I: DigitalIo>(
    ctrl: &mut ControllerCore<I>,
    index: usize,
    params: &RunParams,
) -> Result<SlotStatus> {
    ctrl.unload_slot(index)?;
    tracing::info!(slot = index, "unload start");
    run_until(ctrl, params, |c| {
        c.slot_state(index).is_ok_and(|s| !s.is_busy())
    })?;
    finish(ctrl, index, SlotState::Idle)
}

/// Keep ticking for `duration` of controller time (buffer regulation while
/// printing). Stops early only when halted.
pub fn service_for<I: DigitalIo>(
    ctrl: &mut ControllerCore<I>,
    duration: Duration,
    params: &RunParams,
) -> Result<u64> {
    let until = ctrl
        .now_ms()
        .saturating_add(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
    let unbounded = RunParams {
        max_ticks: u64::MAX,
        halt: None,
    };
    let halt = &params.halt;
    let r = run_until(ctrl, &unbounded, |c| {
        c.now_ms() >= until || halt.as_ref().is_some_and(|f| f())
    });
    if params.halted() {
        return Err(stop(ctrl, TmsError::Halted));
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_controller;
    use crate::config::{Level, MachineCfg, MotorCfg, SensorCfg, SlotCfg};
    use crate::mocks::RecordingIo;
    use std::cell::Cell;
    use std::rc::Rc;
    use tms_traits::Line;
    use tms_traits::clock::test_clock::TestClock;

    fn machine() -> MachineCfg {
        MachineCfg {
            slots: vec![SlotCfg {
                index: 0,
                presence: SensorCfg::new(10, Level::High),
                filament: None,
                feeder: MotorCfg {
                    enable: Line(1),
                    dir: Line(2),
                    step: Line(3),
                    feed_dir: Level::High,
                    steps_per_mm: 10.0,
                },
                spool: None,
            }],
            ..MachineCfg::default()
        }
    }

    #[test]
    fn tick_budget_reports_stalled() {
        // presence never trips, max_load 1500 mm needs far more than 5 ticks
        let mut c = build_controller(RecordingIo::default(), machine(), None).unwrap();
        c.load_slot(0).unwrap();
        let params = RunParams {
            max_ticks: 5,
            halt: None,
        };
        let err = run_until_settled(&mut c, &params).unwrap_err();
        assert_eq!(err, TmsError::Stalled { ticks: 5 });
    }

    #[test]
    fn halt_predicate_stops_the_run() {
        let mut c = build_controller(RecordingIo::default(), machine(), None).unwrap();
        c.load_slot(0).unwrap();
        let n = Rc::new(Cell::new(0));
        let seen = n.clone();
        let params = RunParams::default().with_halt(move || {
            seen.set(seen.get() + 1);
            seen.get() > 3
        });
        let err = run_until_settled(&mut c, &params).unwrap_err();
        assert_eq!(err, TmsError::Halted);
        // enable line released (motor_on low -> disabled high)
        assert_eq!(c.io().level(Line(1)), Some(true));
    }

    #[test]
    fn idle_ticks_sleep_through_the_clock() {
        let clock = TestClock::new();
        let mut c =
            build_controller(RecordingIo::default(), machine(), Some(Box::new(clock.clone())))
                .unwrap();
        let ticks = service_for(&mut c, Duration::from_millis(50), &RunParams::default()).unwrap();
        // idle_tick_ms = 5
        assert_eq!(ticks, 10);
        assert_eq!(clock.elapsed(), Duration::from_millis(50));
    }
}
