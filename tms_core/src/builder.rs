//! Type-state builder for `Controller` and generic `build_controller` constructor.
//!
//! The builder enforces at compile time that the I/O backend and the machine
//! description are provided before `build()` is available. `try_build()` is
//! always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use tms_traits::DigitalIo;
use tms_traits::clock::{Clock, MonotonicClock};

use crate::config::{MachineCfg, MotorCfg};
use crate::controller::{Controller, ControllerCore};
use crate::error::BuildError;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Controller`. The machine description is validated on `build()`.
pub struct ControllerBuilder<I, C> {
    io: Option<Box<dyn DigitalIo>>,
    machine: Option<MachineCfg>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    _i: PhantomData<I>,
    _c: PhantomData<C>,
}

impl Default for ControllerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            io: None,
            machine: None,
            clock: None,
            _i: PhantomData,
            _c: PhantomData,
        }
    }
}

impl Controller {
    /// Start building a Controller.
    pub fn builder() -> ControllerBuilder<Missing, Missing> {
        ControllerBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f32) -> bool {
    v.is_finite() && v >= 0.0
}

fn check_motor(m: &MotorCfg) -> eyre::Result<()> {
    if !positive(m.steps_per_mm) {
        return Err(invalid("steps_per_mm must be > 0"));
    }
    if m.enable == m.dir || m.enable == m.step || m.dir == m.step {
        return Err(invalid("motor lines must be distinct"));
    }
    Ok(())
}

/// Reject machine descriptions the components cannot run safely.
///
/// Single source of truth for validation, used by both
/// `ControllerBuilder::try_build()` and `build_controller()`.
fn validate(machine: &MachineCfg) -> eyre::Result<()> {
    if machine.slots.is_empty() {
        return Err(invalid("at least one slot is required"));
    }
    for (i, slot) in machine.slots.iter().enumerate() {
        if slot.index != i {
            return Err(invalid("slot indices must match their position"));
        }
        check_motor(&slot.feeder)?;
        if let Some(spool) = &slot.spool {
            check_motor(spool)?;
        }
    }

    let m = &machine.motion;
    if !positive(m.load_speed) || !positive(m.unload_speed) {
        return Err(invalid("motion speeds must be > 0"));
    }
    if !positive(m.move_read_distance_mm) {
        return Err(invalid("move_read_distance_mm must be > 0"));
    }
    if !positive(m.max_load_distance_mm) || !positive(m.max_unload_distance_mm) {
        return Err(invalid("max travel distances must be > 0"));
    }
    if !non_negative(m.spool_extra_rewind_mm) {
        return Err(invalid("spool_extra_rewind_mm must be >= 0"));
    }

    let s = &machine.selector;
    if !non_negative(s.offset_before_mm) || !non_negative(s.offset_after_mm) {
        return Err(invalid("selector offsets must be >= 0"));
    }
    if s.end_sensor.is_some() && s.confirm_timeout_ms == 0 {
        return Err(invalid("confirm_timeout_ms must be >= 1"));
    }

    if let Some(b) = &machine.buffer {
        if !positive(b.feed_speed) || !positive(b.preload_speed) || !positive(b.preload_slow_speed)
        {
            return Err(invalid("buffer speeds must be > 0"));
        }
        if !non_negative(b.preload_slow_length_mm) || b.preload_slow_length_mm > b.preload_length_mm
        {
            return Err(invalid("preload_slow_length_mm must be in [0, preload_length_mm]"));
        }
        if !positive(b.preload_max_distance_mm) || b.preload_max_distance_mm <= b.preload_length_mm {
            return Err(invalid("preload_max_distance_mm must exceed preload_length_mm"));
        }
    }
    Ok(())
}

fn validate_and_build<I: DigitalIo>(
    io: I,
    machine: MachineCfg,
    clock: Option<Box<dyn Clock + Send + Sync>>,
) -> eyre::Result<ControllerCore<I>> {
    validate(&machine)?;
    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(c) => Arc::from(c),
        None => Arc::new(MonotonicClock::new()),
    };
    tracing::debug!(
        slots = machine.slots.len(),
        buffer = machine.buffer.is_some(),
        end_sensor = machine.selector.end_sensor.is_some(),
        "controller built"
    );
    Ok(ControllerCore::new(io, machine, clock))
}

impl<I, C> ControllerBuilder<I, C> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> eyre::Result<Controller> {
        let io = self
            .io
            .ok_or_else(|| eyre::Report::new(BuildError::MissingIo))?;
        let machine = self
            .machine
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMachine))?;
        validate_and_build(io, machine, self.clock)
    }

    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<C> ControllerBuilder<Missing, C> {
    pub fn with_io(self, io: impl DigitalIo + 'static) -> ControllerBuilder<Set, C> {
        ControllerBuilder {
            io: Some(Box::new(io)),
            machine: self.machine,
            clock: self.clock,
            _i: PhantomData,
            _c: PhantomData,
        }
    }
}

impl<I> ControllerBuilder<I, Missing> {
    pub fn with_machine(self, machine: MachineCfg) -> ControllerBuilder<I, Set> {
        ControllerBuilder {
            io: self.io,
            machine: Some(machine),
            clock: self.clock,
            _i: PhantomData,
            _c: PhantomData,
        }
    }
}

impl ControllerBuilder<Set, Set> {
    /// Validate and build the Controller. Only available when I/O and machine are set.
    pub fn build(self) -> eyre::Result<Controller> {
        self.try_build()
    }
}

/// Build a statically-dispatched controller over a concrete backend.
pub fn build_controller<I: DigitalIo>(
    io: I,
    machine: MachineCfg,
    clock: Option<Box<dyn Clock + Send + Sync>>,
) -> eyre::Result<ControllerCore<I>> {
    validate_and_build(io, machine, clock)
}
