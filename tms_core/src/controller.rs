//! The transport controller: owns every slot, the selector gate and the
//! buffer regulator, dispatches host commands and runs the cooperative tick.

use std::sync::Arc;
use std::time::Instant;

use tms_traits::DigitalIo;
use tms_traits::clock::Clock;

use crate::buffer::BufferRegulator;
use crate::config::MachineCfg;
use crate::error::{Result, TmsError};
use crate::gate::SelectorGate;
use crate::slot::SlotController;
use crate::status::{Activity, SlotState, Status};

/// Controller generic over the I/O backend (static dispatch).
pub struct ControllerCore<I: DigitalIo> {
    pub(crate) io: I,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) epoch: Instant,
    pub(crate) cfg: MachineCfg,
    pub(crate) slots: Vec<SlotController>,
    pub(crate) gate: SelectorGate,
    pub(crate) buffer: Option<BufferRegulator>,
    pub(crate) last_error: Option<TmsError>,
}

/// Controller over a boxed backend, as produced by the builder.
pub type Controller = ControllerCore<Box<dyn DigitalIo>>;

impl<I: DigitalIo> core::fmt::Debug for ControllerCore<I> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControllerCore")
            .field("slots", &self.slots.len())
            .field("gate", &self.gate.state())
            .field("buffer", &self.buffer.as_ref().map(BufferRegulator::state))
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl<I: DigitalIo> ControllerCore<I> {
    pub(crate) fn new(io: I, cfg: MachineCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let slots = cfg
            .slots
            .iter()
            .map(|s| SlotController::new(s.clone(), &cfg.motion))
            .collect();
        Self {
            io,
            epoch: clock.now(),
            clock,
            gate: SelectorGate::new(&cfg.selector, cfg.motion.debounce_ms),
            buffer: cfg.buffer.clone().map(BufferRegulator::new),
            slots,
            last_error: None,
            cfg,
        }
    }

    /// Milliseconds since the controller was built.
    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    pub fn machine(&self) -> &MachineCfg {
        &self.cfg
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    pub fn last_error(&self) -> Option<&TmsError> {
        self.last_error.as_ref()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.slots.len() {
            Ok(())
        } else {
            Err(TmsError::Config(format!(
                "slot {index} out of range (configured: {})",
                self.slots.len()
            )))
        }
    }

    fn record<T>(&mut self, r: Result<T>) -> Result<T> {
        if let Err(e) = &r {
            self.last_error = Some(e.clone());
        }
        r
    }

    /// Boot-time discovery: read every presence sensor once and adopt a slot
    /// whose filament is already at the selector as `Loaded`.
    ///
    /// All slots are examined; the first failure is returned.
    pub fn begin(&mut self) -> Result<()> {
        let now = self.now_ms();
        let mut first = None;
        for slot in &mut self.slots {
            if let Err(e) = slot.discover(&mut self.io, &mut self.gate, now) {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => self.record(Err(e)),
            None => Ok(()),
        }
    }

    /// Start loading `index`. Progress happens in [`Self::tick`].
    pub fn load_slot(&mut self, index: usize) -> Result<()> {
        let r = match self.check_index(index) {
            Ok(()) => self.slots[index].request_load(&self.gate),
            Err(e) => Err(e),
        };
        self.record(r)
    }

    /// Start unloading `index`. Progress happens in [`Self::tick`].
    pub fn unload_slot(&mut self, index: usize) -> Result<()> {
        let r = match self.check_index(index) {
            Ok(()) => self.slots[index].request_unload(),
            Err(e) => Err(e),
        };
        self.record(r)
    }

    /// Force `index` back to `Idle`, clearing its error. Also clears a
    /// latched buffer fault when `index` is the regulated slot.
    pub fn reset_slot(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let active = self.gate.holder() == Some(index);
        let r = self.slots[index].reset(&mut self.io, &mut self.gate);
        if let Some(buffer) = self.buffer.as_mut()
            && (active || buffer.slot() == Some(index))
        {
            buffer.clear_fault();
        }
        if r.is_ok() {
            self.last_error = None;
        }
        r
    }

    pub fn slot_state(&self, index: usize) -> Result<SlotState> {
        self.check_index(index)?;
        Ok(self.slots[index].state())
    }

    pub fn slot(&self, index: usize) -> Option<&SlotController> {
        self.slots.get(index)
    }

    pub fn status(&self) -> Status {
        Status {
            slots: self.slots.iter().map(SlotController::status).collect(),
            active_slot: self.gate.owner(),
            buffer: self.buffer.as_ref().map(BufferRegulator::state),
            last_error: self.last_error.clone(),
        }
    }

    /// Whether any slot is mid-sequence.
    pub fn is_busy(&self) -> bool {
        self.slots.iter().any(|s| s.state().is_busy())
    }

    /// One cooperative step: every slot advances by at most one increment,
    /// then the buffer regulator does.
    pub fn tick(&mut self) -> Activity {
        let now = self.now_ms();
        let mut activity = Activity::Idle;

        for slot in &mut self.slots {
            match slot.tick(
                &mut self.io,
                &mut self.gate,
                &self.cfg.motion,
                &self.cfg.selector,
                now,
            ) {
                Ok(a) => activity = activity.merge(a),
                Err(e) => {
                    self.last_error = Some(e);
                    activity = Activity::Moving;
                }
            }
        }

        let regulated = self.gate.owner().filter(|&o| {
            self.slots
                .get(o)
                .is_some_and(|s| s.state() == SlotState::Loaded)
        });
        if let Some(buffer) = self.buffer.as_mut() {
            match regulated {
                Some(index) => {
                    let feeder = self.slots[index].feeder_mut();
                    match buffer.tick(&mut self.io, index, feeder, now) {
                        Ok(a) => activity = activity.merge(a),
                        Err(e) => {
                            self.last_error = Some(e);
                            activity = Activity::Moving;
                        }
                    }
                }
                None => buffer.yield_motor(),
            }
        }

        activity
    }

    /// Disable every motor. Sequence state is left untouched.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut first = None;
        for slot in &mut self.slots {
            if let Err(e) = slot.shutdown(&mut self.io) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
