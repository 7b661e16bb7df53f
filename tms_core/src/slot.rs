//! Per-slot load/unload state machine.
//!
//! Load: acquire the selector, feed until the presence sensor trips, back
//! off `offset_before`, then approach `offset_after` so the final position is
//! always reached from the same direction at the same speed.
//!
//! Unload: retract until the presence sensor clears (the spool motor, when
//! fitted, rewinds in lockstep), rewind the spool a little further, release
//! the selector.
//!
//! Each tick performs at most one motion increment.

use tms_traits::DigitalIo;

use crate::config::{MotionCfg, SelectorCfg, SlotCfg};
use crate::debounce::DebouncedSensor;
use crate::error::{Result, TmsError};
use crate::gate::{Acquire, SelectorGate};
use crate::motion::{Direction, MotionDriver, MotionRequest, Move, Progress};
use crate::status::{Activity, SlotState, SlotStatus};
use crate::util::steps_to_mm;

#[derive(Debug, Clone, Default)]
enum Phase {
    #[default]
    Idle,
    AcquireGate,
    Seek {
        feeder: Move,
    },
    BackOff {
        feeder: Move,
    },
    Register {
        feeder: Move,
    },
    Loaded,
    BeginUnload,
    Retract {
        feeder: Move,
        spool: Option<Move>,
    },
    Rewind {
        spool: Move,
    },
    Error(TmsError),
}

impl Phase {
    fn state(&self) -> SlotState {
        match self {
            Self::Idle => SlotState::Idle,
            Self::AcquireGate | Self::Seek { .. } | Self::BackOff { .. } | Self::Register { .. } => {
                SlotState::Loading
            }
            Self::Loaded => SlotState::Loaded,
            Self::BeginUnload | Self::Retract { .. } | Self::Rewind { .. } => SlotState::Unloading,
            Self::Error(_) => SlotState::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotController {
    cfg: SlotCfg,
    feeder: MotionDriver,
    spool: Option<MotionDriver>,
    presence: DebouncedSensor,
    filament: Option<DebouncedSensor>,
    phase: Phase,
    /// Feeder position at the start of the current sequence.
    origin_steps: i64,
    detected_at_mm: Option<f32>,
    last_error: Option<TmsError>,
}

impl SlotController {
    pub fn new(cfg: SlotCfg, motion: &MotionCfg) -> Self {
        Self {
            feeder: MotionDriver::new(cfg.feeder, motion),
            spool: cfg.spool.map(|m| MotionDriver::new(m, motion)),
            presence: DebouncedSensor::new(cfg.presence, motion.debounce_ms),
            filament: cfg
                .filament
                .map(|s| DebouncedSensor::new(s, motion.debounce_ms)),
            phase: Phase::Idle,
            origin_steps: 0,
            detected_at_mm: None,
            last_error: None,
            cfg,
        }
    }

    pub fn index(&self) -> usize {
        self.cfg.index
    }

    pub fn cfg(&self) -> &SlotCfg {
        &self.cfg
    }

    pub fn state(&self) -> SlotState {
        self.phase.state()
    }

    pub fn last_error(&self) -> Option<&TmsError> {
        self.last_error.as_ref()
    }

    pub fn feeder(&self) -> &MotionDriver {
        &self.feeder
    }

    pub(crate) fn feeder_mut(&mut self) -> &mut MotionDriver {
        &mut self.feeder
    }

    pub fn spool(&self) -> Option<&MotionDriver> {
        self.spool.as_ref()
    }

    /// Net feeder displacement of the current (or last) sequence.
    pub fn travel_mm(&self) -> f32 {
        steps_to_mm(
            self.feeder.position_steps() - self.origin_steps,
            self.feeder.steps_per_mm(),
        )
    }

    pub fn status(&self) -> SlotStatus {
        SlotStatus {
            index: self.index(),
            state: self.state(),
            travel_mm: self.travel_mm(),
            feeder_position_mm: self.feeder.position_mm(),
            spool_position_mm: self.spool.as_ref().map(MotionDriver::position_mm),
            presence: self.presence.last(),
            detected_at_mm: self.detected_at_mm,
            error: self.last_error.clone(),
        }
    }

    fn begin_sequence(&mut self) {
        self.origin_steps = self.feeder.position_steps();
        self.last_error = None;
    }

    /// Accept a load command. Idempotent while loading or loaded.
    pub fn request_load(&mut self, gate: &SelectorGate) -> Result<()> {
        let slot = self.index();
        match self.phase.state() {
            SlotState::Idle => {}
            SlotState::Loading | SlotState::Loaded => return Ok(()),
            other => {
                return Err(TmsError::InvalidState {
                    slot,
                    state: other.name(),
                });
            }
        }
        if let Some(owner) = gate.holder()
            && owner != slot
        {
            return Err(TmsError::GateBusy {
                requested: slot,
                owner,
            });
        }
        self.begin_sequence();
        self.detected_at_mm = None;
        self.phase = Phase::AcquireGate;
        tracing::info!(slot, "load requested");
        Ok(())
    }

    /// Accept an unload command. A no-op for an idle or unloading slot.
    pub fn request_unload(&mut self) -> Result<()> {
        let slot = self.index();
        match self.phase.state() {
            SlotState::Loaded => {
                self.begin_sequence();
                self.phase = Phase::BeginUnload;
                tracing::info!(slot, "unload requested");
                Ok(())
            }
            SlotState::Idle | SlotState::Unloading => Ok(()),
            other => Err(TmsError::InvalidState {
                slot,
                state: other.name(),
            }),
        }
    }

    /// Advance the sequence by at most one increment.
    ///
    /// On error the slot has already disabled its motors, dropped the
    /// selector and moved to `Idle` or `Error`.
    pub fn tick(
        &mut self,
        io: &mut dyn DigitalIo,
        gate: &mut SelectorGate,
        motion: &MotionCfg,
        selector: &SelectorCfg,
        now_ms: u64,
    ) -> Result<Activity> {
        let phase = std::mem::take(&mut self.phase);
        match self.step(phase, io, gate, motion, selector, now_ms) {
            Ok((next, activity)) => {
                self.phase = next;
                Ok(activity)
            }
            Err(e) => {
                self.fail(io, gate, e.clone());
                Err(e)
            }
        }
    }

    fn step(
        &mut self,
        phase: Phase,
        io: &mut dyn DigitalIo,
        gate: &mut SelectorGate,
        motion: &MotionCfg,
        selector: &SelectorCfg,
        now_ms: u64,
    ) -> Result<(Phase, Activity)> {
        let slot = self.index();
        match phase {
            Phase::Idle | Phase::Loaded | Phase::Error(_) => Ok((phase, Activity::Idle)),

            Phase::AcquireGate => {
                if let Some(sensor) = self.filament.as_mut()
                    && !sensor.poll(io, now_ms)?
                {
                    return Err(TmsError::NoFilament { slot });
                }
                match gate.acquire(slot, io, now_ms)? {
                    Acquire::Pending => Ok((Phase::AcquireGate, Activity::Waiting)),
                    Acquire::Granted => {
                        tracing::info!(slot, "selector acquired, seeking presence sensor");
                        let feeder = self.feeder.start(
                            io,
                            MotionRequest::new(
                                motion.max_load_distance_mm,
                                Direction::Forward,
                                motion.load_speed,
                            ),
                        )?;
                        Ok((Phase::Seek { feeder }, Activity::Moving))
                    }
                }
            }

            Phase::Seek { mut feeder } => {
                if self.presence.poll(io, now_ms)? {
                    let at = feeder.travelled_mm();
                    self.detected_at_mm = Some(at);
                    tracing::info!(slot, travelled_mm = at, "presence detected");
                    let back = self.feeder.start(
                        io,
                        MotionRequest::new(
                            selector.offset_before_mm,
                            Direction::Backward,
                            motion.load_speed,
                        ),
                    )?;
                    return Ok((Phase::BackOff { feeder: back }, Activity::Moving));
                }
                if feeder.is_complete() {
                    return Err(TmsError::LoadTimeout {
                        slot,
                        travelled_mm: feeder.travelled_mm(),
                    });
                }
                self.feeder.advance(io, &mut feeder)?;
                Ok((Phase::Seek { feeder }, Activity::Moving))
            }

            Phase::BackOff { mut feeder } => {
                if self.feeder.advance(io, &mut feeder)? == Progress::Complete {
                    let forward = self.feeder.start(
                        io,
                        MotionRequest::new(
                            selector.offset_after_mm,
                            Direction::Forward,
                            motion.load_speed,
                        ),
                    )?;
                    return Ok((Phase::Register { feeder: forward }, Activity::Moving));
                }
                Ok((Phase::BackOff { feeder }, Activity::Moving))
            }

            Phase::Register { mut feeder } => {
                if self.feeder.advance(io, &mut feeder)? == Progress::Complete {
                    self.feeder.disable(io)?;
                    tracing::info!(slot, travel_mm = self.travel_mm(), "loaded");
                    return Ok((Phase::Loaded, Activity::Moving));
                }
                Ok((Phase::Register { feeder }, Activity::Moving))
            }

            Phase::BeginUnload => {
                if !gate.is_owned_by(slot) {
                    return Err(TmsError::InvariantViolation(format!(
                        "slot {slot} unloading without holding the selector"
                    )));
                }
                let request = MotionRequest::new(
                    motion.max_unload_distance_mm,
                    Direction::Backward,
                    motion.unload_speed,
                );
                let feeder = self.feeder.start(io, request)?;
                let spool = match self.spool.as_mut() {
                    Some(driver) => Some(driver.start(io, request)?),
                    None => None,
                };
                Ok((Phase::Retract { feeder, spool }, Activity::Moving))
            }

            Phase::Retract {
                mut feeder,
                mut spool,
            } => {
                if !self.presence.poll(io, now_ms)? {
                    tracing::info!(
                        slot,
                        retracted_mm = feeder.travelled_mm(),
                        "presence cleared"
                    );
                    self.feeder.disable(io)?;
                    if let Some(driver) = self.spool.as_mut()
                        && motion.spool_extra_rewind_mm > 0.0
                    {
                        let rewind = driver.start(
                            io,
                            MotionRequest::new(
                                motion.spool_extra_rewind_mm,
                                Direction::Backward,
                                motion.unload_speed,
                            ),
                        )?;
                        return Ok((Phase::Rewind { spool: rewind }, Activity::Moving));
                    }
                    self.finish_unload(io, gate)?;
                    return Ok((Phase::Idle, Activity::Moving));
                }
                if feeder.is_complete() {
                    return Err(TmsError::Jam {
                        slot,
                        reason: format!(
                            "presence sensor still active after {:.1} mm retract",
                            feeder.travelled_mm()
                        ),
                    });
                }
                self.feeder.advance(io, &mut feeder)?;
                if let (Some(driver), Some(mv)) = (self.spool.as_mut(), spool.as_mut()) {
                    driver.follow(io, mv, feeder.travelled_mm())?;
                }
                Ok((Phase::Retract { feeder, spool }, Activity::Moving))
            }

            Phase::Rewind { mut spool } => {
                let Some(driver) = self.spool.as_mut() else {
                    return Err(TmsError::InvariantViolation(format!(
                        "slot {slot} rewinding without a spool motor"
                    )));
                };
                if driver.advance(io, &mut spool)? == Progress::Complete {
                    self.finish_unload(io, gate)?;
                    return Ok((Phase::Idle, Activity::Moving));
                }
                Ok((Phase::Rewind { spool }, Activity::Moving))
            }
        }
    }

    fn finish_unload(&mut self, io: &mut dyn DigitalIo, gate: &mut SelectorGate) -> Result<()> {
        let slot = self.index();
        self.feeder.disable(io)?;
        if let Some(driver) = self.spool.as_mut() {
            driver.disable(io)?;
        }
        gate.release(slot)?;
        tracing::info!(slot, travel_mm = self.travel_mm(), "unloaded");
        Ok(())
    }

    /// Best-effort disable of both drivers; returns the first failure.
    fn disable_all(&mut self, io: &mut dyn DigitalIo) -> Result<()> {
        let slot = self.index();
        let mut first = None;
        if let Err(e) = self.feeder.disable(io) {
            tracing::warn!(slot, error = %e, "failed to disable feeder");
            first = Some(e);
        }
        if let Some(driver) = self.spool.as_mut()
            && let Err(e) = driver.disable(io)
        {
            tracing::warn!(slot, error = %e, "failed to disable spool motor");
            first.get_or_insert(e);
        }
        first.map_or(Ok(()), Err)
    }

    fn fail(&mut self, io: &mut dyn DigitalIo, gate: &mut SelectorGate, err: TmsError) {
        let slot = self.index();
        let _ = self.disable_all(io);
        gate.cancel(slot);
        if err.returns_to_idle() {
            tracing::warn!(slot, error = %err, "load aborted");
            self.phase = Phase::Idle;
        } else {
            tracing::error!(slot, error = %err, "slot faulted");
            self.phase = Phase::Error(err.clone());
        }
        self.last_error = Some(err);
    }

    /// Return to `Idle` from any state: motors off, selector dropped, error
    /// cleared.
    pub fn reset(&mut self, io: &mut dyn DigitalIo, gate: &mut SelectorGate) -> Result<()> {
        let slot = self.index();
        gate.cancel(slot);
        self.phase = Phase::Idle;
        self.last_error = None;
        tracing::info!(slot, "slot reset");
        self.disable_all(io)
    }

    /// Boot-time discovery: a slot whose filament already covers the
    /// presence sensor is taken as loaded.
    pub fn discover(
        &mut self,
        io: &mut dyn DigitalIo,
        gate: &mut SelectorGate,
        now_ms: u64,
    ) -> Result<()> {
        if self.state() != SlotState::Idle {
            return Ok(());
        }
        let slot = self.index();
        if !self.presence.poll(io, now_ms)? {
            return Ok(());
        }
        match gate.claim(slot) {
            Ok(()) => {
                tracing::info!(slot, "filament found at presence sensor, marking loaded");
                self.phase = Phase::Loaded;
                Ok(())
            }
            Err(TmsError::GateBusy { owner, .. }) => {
                let err = TmsError::Jam {
                    slot,
                    reason: format!("filament present while slot {owner} holds the selector"),
                };
                tracing::error!(slot, error = %err, "discovery conflict");
                self.phase = Phase::Error(err.clone());
                self.last_error = Some(err.clone());
                Err(err)
            }
            Err(e) => Err(e),
        }
    }

    /// Disable both drivers without touching the sequence state.
    pub fn shutdown(&mut self, io: &mut dyn DigitalIo) -> Result<()> {
        self.disable_all(io)
    }
}
