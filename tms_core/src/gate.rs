//! Exclusive ownership of the shared selector path.

use tms_traits::DigitalIo;

use crate::config::SelectorCfg;
use crate::debounce::DebouncedSensor;
use crate::error::{Result, TmsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Idle,
    Owned(usize),
}

/// Outcome of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// Waiting for the end-of-path sensor to report the path clear.
    Pending,
}

/// Arbitrates the selector between slots. At most one owner at any time.
#[derive(Debug, Clone)]
pub struct SelectorGate {
    state: GateState,
    end_sensor: Option<DebouncedSensor>,
    confirm_timeout_ms: u64,
    /// Slot waiting for confirmation and when it started waiting.
    pending: Option<(usize, u64)>,
}

impl Default for SelectorGate {
    fn default() -> Self {
        Self::new(&SelectorCfg::default(), 0)
    }
}

impl SelectorGate {
    pub fn new(cfg: &SelectorCfg, debounce_ms: u64) -> Self {
        Self {
            state: GateState::Idle,
            end_sensor: cfg
                .end_sensor
                .map(|s| DebouncedSensor::new(s, debounce_ms)),
            confirm_timeout_ms: cfg.confirm_timeout_ms,
            pending: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn owner(&self) -> Option<usize> {
        match self.state {
            GateState::Owned(o) => Some(o),
            GateState::Idle => None,
        }
    }

    /// Slot currently holding or waiting for the gate.
    pub fn holder(&self) -> Option<usize> {
        self.owner().or(self.pending.map(|(s, _)| s))
    }

    pub fn is_owned_by(&self, slot: usize) -> bool {
        self.state == GateState::Owned(slot)
    }

    /// Try to take the gate for `slot`.
    ///
    /// Idempotent for the current owner. With an end-of-path sensor the gate
    /// is only granted once the path reads clear; if that does not happen
    /// within the confirmation timeout the attempt fails with `Jam` and the
    /// gate stays `Idle`.
    pub fn acquire(&mut self, slot: usize, io: &mut dyn DigitalIo, now_ms: u64) -> Result<Acquire> {
        match self.state {
            GateState::Owned(o) if o == slot => return Ok(Acquire::Granted),
            GateState::Owned(owner) => {
                return Err(TmsError::GateBusy {
                    requested: slot,
                    owner,
                });
            }
            GateState::Idle => {}
        }
        if let Some((owner, _)) = self.pending
            && owner != slot
        {
            return Err(TmsError::GateBusy {
                requested: slot,
                owner,
            });
        }

        let Some(sensor) = self.end_sensor.as_mut() else {
            self.state = GateState::Owned(slot);
            return Ok(Acquire::Granted);
        };

        let started = *self.pending.get_or_insert((slot, now_ms));
        let occupied = match sensor.poll(io, now_ms) {
            Ok(v) => v,
            Err(e) => {
                self.pending = None;
                return Err(e);
            }
        };
        if !occupied {
            self.pending = None;
            self.state = GateState::Owned(slot);
            tracing::debug!(slot, "selector path confirmed clear");
            return Ok(Acquire::Granted);
        }
        if now_ms.saturating_sub(started.1) >= self.confirm_timeout_ms {
            self.pending = None;
            return Err(TmsError::Jam {
                slot,
                reason: "selector path not clear".into(),
            });
        }
        Ok(Acquire::Pending)
    }

    /// Take the gate without sensor confirmation (boot-time discovery).
    pub fn claim(&mut self, slot: usize) -> Result<()> {
        match (self.state, self.pending) {
            (GateState::Owned(o), _) if o == slot => Ok(()),
            (GateState::Owned(owner), _) => Err(TmsError::GateBusy {
                requested: slot,
                owner,
            }),
            (GateState::Idle, Some((owner, _))) if owner != slot => Err(TmsError::GateBusy {
                requested: slot,
                owner,
            }),
            (GateState::Idle, _) => {
                self.pending = None;
                self.state = GateState::Owned(slot);
                Ok(())
            }
        }
    }

    /// Give the gate back. Releasing a gate the slot does not own is a
    /// programming error and leaves the gate unchanged.
    pub fn release(&mut self, slot: usize) -> Result<()> {
        match self.state {
            GateState::Owned(o) if o == slot => {
                self.state = GateState::Idle;
                Ok(())
            }
            GateState::Owned(o) => Err(TmsError::InvariantViolation(format!(
                "slot {slot} released the selector owned by slot {o}"
            ))),
            GateState::Idle => Err(TmsError::InvariantViolation(format!(
                "slot {slot} released an idle selector"
            ))),
        }
    }

    /// Drop whatever `slot` holds (ownership or a pending acquisition).
    /// Used on error paths; a no-op when the slot holds nothing.
    pub fn cancel(&mut self, slot: usize) {
        if self.pending.is_some_and(|(s, _)| s == slot) {
            self.pending = None;
        }
        if self.is_owned_by(slot) {
            self.state = GateState::Idle;
        }
    }
}
