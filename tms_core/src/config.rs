//! Runtime configuration structs.
//!
//! Built once at startup (usually from `tms_config` via `conversions`) and
//! passed by reference into the components; never mutated afterwards.

use tms_traits::{DigitalIo, Line};

use crate::error::Result;
use crate::hw_error::from_boxed;

/// Electrical level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    #[inline]
    pub fn is_high(self) -> bool {
        matches!(self, Self::High)
    }

    /// Whether a raw reading equals this level.
    #[inline]
    pub fn matches(self, raw_high: bool) -> bool {
        raw_high == self.is_high()
    }

    #[inline]
    pub fn inverse(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

/// A digital input and the level at which it reports "active".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCfg {
    pub line: Line,
    pub active: Level,
}

impl SensorCfg {
    pub fn new(line: u8, active: Level) -> Self {
        Self {
            line: Line(line),
            active,
        }
    }

    /// Sample the line and return the logical (polarity-resolved) state.
    pub fn read(&self, io: &mut dyn DigitalIo) -> Result<bool> {
        let raw = io.read(self.line).map_err(from_boxed)?;
        Ok(self.active.matches(raw))
    }
}

/// One stepper driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorCfg {
    pub enable: Line,
    pub dir: Line,
    pub step: Line,
    /// Direction level that feeds filament (or unwinds the spool).
    pub feed_dir: Level,
    pub steps_per_mm: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotCfg {
    pub index: usize,
    /// Detector whose edge positions the filament at the selector.
    pub presence: SensorCfg,
    /// Optional slot-entry detector.
    pub filament: Option<SensorCfg>,
    pub feeder: MotorCfg,
    pub spool: Option<MotorCfg>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionCfg {
    pub motor_on: Level,
    pub load_speed: f32,
    pub unload_speed: f32,
    pub move_read_distance_mm: f32,
    pub max_load_distance_mm: f32,
    pub max_unload_distance_mm: f32,
    pub spool_extra_rewind_mm: f32,
    pub debounce_ms: u64,
}

impl Default for MotionCfg {
    fn default() -> Self {
        Self {
            motor_on: Level::Low,
            load_speed: 400.0,
            unload_speed: 400.0,
            move_read_distance_mm: 1.0,
            max_load_distance_mm: 1500.0,
            max_unload_distance_mm: 1500.0,
            spool_extra_rewind_mm: 150.0,
            debounce_ms: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorCfg {
    /// Active while filament occupies the end of the shared path.
    pub end_sensor: Option<SensorCfg>,
    pub offset_before_mm: f32,
    pub offset_after_mm: f32,
    pub confirm_timeout_ms: u64,
}

impl Default for SelectorCfg {
    fn default() -> Self {
        Self {
            end_sensor: None,
            offset_before_mm: 30.0,
            offset_after_mm: 95.0,
            confirm_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferCfg {
    /// Active while the buffer is empty.
    pub sensor: SensorCfg,
    pub feed_speed: f32,
    pub preload_speed: f32,
    pub preload_length_mm: f32,
    pub preload_slow_speed: f32,
    pub preload_slow_length_mm: f32,
    pub preload_delay_ms: u64,
    pub preload_debounce_ms: u64,
    pub preload_max_distance_mm: f32,
}

impl Default for BufferCfg {
    fn default() -> Self {
        Self {
            sensor: SensorCfg::new(4, Level::Low),
            feed_speed: 200.0,
            preload_speed: 100.0,
            preload_length_mm: 15.0,
            preload_slow_speed: 50.0,
            preload_slow_length_mm: 5.0,
            preload_delay_ms: 50,
            preload_debounce_ms: 20,
            preload_max_distance_mm: 600.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlCfg {
    pub idle_tick_ms: u64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self { idle_tick_ms: 5 }
    }
}

/// Complete machine description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MachineCfg {
    pub slots: Vec<SlotCfg>,
    pub motion: MotionCfg,
    pub selector: SelectorCfg,
    pub buffer: Option<BufferCfg>,
    pub control: ControlCfg,
}
