//! `From` implementations bridging `tms_config` types to `tms_core` types.

use tms_traits::Line;

use crate::config::{
    BufferCfg, ControlCfg, Level, MachineCfg, MotionCfg, MotorCfg, SelectorCfg, SensorCfg, SlotCfg,
};

// ── Level ────────────────────────────────────────────────────────────────────

impl From<tms_config::Level> for Level {
    fn from(l: tms_config::Level) -> Self {
        match l {
            tms_config::Level::Low => Self::Low,
            tms_config::Level::High => Self::High,
        }
    }
}

// ── MotorCfg ─────────────────────────────────────────────────────────────────

impl From<&tms_config::MotorPins> for MotorCfg {
    fn from(m: &tms_config::MotorPins) -> Self {
        Self {
            enable: Line(m.enable_pin),
            dir: Line(m.dir_pin),
            step: Line(m.step_pin),
            feed_dir: m.feed_dir.into(),
            steps_per_mm: m.steps_per_mm,
        }
    }
}

// ── MotionCfg ────────────────────────────────────────────────────────────────

impl From<(&tms_config::Motion, &tms_config::Sensors)> for MotionCfg {
    fn from((m, s): (&tms_config::Motion, &tms_config::Sensors)) -> Self {
        Self {
            motor_on: m.motor_on.into(),
            load_speed: m.load_speed,
            unload_speed: m.unload_speed,
            move_read_distance_mm: m.move_read_distance,
            max_load_distance_mm: m.max_load_distance,
            max_unload_distance_mm: m.max_unload_distance,
            spool_extra_rewind_mm: m.spool_extra_rewind,
            debounce_ms: s.debounce_ms,
        }
    }
}

// ── SelectorCfg ──────────────────────────────────────────────────────────────

impl From<&tms_config::Selector> for SelectorCfg {
    fn from(s: &tms_config::Selector) -> Self {
        Self {
            end_sensor: s
                .end_pin
                .map(|pin| SensorCfg::new(pin, s.detect_level.into())),
            offset_before_mm: s.offset_before,
            offset_after_mm: s.offset_after,
            confirm_timeout_ms: s.confirm_timeout_ms,
        }
    }
}

// ── BufferCfg ────────────────────────────────────────────────────────────────

impl From<&tms_config::Buffer> for BufferCfg {
    fn from(b: &tms_config::Buffer) -> Self {
        Self {
            sensor: SensorCfg::new(b.pin, b.empty_level.into()),
            feed_speed: b.feed_speed,
            preload_speed: b.preload_speed,
            preload_length_mm: b.preload_length,
            preload_slow_speed: b.preload_slow_speed,
            preload_slow_length_mm: b.preload_slow_length,
            preload_delay_ms: b.preload_delay_ms,
            preload_debounce_ms: b.preload_debounce_ms,
            preload_max_distance_mm: b.preload_max_distance,
        }
    }
}

// ── MachineCfg ───────────────────────────────────────────────────────────────

impl From<&tms_config::Config> for MachineCfg {
    fn from(c: &tms_config::Config) -> Self {
        let presence_level: Level = c.sensors.presence_level.into();
        let filament_level: Level = c.sensors.filament_level.into();
        let slots = c
            .slots
            .iter()
            .enumerate()
            .map(|(index, s)| SlotCfg {
                index,
                presence: SensorCfg::new(s.presence_pin, presence_level),
                filament: s.filament_pin.map(|p| SensorCfg::new(p, filament_level)),
                feeder: (&s.feeder).into(),
                spool: s.spool.as_ref().map(MotorCfg::from),
            })
            .collect();
        Self {
            slots,
            motion: (&c.motion, &c.sensors).into(),
            selector: (&c.selector).into(),
            buffer: c.buffer.as_ref().map(BufferCfg::from),
            control: ControlCfg {
                idle_tick_ms: c.control.idle_tick_ms,
            },
        }
    }
}
