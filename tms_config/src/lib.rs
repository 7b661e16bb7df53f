#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the filament feeder.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - Polarity fields accept `"low"`/`"high"` in any of the usual spellings.
//! - `steps_per_mm` accepts a plain number or a drive description
//!   (`{ full_steps = 200, microsteps = 16, mm_per_rev = 70 }`).
use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use serde::de::Deserializer;

/// Electrical level of a digital line.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    #[serde(alias = "LOW", alias = "Low")]
    Low,
    #[serde(alias = "HIGH", alias = "High")]
    High,
}

/// Pins and calibration of one stepper driver.
#[derive(Debug, Deserialize, Clone)]
pub struct MotorPins {
    pub enable_pin: u8,
    pub dir_pin: u8,
    pub step_pin: u8,
    /// Level of the direction pin that moves filament towards the printer
    /// (feeder) or unwinds the spool (spool motor).
    #[serde(default)]
    pub feed_dir: Level,
    #[serde(deserialize_with = "de_steps_per_mm")]
    pub steps_per_mm: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Slot {
    /// Detector at the selector/hub input of this slot.
    pub presence_pin: u8,
    /// Optional detector at the slot entry (spool side).
    #[serde(default)]
    pub filament_pin: Option<u8>,
    pub feeder: MotorPins,
    /// Optional rewind motor driving the spool.
    #[serde(default)]
    pub spool: Option<MotorPins>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Motion {
    /// Level of the enable pin that energizes a driver.
    pub motor_on: Level,
    /// mm/s
    pub load_speed: f32,
    /// mm/s
    pub unload_speed: f32,
    /// Distance fed between two sensor polls (mm).
    pub move_read_distance: f32,
    /// Travel ceiling while searching for the presence sensor (mm).
    pub max_load_distance: f32,
    /// Travel ceiling while retracting until the presence sensor clears (mm).
    pub max_unload_distance: f32,
    /// Extra spool rewind after the filament cleared the sensor (mm).
    pub spool_extra_rewind: f32,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            motor_on: Level::Low,
            load_speed: 400.0,
            unload_speed: 400.0,
            move_read_distance: 1.0,
            max_load_distance: 1500.0,
            max_unload_distance: 1500.0,
            spool_extra_rewind: 150.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Sensors {
    /// Level reported by presence detectors when filament is present.
    pub presence_level: Level,
    /// Level reported by slot-entry detectors when filament is present.
    pub filament_level: Level,
    pub debounce_ms: u64,
}

impl Default for Sensors {
    fn default() -> Self {
        Self {
            presence_level: Level::Low,
            filament_level: Level::Low,
            debounce_ms: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Selector {
    /// Optional end-of-path detector of the shared section.
    pub end_pin: Option<u8>,
    /// Level reported by the end-of-path detector when filament is present.
    pub detect_level: Level,
    /// Retract after the presence sensor tripped (mm).
    pub offset_before: f32,
    /// Final forward approach (mm).
    pub offset_after: f32,
    /// How long the shared path may take to report clear on acquisition.
    pub confirm_timeout_ms: u64,
}

impl Default for Selector {
    fn default() -> Self {
        Self {
            end_pin: None,
            detect_level: Level::Low,
            offset_before: 30.0,
            offset_after: 95.0,
            confirm_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Buffer {
    pub pin: u8,
    /// Level the buffer sensor reports when the buffer is empty.
    pub empty_level: Level,
    /// mm/s
    pub feed_speed: f32,
    /// mm/s
    pub preload_speed: f32,
    /// Distance fed after pressure is detected (mm).
    #[serde(alias = "preload_lengh")]
    pub preload_length: f32,
    /// mm/s
    pub preload_slow_speed: f32,
    /// Final part of the preload fed at the slow speed (mm).
    pub preload_slow_length: f32,
    pub preload_delay_ms: u64,
    pub preload_debounce_ms: u64,
    /// Feed ceiling for one refill cycle (mm).
    pub preload_max_distance: f32,
}

impl Default for Buffer {
    fn default() -> Self {
        Self {
            pin: 4,
            empty_level: Level::Low,
            feed_speed: 200.0,
            preload_speed: 100.0,
            preload_length: 15.0,
            preload_slow_speed: 50.0,
            preload_slow_length: 5.0,
            preload_delay_ms: 50,
            preload_debounce_ms: 20,
            preload_max_distance: 600.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Control {
    /// Sleep between ticks that did not move a motor.
    pub idle_tick_ms: u64,
    /// Upper bound of ticks a blocking command may take.
    pub max_ticks: u64,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            idle_tick_ms: 5,
            max_ticks: 100_000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Parameters of the simulated machine used when no GPIO backend is built in.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Simulation {
    /// Tip travel from the parked position to the presence sensor (mm).
    pub sensor_distance: f32,
    /// Tip travel from the parked position to the end-of-path sensor (mm).
    pub selector_distance: f32,
    /// Tip travel after which feeding fills the buffer (mm).
    pub buffer_distance: f32,
    /// Buffer reserve at which the sensor reports pressure (mm).
    pub buffer_trip: f32,
    /// Simulated extrusion rate draining the buffer (mm/s).
    pub consume_mm_s: f32,
    /// Slot whose filament starts parked at the loaded position.
    pub preloaded_slot: Option<usize>,
    /// Slots without filament at the entry sensor.
    pub empty_slots: Vec<usize>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            sensor_distance: 120.0,
            selector_distance: 200.0,
            buffer_distance: 150.0,
            buffer_trip: 5.0,
            consume_mm_s: 0.0,
            preloaded_slot: None,
            empty_slots: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub slots: Vec<Slot>,
    #[serde(default)]
    pub motion: Motion,
    #[serde(default)]
    pub sensors: Sensors,
    #[serde(default)]
    pub selector: Selector,
    /// Buffer regulation is disabled when the section is absent.
    #[serde(default)]
    pub buffer: Option<Buffer>,
    #[serde(default)]
    pub control: Control,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub simulation: Simulation,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))?;
    cfg.validate()?;
    Ok(cfg)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepsToml {
    Value(f32),
    Drive {
        full_steps: u32,
        microsteps: u32,
        mm_per_rev: f32,
    },
}

#[allow(clippy::cast_precision_loss)]
fn de_steps_per_mm<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StepsToml::deserialize(deserializer)? {
        StepsToml::Value(v) => v,
        StepsToml::Drive {
            full_steps,
            microsteps,
            mm_per_rev,
        } => (u64::from(full_steps) * u64::from(microsteps)) as f32 / mm_per_rev,
    })
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f32) -> bool {
    v.is_finite() && v >= 0.0
}

fn validate_motor(m: &MotorPins, what: &str) -> eyre::Result<()> {
    if !positive(m.steps_per_mm) {
        eyre::bail!("{what}.steps_per_mm must be > 0");
    }
    Ok(())
}

impl Config {
    /// Every pin referenced by the config, in declaration order.
    pub fn pins(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for s in &self.slots {
            out.push(s.presence_pin);
            out.extend(s.filament_pin);
            for m in std::iter::once(&s.feeder).chain(s.spool.as_ref()) {
                out.extend([m.enable_pin, m.dir_pin, m.step_pin]);
            }
        }
        out.extend(self.selector.end_pin);
        out.extend(self.buffer.as_ref().map(|b| b.pin));
        out
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Slots
        if self.slots.is_empty() {
            eyre::bail!("at least one [[slots]] entry is required");
        }
        for (i, s) in self.slots.iter().enumerate() {
            validate_motor(&s.feeder, &format!("slots[{i}].feeder"))?;
            if let Some(spool) = &s.spool {
                validate_motor(spool, &format!("slots[{i}].spool"))?;
            }
        }

        let mut seen = HashSet::new();
        for pin in self.pins() {
            if !seen.insert(pin) {
                eyre::bail!("pin {pin} is assigned to more than one line");
            }
        }

        // Motion
        if !positive(self.motion.load_speed) {
            eyre::bail!("motion.load_speed must be > 0");
        }
        if !positive(self.motion.unload_speed) {
            eyre::bail!("motion.unload_speed must be > 0");
        }
        if !positive(self.motion.move_read_distance) {
            eyre::bail!("motion.move_read_distance must be > 0");
        }
        if !positive(self.motion.max_load_distance) {
            eyre::bail!("motion.max_load_distance must be > 0");
        }
        if !positive(self.motion.max_unload_distance) {
            eyre::bail!("motion.max_unload_distance must be > 0");
        }
        if !non_negative(self.motion.spool_extra_rewind) {
            eyre::bail!("motion.spool_extra_rewind must be >= 0");
        }

        // Sensors
        if self.sensors.debounce_ms > 10_000 {
            eyre::bail!("sensors.debounce_ms is unreasonably large (>10s)");
        }

        // Selector
        if !non_negative(self.selector.offset_before) {
            eyre::bail!("selector.offset_before must be >= 0");
        }
        if !non_negative(self.selector.offset_after) {
            eyre::bail!("selector.offset_after must be >= 0");
        }
        if self.selector.end_pin.is_some() && self.selector.confirm_timeout_ms == 0 {
            eyre::bail!("selector.confirm_timeout_ms must be >= 1 when end_pin is set");
        }

        // Buffer
        if let Some(b) = &self.buffer {
            if !positive(b.feed_speed) {
                eyre::bail!("buffer.feed_speed must be > 0");
            }
            if !positive(b.preload_speed) {
                eyre::bail!("buffer.preload_speed must be > 0");
            }
            if !positive(b.preload_slow_speed) {
                eyre::bail!("buffer.preload_slow_speed must be > 0");
            }
            if !non_negative(b.preload_length) {
                eyre::bail!("buffer.preload_length must be >= 0");
            }
            if !non_negative(b.preload_slow_length) || b.preload_slow_length > b.preload_length {
                eyre::bail!("buffer.preload_slow_length must be in [0, preload_length]");
            }
            if !positive(b.preload_max_distance) || b.preload_max_distance <= b.preload_length {
                eyre::bail!("buffer.preload_max_distance must be > preload_length");
            }
        }

        // Control
        if self.control.max_ticks == 0 {
            eyre::bail!("control.max_ticks must be >= 1");
        }

        // Simulation
        if let Some(i) = self.simulation.preloaded_slot
            && i >= self.slots.len()
        {
            eyre::bail!("simulation.preloaded_slot {i} is not a configured slot");
        }

        Ok(())
    }
}
